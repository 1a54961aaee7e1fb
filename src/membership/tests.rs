//! Membership Module Tests
//!
//! Validates the member view and the directory contract the pool relies on.
//!
//! ## Test Scopes
//! - **Data Structures**: node ids and the gossip wire format.
//! - **Service Logic**: joins, incarnation precedence, failure detection.
//! - **Directory**: alive view, selection with exclusions, unreachable marking.

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::net::SocketAddr;
    use std::time::{Duration, Instant};

    use crate::membership::*;
    use crate::membership::types::GossipMessage;

    fn node(port: u16, incarnation: u64, state: NodeState) -> Node {
        let http_addr: SocketAddr = format!("127.0.0.1:{}", port + 1000).parse().unwrap();
        Node {
            id: NodeId::from_address(&http_addr),
            gossip_addr: format!("127.0.0.1:{}", port).parse().unwrap(),
            http_addr,
            state,
            incarnation,
            last_seen: None,
        }
    }

    async fn service() -> std::sync::Arc<MembershipService> {
        MembershipService::bind(
            "127.0.0.1:0".parse().unwrap(),
            "127.0.0.1:8999".parse().unwrap(),
            vec![],
        )
        .await
        .unwrap()
    }

    // ============================================================
    // NODE ID TESTS
    // ============================================================

    #[test]
    fn test_node_id_from_address_is_stable() {
        let addr: SocketAddr = "10.0.0.1:6000".parse().unwrap();
        let other: SocketAddr = "10.0.0.2:6000".parse().unwrap();

        assert_eq!(NodeId::from_address(&addr), NodeId::from_address(&addr));
        assert_ne!(NodeId::from_address(&addr), NodeId::from_address(&other));
        assert_ne!(NodeId::random(), NodeId::random());
    }

    #[test]
    fn test_gossip_message_bincode_round_trip() {
        let msg = GossipMessage::Ack {
            from: node(5000, 3, NodeState::Alive),
            members: vec![node(5001, 1, NodeState::Suspect)],
        };

        let encoded = bincode::serialize(&msg).expect("encode");
        let decoded: GossipMessage = bincode::deserialize(&encoded).expect("decode");

        match decoded {
            GossipMessage::Ack { from, members } => {
                assert_eq!(from.incarnation, 3);
                assert_eq!(members.len(), 1);
                assert_eq!(members[0].state, NodeState::Suspect);
                assert!(members[0].last_seen.is_none());
            }
            other => panic!("unexpected message {:?}", other),
        }
    }

    // ============================================================
    // SERVICE TESTS
    // ============================================================

    #[tokio::test]
    async fn test_service_starts_with_itself_alive() {
        let service = service().await;

        let alive = service.alive_members();

        assert_eq!(alive.len(), 1);
        assert_eq!(alive[0].id, service.local_id());
        assert_eq!(service.alive_nodes()[0].http_addr, "127.0.0.1:8999".parse().unwrap());
    }

    #[tokio::test]
    async fn test_join_adds_member() {
        let service = service().await;
        let joiner = node(5101, 1, NodeState::Alive);

        service
            .handle_message(GossipMessage::Join { node: joiner.clone() }, joiner.gossip_addr)
            .await;

        let ids: HashSet<NodeId> = service.alive_nodes().into_iter().map(|n| n.id).collect();
        assert!(ids.contains(&joiner.id));
        assert_eq!(ids.len(), 2);
    }

    #[tokio::test]
    async fn test_higher_incarnation_wins() {
        // ARRANGE
        let service = service().await;
        let peer = node(5102, 1, NodeState::Alive);
        service
            .handle_message(GossipMessage::Join { node: peer.clone() }, peer.gossip_addr)
            .await;

        // ACT: a stale suspicion is ignored, a fresh one applies.
        service
            .handle_message(
                GossipMessage::Suspect { node_id: peer.id, incarnation: 0 },
                peer.gossip_addr,
            )
            .await;
        let after_stale = service.alive_members().len();
        service
            .handle_message(
                GossipMessage::Suspect { node_id: peer.id, incarnation: 1 },
                peer.gossip_addr,
            )
            .await;
        let after_fresh = service.alive_members().len();
        service
            .handle_message(
                GossipMessage::Alive { node_id: peer.id, incarnation: 2 },
                peer.gossip_addr,
            )
            .await;

        // ASSERT
        assert_eq!(after_stale, 2);
        assert_eq!(after_fresh, 1);
        assert_eq!(service.alive_members().len(), 2);
    }

    #[tokio::test]
    async fn test_suspicion_of_self_raises_incarnation() {
        let service = service().await;
        let before = service.local_node().incarnation;

        service
            .handle_message(
                GossipMessage::Suspect {
                    node_id: service.local_id(),
                    incarnation: before,
                },
                "127.0.0.1:1".parse().unwrap(),
            )
            .await;

        assert_eq!(service.local_node().incarnation, before + 1);
        assert_eq!(service.alive_members().len(), 1);
    }

    #[tokio::test]
    async fn test_silent_member_is_suspected_then_dead() {
        let service = service().await;
        let peer = node(5103, 1, NodeState::Alive);
        service
            .handle_message(GossipMessage::Join { node: peer.clone() }, peer.gossip_addr)
            .await;

        let later = Instant::now() + Duration::from_secs(6);
        let suspicions = service.detect_failures(later);
        assert_eq!(suspicions.len(), 1);
        assert_eq!(service.alive_members().len(), 1);

        let much_later = Instant::now() + Duration::from_secs(11);
        assert!(service.detect_failures(much_later).is_empty());
        let state = service
            .members()
            .into_iter()
            .find(|n| n.id == peer.id)
            .map(|n| n.state);
        assert_eq!(state, Some(NodeState::Dead));
    }

    #[tokio::test]
    async fn test_mark_unreachable_never_suspects_self() {
        let service = service().await;
        let peer = node(5104, 1, NodeState::Alive);
        service
            .handle_message(GossipMessage::Join { node: peer.clone() }, peer.gossip_addr)
            .await;

        service.mark_unreachable(&service.local_id());
        service.mark_unreachable(&peer.id);

        let alive = service.alive_nodes();
        assert_eq!(alive.len(), 1);
        assert_eq!(alive[0].id, service.local_id());
    }

    // ============================================================
    // DIRECTORY TESTS
    // ============================================================

    #[test]
    fn test_select_respects_count_and_exclusions() {
        let directory = StaticDirectory::new();
        let nodes: Vec<NodeAddress> = (0..5).map(|i| node(5200 + i, 1, NodeState::Alive).address()).collect();
        for n in &nodes {
            directory.add(n.clone());
        }
        let excluded: HashSet<NodeId> = [nodes[0].id, nodes[1].id].into_iter().collect();

        for _ in 0..20 {
            let chosen = directory.select(2, &excluded);
            assert_eq!(chosen.len(), 2);
            assert_ne!(chosen[0].id, chosen[1].id);
            assert!(chosen.iter().all(|n| !excluded.contains(&n.id)));
        }
        assert_eq!(directory.select(10, &excluded).len(), 3);
    }

    #[test]
    fn test_unreachable_nodes_leave_the_alive_view() {
        let directory = StaticDirectory::new();
        let a = node(5300, 1, NodeState::Alive).address();
        let b = node(5301, 1, NodeState::Alive).address();
        directory.add(a.clone());
        directory.add(b.clone());

        directory.mark_unreachable(&a.id);

        assert!(!directory.is_alive(&a.id));
        assert_eq!(directory.alive_nodes(), vec![b.clone()]);
        assert_eq!(directory.lookup(&b.id), Some(b));
        assert_eq!(directory.lookup(&a.id), None);
    }
}
