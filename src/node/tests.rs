//! Pool Node Tests
//!
//! ## Test Scopes
//! - **Routing**: hop selection and successor order over XOR distance.
//! - **Messaging**: hop budgets, unknown services, unknown nodes, failover.
//! - **End to end**: store, publish records and backups across a pool.

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::net::SocketAddr;

    use crate::error::ErrorKind;
    use crate::identity::{ObjectId, content_id};
    use crate::membership::types::{NodeAddress, NodeId};
    use crate::node::routing;
    use crate::node::testing::TestPool;
    use crate::node::{Message, MessageKind, Operation, Payload, Status, Transport};
    use crate::object::{BLOCK_OBJECT_TYPE, TIME_TO_LIVE_FOREVER};
    use crate::pool::replication::Parallelism;

    fn addresses(count: u16) -> Vec<NodeAddress> {
        (0..count)
            .map(|i| {
                let http_addr: SocketAddr = format!("10.0.0.1:{}", 8000 + i).parse().unwrap();
                NodeAddress {
                    id: NodeId::from_address(&http_addr),
                    http_addr,
                }
            })
            .collect()
    }

    // ============================================================
    // ROUTING TESTS
    // ============================================================

    #[test]
    fn test_next_hops_are_strictly_closer() {
        // ARRANGE
        let nodes = addresses(8);
        let target = ObjectId::random();
        let ordered = routing::by_distance(&target, &nodes);
        let middle = &ordered[4];

        // ACT
        let hops = routing::next_hops(&middle.id, &target, &nodes);

        // ASSERT
        assert_eq!(hops, ordered[..4].to_vec());
    }

    #[test]
    fn test_root_has_no_next_hop() {
        let nodes = addresses(8);
        let target = ObjectId::random();
        let root = routing::closest(&target, &nodes).unwrap();

        assert!(routing::next_hops(&root.id, &target, &nodes).is_empty());
        assert_eq!(routing::by_distance(&target, &nodes)[0], root);
    }

    #[test]
    fn test_by_distance_drops_duplicates() {
        let mut nodes = addresses(3);
        nodes.push(nodes[0].clone());

        let sorted = routing::by_distance(&ObjectId::random(), &nodes);

        assert_eq!(sorted.len(), 3);
    }

    #[test]
    fn test_successors_exclude_local_node() {
        let nodes = addresses(6);
        let local = nodes[2].id;

        let successors = routing::successors(&local, &nodes, 2);

        assert_eq!(successors.len(), 2);
        assert!(successors.iter().all(|node| node.id != local));
        let expected = routing::by_distance(&local.0, &nodes);
        assert_eq!(successors, expected[1..3].to_vec());
    }

    // ============================================================
    // MESSAGING TESTS
    // ============================================================

    #[tokio::test]
    async fn test_exhausted_hop_budget_is_reported() {
        // ARRANGE
        let pool = TestPool::new(3);
        let sender = pool.nodes[0].clone();
        let target = pool.nodes[1].id();
        let message = Message::new(
            MessageKind::RouteToNode,
            sender.address().clone(),
            target.0,
            target.0,
            BLOCK_OBJECT_TYPE,
            Operation::RetrieveLocalObject,
            0,
            Payload::Empty,
        );

        // ACT: the one hop to the target takes the budget below zero.
        let reply = sender.receive(message).await;

        // ASSERT
        assert_eq!(reply.kind, MessageKind::Reply);
        assert_eq!(reply.status, Status::Throwable);
        assert_eq!(reply.into_result().unwrap_err().kind(), ErrorKind::TtlExceeded);
    }

    #[tokio::test]
    async fn test_unknown_service_is_refused_at_root() {
        let pool = TestPool::new(3);

        let result = pool.nodes[0]
            .send_to_root(
                ObjectId::random(),
                "no-such-type",
                Operation::RetrieveLocalObject,
                Payload::Empty,
            )
            .await;

        assert_eq!(result.unwrap_err().kind(), ErrorKind::UnknownObjectType);
    }

    #[tokio::test]
    async fn test_exact_message_to_unknown_node_fails() {
        let pool = TestPool::new(3);

        let result = pool.nodes[0]
            .send_to_node_exactly(
                NodeId::random(),
                ObjectId::random(),
                BLOCK_OBJECT_TYPE,
                Operation::RetrieveLocalObject,
                Payload::Empty,
            )
            .await;

        assert_eq!(result.unwrap_err().kind(), ErrorKind::NoSuchNode);
    }

    #[tokio::test]
    async fn test_offline_node_is_unreachable() {
        let pool = TestPool::new(2);
        let target = pool.nodes[1].address().clone();
        pool.transport.set_offline(target.id, true);
        let message = Message::new(
            MessageKind::RouteToNode,
            pool.nodes[0].address().clone(),
            target.id.0,
            target.id.0,
            BLOCK_OBJECT_TYPE,
            Operation::RetrieveLocalObject,
            8,
            Payload::Empty,
        )
        .exact();

        let result = pool.transport.deliver(&target, message).await;

        assert_eq!(result.unwrap_err().kind(), ErrorKind::Transport);
    }

    #[tokio::test]
    async fn test_publish_fails_over_past_unreachable_root() {
        // ARRANGE: the root stays in the directory but drops every message.
        let pool = TestPool::new(5);
        let block = pool
            .blocks
            .create_block(0, b"failover".to_vec(), None, TIME_TO_LIVE_FOREVER, 1)
            .unwrap();
        let object_id = block.object_id().unwrap();
        let old_root = pool.root_of(&object_id);
        let publisher = pool
            .nodes
            .iter()
            .find(|node| node.id() != old_root.id())
            .cloned()
            .unwrap();
        pool.transport.set_offline(old_root.id(), true);

        // ACT
        let response = publisher.publish(&block).await.unwrap();

        // ASSERT
        assert!(!pool.directory.is_alive(&old_root.id()));
        let new_root = pool.root_of(&object_id);
        assert_ne!(new_root.id(), old_root.id());
        assert_eq!(response.responder.id, new_root.id());
        assert_eq!(response.object_ids, vec![object_id]);
        assert_eq!(new_root.publishers().get_publishers(&object_id).len(), 1);
    }

    #[tokio::test]
    async fn test_publisher_records_its_own_backpointer() {
        let pool = TestPool::new(4);
        let block = pool
            .blocks
            .create_block(0, b"self".to_vec(), None, TIME_TO_LIVE_FOREVER, 1)
            .unwrap();
        let object_id = block.object_id().unwrap();
        let publisher = pool.nodes[3].clone();

        publisher.publish(&block).await.unwrap();

        let records = publisher.publishers().get_publishers(&object_id);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].publisher.id, publisher.id());
        assert_eq!(records[0].object_type, BLOCK_OBJECT_TYPE);
    }

    // ============================================================
    // END TO END TESTS
    // ============================================================

    #[tokio::test]
    async fn test_store_publishes_to_root_and_backups() {
        // ARRANGE
        let pool = TestPool::new(5);
        let token = ObjectId::random();
        let token_id = ObjectId::hash(token.as_bytes());
        let block = pool
            .blocks
            .create_block(0, b"end to end".to_vec(), Some(token_id), 3600, 3)
            .unwrap();
        let data_hash = block.data_hash();

        // ACT
        let receipt = pool
            .blocks
            .store(&pool.nodes[0], block, Parallelism::Parallel)
            .await
            .unwrap();

        // ASSERT: identity is the pure content id.
        let object_id = receipt.object_id;
        assert_eq!(object_id, content_id(&data_hash, Some(&token_id)));

        let holders: HashSet<NodeId> = pool
            .holders(&object_id)
            .iter()
            .map(|node| node.id())
            .collect();
        assert_eq!(holders.len(), 3);

        // The root points at every holder.
        let root = pool.root_of(&object_id);
        let at_root: HashSet<NodeId> = root
            .publishers()
            .get_publishers(&object_id)
            .iter()
            .map(|record| record.publisher.id)
            .collect();
        assert_eq!(at_root, holders);

        // Any node can ask the root.
        let asker = pool
            .nodes
            .iter()
            .find(|node| node.id() != root.id())
            .unwrap();
        let remote = asker.get_publishers(object_id).await.unwrap();
        assert_eq!(remote.len(), 3);

        // The root's successors hold backups of the same records.
        let successors = routing::successors(&root.id(), &root.known_nodes(), 2);
        assert_eq!(successors.len(), 2);
        for successor in successors {
            let backups: HashSet<NodeId> = pool
                .node(&successor.id)
                .publishers()
                .get_publishers(&object_id)
                .iter()
                .map(|record| record.publisher.id)
                .collect();
            assert_eq!(backups, holders);
        }
    }
}
