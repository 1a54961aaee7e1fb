//! Publish Module Tests
//!
//! ## Test Scopes
//! - **Publishers**: record identity, refresh, removal and expiry.
//! - **Record lifetime**: derived from the publish period.
//! - **Daemon**: local sweeps over an in-process pool, overlapping cycles.

#[cfg(test)]
mod tests {
    use std::net::SocketAddr;
    use std::time::Duration;

    use crate::clock::now_secs;
    use crate::config::PoolConfig;
    use crate::identity::ObjectId;
    use crate::membership::types::{NodeAddress, NodeId};
    use crate::node::testing::{TestPool, test_config};
    use crate::pool::replication::Parallelism;
    use crate::publish::protocol::{DEFAULT_RECORD_SECONDS_TO_LIVE, record_seconds_to_live};
    use crate::publish::{PublishDaemon, PublishRecord, Publishers};

    fn address(port: u16) -> NodeAddress {
        let http_addr: SocketAddr = format!("127.0.0.1:{}", port).parse().unwrap();
        NodeAddress {
            id: NodeId::from_address(&http_addr),
            http_addr,
        }
    }

    fn record(object_id: ObjectId, publisher: NodeAddress, expire_time_secs: i64) -> PublishRecord {
        PublishRecord {
            object_id,
            publisher,
            object_type: "block".to_string(),
            expire_time_secs,
            object_expire_secs: expire_time_secs,
            delete_token: None,
        }
    }

    // ============================================================
    // PUBLISHERS TESTS
    // ============================================================

    #[tokio::test]
    async fn test_update_refreshes_same_publisher() {
        // ARRANGE
        let publishers = Publishers::new();
        let object_id = ObjectId::random();
        let now = now_secs();

        // ACT
        publishers.update(record(object_id, address(9000), now + 10)).await;
        publishers.update(record(object_id, address(9000), now + 99)).await;
        publishers.update(record(object_id, address(9001), now + 10)).await;

        // ASSERT
        let records = publishers.get_publishers(&object_id);
        assert_eq!(records.len(), 2);
        assert_eq!(publishers.record_count(), 2);
        let refreshed = records
            .iter()
            .find(|r| r.publisher == address(9000))
            .unwrap();
        assert_eq!(refreshed.expire_time_secs, now + 99);
    }

    #[test]
    fn test_records_are_equal_by_object_and_publisher() {
        let object_id = ObjectId::random();

        let early = record(object_id, address(9000), 10);
        let late = record(object_id, address(9000), 20);
        let other = record(object_id, address(9001), 10);

        assert_eq!(early, late);
        assert_ne!(early, other);
    }

    #[tokio::test]
    async fn test_remove_last_record_forgets_object() {
        let publishers = Publishers::new();
        let object_id = ObjectId::random();
        let publisher = address(9000);
        publishers
            .update(record(object_id, publisher.clone(), now_secs() + 60))
            .await;

        publishers.remove(object_id, &publisher.id).await;

        assert!(publishers.get_publishers(&object_id).is_empty());
        assert!(publishers.is_empty());
    }

    #[tokio::test]
    async fn test_remove_unknown_publisher_is_noop() {
        let publishers = Publishers::new();
        let object_id = ObjectId::random();
        publishers
            .update(record(object_id, address(9000), now_secs() + 60))
            .await;

        publishers.remove(object_id, &address(9001).id).await;
        publishers.remove(ObjectId::random(), &address(9000).id).await;

        assert_eq!(publishers.record_count(), 1);
    }

    #[tokio::test]
    async fn test_put_empty_set_forgets_object() {
        // ARRANGE
        let publishers = Publishers::new();
        let object_id = ObjectId::random();
        publishers
            .update(record(object_id, address(9000), now_secs() + 60))
            .await;

        // ACT
        let (guard, records) = publishers.get_publishers_and_lock(object_id).await;
        assert_eq!(records.len(), 1);
        publishers.put(&guard, Vec::new());
        drop(guard);

        // ASSERT
        assert!(publishers.object_ids().is_empty());
    }

    #[tokio::test]
    async fn test_expiry_only_removes_records_out_of_time() {
        // ARRANGE
        let publishers = Publishers::new();
        let object_id = ObjectId::random();
        let t0 = 1_000_000;
        publishers.update(record(object_id, address(9000), t0 + 30)).await;
        publishers.update(record(object_id, address(9001), t0 + 90)).await;

        // ACT & ASSERT: sweeps before the deadline keep the record.
        assert_eq!(publishers.expire_at(t0 + 10).await, 0);
        assert_eq!(publishers.expire_at(t0 + 20).await, 0);
        assert_eq!(publishers.get_publishers(&object_id).len(), 2);

        assert_eq!(publishers.expire_at(t0 + 30).await, 1);
        let left = publishers.get_publishers(&object_id);
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].publisher, address(9001));

        assert_eq!(publishers.expire_at(t0 + 90).await, 1);
        assert!(publishers.is_empty());
    }

    #[test]
    fn test_record_lifetime_spans_two_periods() {
        assert_eq!(record_seconds_to_live(3600), 7200);
        assert_eq!(record_seconds_to_live(1), 2);
        assert_eq!(record_seconds_to_live(0), DEFAULT_RECORD_SECONDS_TO_LIVE);
        assert_eq!(record_seconds_to_live(-5), DEFAULT_RECORD_SECONDS_TO_LIVE);
    }

    // ============================================================
    // DAEMON TESTS
    // ============================================================

    #[tokio::test]
    async fn test_local_sweep_removes_expired_object() {
        // ARRANGE
        let pool = TestPool::new(4);
        let block = pool
            .blocks
            .create_block(0, b"short lived".to_vec(), Some(ObjectId::random()), 0, 1)
            .unwrap();
        let receipt = pool
            .blocks
            .store(&pool.nodes[0], block, Parallelism::Sequential)
            .await
            .unwrap();
        let holder = pool.node(&receipt.stored_on[0].id);
        let daemon = PublishDaemon::new(holder.clone());

        // ACT
        let sweep = daemon.publish_now().await.unwrap();

        // ASSERT
        assert_eq!(sweep.examined, 1);
        assert_eq!(sweep.removed, 1);
        assert!(pool.holders(&receipt.object_id).is_empty());

        let stats = daemon.stats();
        assert_eq!(stats.publish_cycles, 1);
        assert_eq!(stats.objects_removed, 1);
    }

    #[tokio::test]
    async fn test_local_sweep_keeps_and_republishes_live_object() {
        // ARRANGE
        let pool = TestPool::new(4);
        let block = pool
            .blocks
            .create_block(0, b"long lived".to_vec(), Some(ObjectId::random()), 3600, 1)
            .unwrap();
        let receipt = pool
            .blocks
            .store(&pool.nodes[0], block, Parallelism::Sequential)
            .await
            .unwrap();
        let object_id = receipt.object_id;
        let holder = pool.node(&receipt.stored_on[0].id);
        let root = pool.root_of(&object_id);

        // Every backpointer at the root lapses.
        root.publishers().expire_at(now_secs() + 1_000_000).await;
        assert!(root.publishers().get_publishers(&object_id).is_empty());

        // ACT
        let sweep = PublishDaemon::new(holder.clone())
            .publish_now()
            .await
            .unwrap();

        // ASSERT
        assert_eq!(sweep.removed, 0);
        assert!(holder.store().contains(&object_id));
        let records = root.publishers().get_publishers(&object_id);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].publisher.id, holder.id());
        assert!(records[0].seconds_until_expired(now_secs()) > 0);
    }

    #[tokio::test]
    async fn test_expire_sweep_drops_stale_records() {
        // ARRANGE
        let pool = TestPool::new(2);
        let node = pool.nodes[0].clone();
        let now = now_secs();
        node.publishers()
            .update(record(ObjectId::random(), address(9000), now - 1))
            .await;
        node.publishers()
            .update(record(ObjectId::random(), address(9000), now + 600))
            .await;
        let daemon = PublishDaemon::new(node.clone());

        // ACT
        let expired = daemon.expire_now().await;

        // ASSERT
        assert_eq!(expired, Some(1));
        assert_eq!(node.publishers().record_count(), 1);
        let stats = daemon.stats();
        assert_eq!(stats.expire_cycles, 1);
        assert_eq!(stats.records_expired, 1);
        assert_eq!(stats.skipped_cycles, 0);
    }

    #[tokio::test]
    async fn test_expire_cycle_is_skipped_while_one_runs() {
        // ARRANGE: the running sweep stalls on a held record set.
        let pool = TestPool::new(1);
        let node = pool.nodes[0].clone();
        let object_id = ObjectId::random();
        node.publishers()
            .update(record(object_id, address(9000), now_secs() - 1))
            .await;
        let (guard, _) = node.publishers().get_publishers_and_lock(object_id).await;
        let daemon = PublishDaemon::new(node.clone());
        let running = {
            let daemon = daemon.clone();
            tokio::spawn(async move { daemon.expire_now().await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;

        // ACT
        let overlapping = daemon.expire_now().await;

        // ASSERT
        assert_eq!(overlapping, None);
        assert_eq!(daemon.stats().skipped_cycles, 1);

        drop(guard);
        assert_eq!(running.await.unwrap(), Some(1));
        let stats = daemon.stats();
        assert_eq!(stats.expire_cycles, 1);
        assert_eq!(stats.records_expired, 1);
    }

    #[tokio::test]
    async fn test_publish_cycle_is_skipped_while_one_runs() {
        // ARRANGE: the running sweep sleeps after each object.
        let config = PoolConfig {
            publish_object_interstitial_sleep_millis: 300,
            ..test_config()
        };
        let pool = TestPool::with_config(2, config);
        let block = pool
            .blocks
            .create_block(0, b"slow sweep".to_vec(), Some(ObjectId::random()), 3600, 1)
            .unwrap();
        let receipt = pool
            .blocks
            .store(&pool.nodes[0], block, Parallelism::Sequential)
            .await
            .unwrap();
        let holder = pool.node(&receipt.stored_on[0].id);
        let daemon = PublishDaemon::new(holder);
        let running = {
            let daemon = daemon.clone();
            tokio::spawn(async move { daemon.publish_now().await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;

        // ACT
        let overlapping = daemon.publish_now().await;

        // ASSERT
        assert_eq!(overlapping, None);
        let first = running.await.unwrap().unwrap();
        assert_eq!(first.examined, 1);
        let stats = daemon.stats();
        assert_eq!(stats.publish_cycles, 1);
        assert_eq!(stats.skipped_cycles, 1);
    }

    #[tokio::test]
    async fn test_start_with_zero_periods_spawns_nothing() {
        let pool = TestPool::new(1);
        let daemon = PublishDaemon::new(pool.nodes[0].clone());

        let handles = daemon.start();

        assert!(handles.is_empty());
    }
}
