#[cfg(test)]
mod tests {
    use crate::utils::{
        FailingAfterBulkClient, TestEnv, settings, shard_meta, single_index_manifest, stored,
        write_manifest, write_segment, write_segment_with_corruption,
    };
    use engine_core::coordination::coordinator::{CoordinatorConfig, WorkCoordinator};
    use engine_processing::livedocs::LiveDocs;
    use engine_runtime::error::WorkerError;
    use engine_runtime::worker::MigrationOutcome;
    use std::collections::HashSet;
    use std::sync::Arc;
    use std::time::Duration;
    use tracing_test::traced_test;

    // Scenario: one snapshot, four shards, two workers racing over the shared
    // coordination store.
    // Expected outcome: every document reaches the target exactly once and
    // both workers drain cleanly.
    #[traced_test]
    #[tokio::test]
    async fn two_workers_split_the_snapshot_without_overlap() {
        let env = TestEnv::new();
        let root = env.repo_root().to_path_buf();

        let mut shards = Vec::new();
        let mut expected = HashSet::new();
        for shard in 0..4u32 {
            let docs: Vec<_> = (0..5)
                .map(|n| stored(&format!("s{shard}-d{n}")))
                .collect();
            for doc in &docs {
                expected.insert(doc.id.clone());
            }
            let seg = write_segment(&root, "snap-1", "logs", shard, "seg_a", &docs, None);
            shards.push(shard_meta("logs", shard, 1024, vec![seg]));
        }
        write_manifest(&root, "snap-1", single_index_manifest("logs", shards));

        let first = env.worker(settings("snap-1"));
        let second = env.worker(settings("snap-1"));

        let (a, b) = tokio::join!(
            tokio::spawn(async move { first.run().await }),
            tokio::spawn(async move { second.run().await }),
        );
        assert_eq!(a.unwrap().unwrap(), MigrationOutcome::NoWorkLeft);
        assert_eq!(b.unwrap().unwrap(), MigrationOutcome::NoWorkLeft);

        // Exactly once: no shard was migrated twice, none was missed.
        let ids = env.client.doc_ids();
        assert_eq!(ids.len(), expected.len());
        let unique: HashSet<String> = ids.into_iter().collect();
        assert_eq!(unique, expected);
    }

    // Scenario: the target rejects writes partway through a shard, the first
    // worker dies, and its lease expires.
    // Expected outcome: a later worker re-claims the shard, replays it from
    // the start, and completes it; the target absorbs the duplicates.
    #[traced_test]
    #[tokio::test]
    async fn expired_shard_is_resumed_by_a_later_worker() {
        let env = TestEnv::new();
        let root = env.repo_root().to_path_buf();

        let docs: Vec<_> = (0..25).map(|n| stored(&format!("doc-{n}"))).collect();
        let expected: HashSet<String> = docs.iter().map(|d| d.id.clone()).collect();
        let seg = write_segment(&root, "snap-1", "logs", 0, "seg_a", &docs, None);
        write_manifest(
            &root,
            "snap-1",
            single_index_manifest("logs", vec![shard_meta("logs", 0, 1024, vec![seg])]),
        );

        let mut config = settings("snap-1");
        config.initial_lease_secs = 1;
        config.clock_skew_slack_secs = 0;
        config.max_docs_per_batch = 10;
        config.max_concurrent_batches = 1;

        // First worker: target dies after one accepted batch.
        let flaky = Arc::new(FailingAfterBulkClient::new(env.client.clone(), 1));
        let failed = env.worker_with_client(config.clone(), flaky);
        let err = failed.run().await.unwrap_err();
        assert!(matches!(err, WorkerError::Dispatch(_)));

        // The dead worker's lease must lapse before anyone can take over.
        tokio::time::sleep(Duration::from_millis(1200)).await;

        let rescuer = env.worker(config.clone());
        let outcome = rescuer.run().await.unwrap();
        assert_eq!(outcome, MigrationOutcome::NoWorkLeft);

        // At-least-once across the restart: the full set arrived, possibly
        // with duplicates from the partial first attempt.
        let unique: HashSet<String> = env.client.doc_ids().into_iter().collect();
        assert_eq!(unique, expected);

        let coordinator = WorkCoordinator::new(
            env.store.clone(),
            CoordinatorConfig {
                snapshot: "snap-1".into(),
                initial_lease: config.initial_lease(),
                clock_skew_slack: config.clock_skew_slack(),
            },
        );
        let items = coordinator.list_items().await.unwrap();
        assert_eq!(items.len(), 1);
        assert!(items[0].completed);
        assert_eq!(items[0].attempts, 2);
        // Second claim after an expiry doubles the granted duration.
        assert_eq!(items[0].lease_duration_secs, 2);
    }

    // Scenario: delta run between two generations sharing segments.
    //  - seg_a is shared and had no deletions in the base: nothing to send.
    //  - seg_c is shared, the base had deletions, the current commit dropped
    //    its live-docs file: the base's deleted slots are the delta.
    //  - seg_b exists only in the current generation: all of it is new.
    // Expected outcome: exactly the new/restored documents arrive.
    #[traced_test]
    #[tokio::test]
    async fn delta_run_sends_only_documents_new_since_the_base() {
        let env = TestEnv::new();
        let root = env.repo_root().to_path_buf();

        let a_docs: Vec<_> = (0..4).map(|n| stored(&format!("a-{n}"))).collect();
        let c_docs: Vec<_> = (0..4).map(|n| stored(&format!("c-{n}"))).collect();
        let b_docs: Vec<_> = (0..2).map(|n| stored(&format!("b-{n}"))).collect();

        let base_a = write_segment(&root, "snap-1", "logs", 0, "seg_a", &a_docs, None);
        let base_c_live = LiveDocs::from_iter([0, 2], 4);
        let base_c =
            write_segment(&root, "snap-1", "logs", 0, "seg_c", &c_docs, Some(&base_c_live));
        write_manifest(
            &root,
            "snap-1",
            single_index_manifest(
                "logs",
                vec![shard_meta("logs", 0, 1024, vec![base_a, base_c])],
            ),
        );

        let cur_a = write_segment(&root, "snap-2", "logs", 0, "seg_a", &a_docs, None);
        let cur_c = write_segment(&root, "snap-2", "logs", 0, "seg_c", &c_docs, None);
        let cur_b = write_segment(&root, "snap-2", "logs", 0, "seg_b", &b_docs, None);
        write_manifest(
            &root,
            "snap-2",
            single_index_manifest(
                "logs",
                vec![shard_meta("logs", 0, 1024, vec![cur_a, cur_c, cur_b])],
            ),
        );

        let mut config = settings("snap-2");
        config.base_snapshot = Some("snap-1".into());

        let worker = env.worker(config);
        assert_eq!(worker.run().await.unwrap(), MigrationOutcome::NoWorkLeft);

        let unique: HashSet<String> = env.client.doc_ids().into_iter().collect();
        let expected: HashSet<String> = ["c-1", "c-3", "b-0", "b-1"]
            .into_iter()
            .map(String::from)
            .collect();
        assert_eq!(unique, expected);
    }

    // Scenario: one record in the middle of a segment does not decode.
    // Expected outcome: that document is skipped, the rest of the shard is
    // migrated, and the work item still completes.
    #[traced_test]
    #[tokio::test]
    async fn corrupt_document_is_skipped_without_failing_the_shard() {
        let env = TestEnv::new();
        let root = env.repo_root().to_path_buf();

        let docs: Vec<_> = (0..5).map(|n| stored(&format!("doc-{n}"))).collect();
        let seg = write_segment_with_corruption(&root, "snap-1", "logs", 0, "seg_a", &docs, 2);
        write_manifest(
            &root,
            "snap-1",
            single_index_manifest("logs", vec![shard_meta("logs", 0, 1024, vec![seg])]),
        );

        let worker = env.worker(settings("snap-1"));
        assert_eq!(worker.run().await.unwrap(), MigrationOutcome::NoWorkLeft);

        let unique: HashSet<String> = env.client.doc_ids().into_iter().collect();
        let expected: HashSet<String> = ["doc-0", "doc-1", "doc-3", "doc-4"]
            .into_iter()
            .map(String::from)
            .collect();
        assert_eq!(unique, expected);
        let snapshot = worker.metrics().snapshot();
        assert_eq!(snapshot.shards_completed, 1);
        assert_eq!(snapshot.docs_skipped, 1);
    }

    // Scenario: one shard in the snapshot exceeds the size ceiling.
    // Expected outcome: the other shards are migrated, the oversized one is
    // left untouched and its work item stays incomplete.
    #[traced_test]
    #[tokio::test]
    async fn oversized_shard_is_left_behind_while_the_rest_migrate() {
        let env = TestEnv::new();
        let root = env.repo_root().to_path_buf();

        let small_docs = vec![stored("small-0"), stored("small-1")];
        let small_seg = write_segment(&root, "snap-1", "logs", 0, "seg_a", &small_docs, None);
        let big_docs = vec![stored("big-0")];
        let big_seg = write_segment(&root, "snap-1", "logs", 1, "seg_a", &big_docs, None);
        write_manifest(
            &root,
            "snap-1",
            single_index_manifest(
                "logs",
                vec![
                    shard_meta("logs", 0, 1024, vec![small_seg]),
                    shard_meta("logs", 1, u64::MAX, vec![big_seg]),
                ],
            ),
        );

        let worker = env.worker(settings("snap-1"));
        assert_eq!(worker.run().await.unwrap(), MigrationOutcome::NoWorkLeft);

        let unique: HashSet<String> = env.client.doc_ids().into_iter().collect();
        let expected: HashSet<String> =
            ["small-0", "small-1"].into_iter().map(String::from).collect();
        assert_eq!(unique, expected);

        let snapshot = worker.metrics().snapshot();
        assert_eq!(snapshot.shards_completed, 1);
        assert_eq!(snapshot.failure_count, 1);

        let coordinator = WorkCoordinator::new(
            env.store.clone(),
            CoordinatorConfig {
                snapshot: "snap-1".into(),
                initial_lease: Duration::from_secs(600),
                clock_skew_slack: Duration::from_secs(5),
            },
        );
        let items = coordinator.list_items().await.unwrap();
        let big = items.iter().find(|i| i.id.shard == 1).unwrap();
        assert!(!big.completed);
    }
}
