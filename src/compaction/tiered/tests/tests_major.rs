#[cfg(test)]
mod tests {
    use crate::compaction::tiered::tests::helpers::*;
    use crate::compaction::{CompactionStrategyType, execute};
    use crate::engine::utils::Record;
    use crate::manifest::Manifest;
    use tempfile::TempDir;

    #[test]
    fn empty_tree_has_nothing_to_do() {
        let major = CompactionStrategyType::Tiered.major();
        assert!(major.pick(&[], &config(4, 32)).is_none());
    }

    #[test]
    fn output_goes_to_deepest_level() {
        init_tracing();
        let tmp = TempDir::new().unwrap();
        let m = Manifest::open(tmp.path().join("manifest")).unwrap();
        let runs = vec![
            tiny_run(tmp.path(), &m, 1, 0, 1),
            tiny_run(tmp.path(), &m, 2, 3, 2),
        ];

        let task = CompactionStrategyType::Tiered
            .major()
            .pick(&runs, &config(4, 32))
            .unwrap();
        assert_eq!(task.output_level, 3);
        assert_eq!(task.horizon, u64::MAX);
        assert_eq!(task.inputs.len(), 2);

        let runs = vec![tiny_run(tmp.path(), &m, 3, 0, 3), tiny_run(tmp.path(), &m, 4, 0, 4)];
        let task = CompactionStrategyType::Tiered
            .major()
            .pick(&runs, &config(4, 32))
            .unwrap();
        assert_eq!(task.output_level, 1);
    }

    /// # Scenario
    /// Running a major compaction twice changes nothing the second time.
    ///
    /// # Expected behavior
    /// The first run merges and drops the tombstone; the single clean
    /// output is then not selected again.
    #[test]
    fn major_compaction_is_idempotent() {
        init_tracing();
        let tmp = TempDir::new().unwrap();
        let m = Manifest::open(tmp.path().join("manifest")).unwrap();
        let runs = vec![
            make_run(tmp.path(), &m, 2, 0, vec![Record::delete("a", 3), Record::put("b", "2", 4)]),
            make_run(tmp.path(), &m, 1, 0, vec![Record::put("a", "1", 1), Record::put("c", "3", 2)]),
        ];

        let major = CompactionStrategyType::Tiered.major();
        let task = major.pick(&runs, &config(4, 32)).unwrap();
        let outcome = execute(&task, &m, tmp.path(), 0).unwrap();
        let output = outcome.output.unwrap();

        assert_eq!(
            collect(&output),
            vec![
                (b"b".to_vec(), Some(b"2".to_vec()), 4),
                (b"c".to_vec(), Some(b"3".to_vec()), 2),
            ]
        );
        assert_eq!(output.properties.tombstone_count, 0);
        assert!(major.pick(&[output], &config(4, 32)).is_none());
    }

    #[test]
    fn single_run_with_tombstones_is_rewritten() {
        init_tracing();
        let tmp = TempDir::new().unwrap();
        let m = Manifest::open(tmp.path().join("manifest")).unwrap();
        let runs = vec![make_run(
            tmp.path(),
            &m,
            1,
            0,
            vec![Record::put("a", "1", 1), Record::delete("b", 2)],
        )];

        let task = CompactionStrategyType::Tiered
            .major()
            .pick(&runs, &config(4, 32))
            .unwrap();
        let output = execute(&task, &m, tmp.path(), 0).unwrap().output.unwrap();
        assert_eq!(collect(&output), vec![(b"a".to_vec(), Some(b"1".to_vec()), 1)]);
    }
}
