//! Catalog lifecycle: fresh state, each event kind, and recovery by
//! replaying the event log after a crash (drop without checkpoint).

#[cfg(test)]
mod tests {
    use crate::manifest::tests::helpers::*;
    use std::fs::OpenOptions;
    use tempfile::TempDir;

    #[test]
    fn fresh_manifest_defaults() {
        init_tracing();
        let temp = TempDir::new().unwrap();
        let m = open_manifest(&temp);

        assert_eq!(m.get_active_wal().unwrap(), 0);
        assert!(m.get_frozen_wals().unwrap().is_empty());
        assert!(m.get_sstables().unwrap().is_empty());
        assert_eq!(m.get_last_lsn().unwrap(), 0);
        assert_eq!(m.peek_next_sst_id().unwrap(), 1);
        assert!(!m.is_dirty().unwrap());
    }

    #[test]
    fn rotate_then_flush_moves_segment_to_run() {
        init_tracing();
        let temp = TempDir::new().unwrap();
        let m = open_manifest(&temp);

        m.rotate_wal(0, 1).unwrap();
        m.rotate_wal(1, 2).unwrap();
        assert_eq!(m.get_active_wal().unwrap(), 2);
        assert_eq!(m.get_frozen_wals().unwrap(), vec![0, 1]);

        let id = m.allocate_sst_id().unwrap();
        m.record_flush(Some(run(id, 0)), 0, 42).unwrap();
        assert_eq!(m.get_frozen_wals().unwrap(), vec![1]);
        assert_eq!(m.get_sstables().unwrap(), vec![run(id, 0)]);
        assert_eq!(m.get_last_lsn().unwrap(), 42);

        // Flushing an empty segment releases it without adding a run.
        m.record_flush(None, 1, 40).unwrap();
        assert!(m.get_frozen_wals().unwrap().is_empty());
        assert_eq!(m.get_sstables().unwrap().len(), 1);
        assert_eq!(m.get_last_lsn().unwrap(), 42, "LSN never goes backwards");
        assert!(m.is_dirty().unwrap());
    }

    #[test]
    fn compaction_swaps_runs_in_one_step() {
        init_tracing();
        let temp = TempDir::new().unwrap();
        let m = open_manifest(&temp);

        for id in 1..=4 {
            m.record_flush(Some(run(id, 0)), 0, id).unwrap();
        }
        m.apply_compaction(vec![run(5, 1)], vec![1, 2, 3]).unwrap();

        let levels = m.levels().unwrap();
        assert_eq!(levels[&0], vec![run(4, 0)]);
        assert_eq!(levels[&1], vec![run(5, 1)]);
        assert_eq!(m.peek_next_sst_id().unwrap(), 6);
    }

    #[test]
    fn allocated_ids_are_monotonic_across_reopen() {
        init_tracing();
        let temp = TempDir::new().unwrap();
        {
            let m = open_manifest(&temp);
            assert_eq!(m.allocate_sst_id().unwrap(), 1);
            assert_eq!(m.allocate_sst_id().unwrap(), 2);
        }
        let m = open_manifest(&temp);
        assert_eq!(m.allocate_sst_id().unwrap(), 3);
    }

    #[test]
    fn crash_recovery_replays_events() {
        init_tracing();
        let temp = TempDir::new().unwrap();
        {
            let m = open_manifest(&temp);
            m.rotate_wal(0, 1).unwrap();
            m.record_flush(Some(run(1, 0)), 0, 10).unwrap();
            m.update_lsn(17).unwrap();
        }

        let m = open_manifest(&temp);
        assert_eq!(m.get_active_wal().unwrap(), 1);
        assert!(m.get_frozen_wals().unwrap().is_empty());
        assert_eq!(m.get_sstables().unwrap(), vec![run(1, 0)]);
        assert_eq!(m.get_last_lsn().unwrap(), 17);
    }

    #[test]
    fn torn_event_at_tail_is_discarded() {
        init_tracing();
        let temp = TempDir::new().unwrap();
        {
            let m = open_manifest(&temp);
            m.record_flush(Some(run(1, 0)), 0, 1).unwrap();
            m.apply_compaction(vec![run(2, 1)], vec![1]).unwrap();
        }

        // Cut the last event in half.
        let log = temp.path().join("000000.log");
        let len = std::fs::metadata(&log).unwrap().len();
        let f = OpenOptions::new().write(true).open(&log).unwrap();
        f.set_len(len - 5).unwrap();
        drop(f);

        let m = open_manifest(&temp);
        assert_eq!(m.get_sstables().unwrap(), vec![run(1, 0)]);
    }
}
