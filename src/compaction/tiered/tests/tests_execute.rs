//! Merge semantics and atomic installation of compaction results.

#[cfg(test)]
mod tests {
    use crate::compaction::tiered::tests::helpers::*;
    use crate::compaction::{CompactionTask, execute};
    use crate::engine::utils::Record;
    use crate::manifest::{Manifest, ManifestSstEntry};
    use crate::sstable::sstable_file_name;
    use std::io::{Seek, SeekFrom, Write};
    use tempfile::TempDir;

    fn task(inputs: Vec<std::sync::Arc<crate::sstable::SSTable>>, horizon: u64) -> CompactionTask {
        CompactionTask {
            inputs,
            output_level: 1,
            horizon,
            kind: "test",
        }
    }

    #[test]
    fn newest_version_wins() {
        init_tracing();
        let tmp = TempDir::new().unwrap();
        let m = Manifest::open(tmp.path().join("manifest")).unwrap();
        let old = make_run(tmp.path(), &m, 1, 0, vec![Record::put("k", "old", 1), Record::put("x", "1", 2)]);
        let new = make_run(tmp.path(), &m, 2, 0, vec![Record::put("k", "new", 5)]);

        let outcome = execute(&task(vec![new, old], u64::MAX), &m, tmp.path(), 0).unwrap();
        let output = outcome.output.unwrap();
        assert_eq!(
            collect(&output),
            vec![
                (b"k".to_vec(), Some(b"new".to_vec()), 5),
                (b"x".to_vec(), Some(b"1".to_vec()), 2),
            ]
        );
        assert_eq!(output.level, 1);
        assert_eq!(outcome.removed_ids, vec![2, 1]);
        assert_eq!(
            m.get_sstables().unwrap(),
            vec![ManifestSstEntry {
                id: output.id,
                level: 1
            }]
        );
    }

    /// # Scenario
    /// An older run outside the merge still holds `k`. The tombstone that
    /// shadows it must survive the merge.
    #[test]
    fn tombstone_kept_above_horizon() {
        init_tracing();
        let tmp = TempDir::new().unwrap();
        let m = Manifest::open(tmp.path().join("manifest")).unwrap();
        let _outside = make_run(tmp.path(), &m, 1, 1, vec![Record::put("k", "v", 1)]);
        let a = make_run(tmp.path(), &m, 2, 0, vec![Record::delete("k", 10)]);
        let b = make_run(tmp.path(), &m, 3, 0, vec![Record::put("z", "z", 11)]);

        let output = execute(&task(vec![b, a], 1), &m, tmp.path(), 0)
            .unwrap()
            .output
            .unwrap();
        assert_eq!(
            collect(&output),
            vec![(b"k".to_vec(), None, 10), (b"z".to_vec(), Some(b"z".to_vec()), 11)]
        );
    }

    #[test]
    fn tombstone_dropped_below_horizon() {
        init_tracing();
        let tmp = TempDir::new().unwrap();
        let m = Manifest::open(tmp.path().join("manifest")).unwrap();
        let a = make_run(tmp.path(), &m, 1, 0, vec![Record::put("k", "v", 1), Record::delete("q", 3)]);
        let b = make_run(tmp.path(), &m, 2, 0, vec![Record::delete("k", 4)]);

        let outcome = execute(&task(vec![b, a], 50), &m, tmp.path(), 0).unwrap();
        assert!(outcome.output.is_none(), "everything was deleted");
        assert!(m.get_sstables().unwrap().is_empty());
    }

    /// # Scenario
    /// One input has a damaged data block on disk.
    ///
    /// # Expected behavior
    /// The compaction fails, the manifest still lists the inputs and no
    /// output file is left behind.
    #[test]
    fn failed_merge_leaves_prior_state() {
        init_tracing();
        let tmp = TempDir::new().unwrap();
        let m = Manifest::open(tmp.path().join("manifest")).unwrap();
        let a = make_run(tmp.path(), &m, 1, 0, vec![Record::put("a", "1", 1)]);
        let b = make_run(tmp.path(), &m, 2, 0, vec![Record::put("b", "2", 2)]);
        let before = m.get_sstables().unwrap();

        {
            let mut f = std::fs::OpenOptions::new()
                .write(true)
                .open(tmp.path().join(sstable_file_name(1)))
                .unwrap();
            // Inside the first data block body: header (12) + length (4).
            f.seek(SeekFrom::Start(12 + 4 + 2)).unwrap();
            f.write_all(&[0xAB, 0xCD]).unwrap();
            f.sync_all().unwrap();
        }

        let next_id = m.peek_next_sst_id().unwrap();
        assert!(execute(&task(vec![b, a], u64::MAX), &m, tmp.path(), 0).is_err());
        assert_eq!(m.get_sstables().unwrap(), before);
        assert!(!tmp.path().join(sstable_file_name(next_id)).exists());
    }
}
