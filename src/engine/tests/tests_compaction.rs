//! Engine-level compaction: level movement, tombstone handling and
//! idempotence.

#[cfg(test)]
#[allow(non_snake_case)]
mod tests {
    use crate::engine::tests::helpers::*;
    use tempfile::TempDir;

    fn flush_one(engine: &crate::engine::Engine, k: &str, v: Option<&str>) {
        match v {
            Some(v) => engine.put(k.as_bytes().to_vec(), v.as_bytes().to_vec()).unwrap(),
            None => engine.delete(k.as_bytes().to_vec()).unwrap(),
        };
        engine.flush().unwrap();
    }

    #[test]
    fn sstable__minor_moves_runs_down_a_level() {
        let tmp = TempDir::new().unwrap();
        let engine = open(tmp.path(), eager_compaction_config());

        assert!(!engine.minor_compact().unwrap());
        flush_one(&engine, "a", Some("1"));
        assert!(!engine.minor_compact().unwrap());
        flush_one(&engine, "b", Some("2"));

        assert!(engine.minor_compact().unwrap());
        let stats = engine.stats().unwrap();
        assert_eq!(stats.sstables_count, 1);
        assert_eq!(stats.levels.get(&1), Some(&1));
        assert_eq!(scan_all(&engine, None, None), vec![kv("a", "1"), kv("b", "2")]);
    }

    /// # Scenario
    /// `a` lives in a level-1 run. A tombstone for `a` is merged by a minor
    /// compaction of level 0 that does not include the level-1 run.
    ///
    /// # Expected behavior
    /// The tombstone survives, so `a` stays deleted. A later major
    /// compaction removes both.
    #[test]
    fn sstable__minor_keeps_needed_tombstone() {
        let tmp = TempDir::new().unwrap();
        let engine = open(tmp.path(), eager_compaction_config());

        flush_one(&engine, "a", Some("1"));
        flush_one(&engine, "x", Some("x"));
        assert!(engine.minor_compact().unwrap());

        flush_one(&engine, "a", None);
        flush_one(&engine, "y", Some("y"));
        assert!(engine.minor_compact().unwrap());

        let stats = engine.stats().unwrap();
        assert_eq!(stats.levels.get(&1), Some(&2));
        assert_eq!(engine.get(b"a").unwrap(), None);
        assert_eq!(scan_all(&engine, None, None), vec![kv("x", "x"), kv("y", "y")]);

        assert!(engine.major_compact().unwrap());
        assert_eq!(engine.stats().unwrap().sstables_count, 1);
        assert_eq!(engine.get(b"a").unwrap(), None);
        assert_eq!(scan_all(&engine, None, None), vec![kv("x", "x"), kv("y", "y")]);
    }

    #[test]
    fn sstable__major_is_idempotent() {
        let tmp = TempDir::new().unwrap();
        let engine = open(tmp.path(), small_buffer_config());
        put_range(&engine, 0..300);
        for i in (0..300).step_by(2) {
            engine.delete(key(i)).unwrap();
        }
        engine.flush().unwrap();

        let before = scan_all(&engine, None, None);
        assert!(engine.major_compact().unwrap());
        let after_first = scan_all(&engine, None, None);
        assert!(!engine.major_compact().unwrap());
        let after_second = scan_all(&engine, None, None);

        assert_eq!(before.len(), 150);
        assert_eq!(before, after_first);
        assert_eq!(after_first, after_second);
        assert_eq!(engine.stats().unwrap().sstables_count, 1);
        assert_eq!(
            std::fs::read_dir(tmp.path().join("sstables")).unwrap().count(),
            1,
            "input files removed"
        );
    }

    #[test]
    fn sstable__compaction_survives_reopen() {
        let tmp = TempDir::new().unwrap();
        {
            let engine = open(tmp.path(), eager_compaction_config());
            put_range(&engine, 0..200);
            engine.flush().unwrap();
            while engine.minor_compact().unwrap() {}
            engine.close().unwrap();
        }

        let engine = open(tmp.path(), eager_compaction_config());
        let stats = engine.stats().unwrap();
        assert!(stats.levels.keys().any(|&level| level > 0));
        for i in 0..200 {
            assert_eq!(engine.get(&key(i)).unwrap(), Some(value(i)), "key {i}");
        }
    }
}
