#[cfg(test)]
mod tests {
    use crate::memtable::MemtableGetResult;
    use crate::memtable::tests::helpers::*;
    use tempfile::TempDir;

    #[test]
    fn put_then_get() {
        init_tracing();
        let tmp = TempDir::new().unwrap();
        let mt = open_memtable(tmp.path(), 4096);

        mt.put(b"k".to_vec(), b"v".to_vec(), 1).unwrap();
        assert_eq!(
            mt.get(b"k").unwrap(),
            MemtableGetResult::Put {
                value: b"v".to_vec(),
                lsn: 1
            }
        );
        assert_eq!(mt.get(b"missing").unwrap(), MemtableGetResult::NotFound);
    }

    #[test]
    fn delete_leaves_tombstone() {
        init_tracing();
        let tmp = TempDir::new().unwrap();
        let mt = open_memtable(tmp.path(), 4096);

        mt.put(b"k".to_vec(), b"v".to_vec(), 1).unwrap();
        mt.delete(b"k".to_vec(), 2).unwrap();
        assert_eq!(mt.get(b"k").unwrap(), MemtableGetResult::Delete { lsn: 2 });
        assert_eq!(mt.len().unwrap(), 1);
    }

    #[test]
    fn newer_lsn_wins_older_is_ignored() {
        init_tracing();
        let tmp = TempDir::new().unwrap();
        let mt = open_memtable(tmp.path(), 4096);

        mt.put(b"k".to_vec(), b"new".to_vec(), 10).unwrap();
        mt.put(b"k".to_vec(), b"old".to_vec(), 5).unwrap();
        assert_eq!(
            mt.get(b"k").unwrap(),
            MemtableGetResult::Put {
                value: b"new".to_vec(),
                lsn: 10
            }
        );
        assert_eq!(mt.max_lsn().unwrap(), 10);
    }

    #[test]
    fn empty_value_is_not_a_tombstone() {
        init_tracing();
        let tmp = TempDir::new().unwrap();
        let mt = open_memtable(tmp.path(), 4096);

        mt.put(b"k".to_vec(), Vec::new(), 1).unwrap();
        assert_eq!(
            mt.get(b"k").unwrap(),
            MemtableGetResult::Put {
                value: Vec::new(),
                lsn: 1
            }
        );
    }

    #[test]
    fn size_tracks_overwrites_and_fills() {
        init_tracing();
        let tmp = TempDir::new().unwrap();
        let mt = open_memtable(tmp.path(), 512);
        assert!(mt.is_empty().unwrap());

        mt.put(b"k".to_vec(), vec![0u8; 100], 1).unwrap();
        let after_first = mt.approximate_size().unwrap();
        mt.put(b"k".to_vec(), vec![0u8; 10], 2).unwrap();
        assert_eq!(mt.approximate_size().unwrap(), after_first - 90);
        assert!(!mt.is_full().unwrap());

        for i in 3..20u64 {
            mt.put(format!("key{i}").into_bytes(), vec![1u8; 64], i).unwrap();
        }
        assert!(mt.is_full().unwrap());
    }

    #[test]
    fn segment_identity() {
        let tmp = TempDir::new().unwrap();
        let mt = open_memtable(tmp.path(), 512);
        assert_eq!(mt.wal_seq(), 1);
        assert_eq!(mt.wal_path(), tmp.path().join("000001.log"));
    }
}
