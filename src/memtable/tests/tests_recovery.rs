#[cfg(test)]
mod tests {
    use crate::memtable::MemtableGetResult;
    use crate::memtable::tests::helpers::*;
    use tempfile::TempDir;

    #[test]
    fn reopen_replays_segment() {
        init_tracing();
        let tmp = TempDir::new().unwrap();
        {
            let mt = open_memtable(tmp.path(), 4096);
            mt.put(b"a".to_vec(), b"1".to_vec(), 1).unwrap();
            mt.put(b"b".to_vec(), b"2".to_vec(), 2).unwrap();
            mt.delete(b"a".to_vec(), 3).unwrap();
        }

        let mt = open_memtable(tmp.path(), 4096);
        assert_eq!(mt.get(b"a").unwrap(), MemtableGetResult::Delete { lsn: 3 });
        assert_eq!(
            mt.get(b"b").unwrap(),
            MemtableGetResult::Put {
                value: b"2".to_vec(),
                lsn: 2
            }
        );
        assert_eq!(mt.max_lsn().unwrap(), 3);
    }

    #[test]
    fn torn_tail_drops_only_last_write() {
        init_tracing();
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("000001.log");
        {
            let mt = open_memtable(tmp.path(), 4096);
            for i in 1..=5u64 {
                mt.put(format!("k{i}").into_bytes(), b"v".to_vec(), i).unwrap();
            }
        }
        let len = std::fs::metadata(&path).unwrap().len();
        let f = std::fs::OpenOptions::new().write(true).open(&path).unwrap();
        f.set_len(len - 2).unwrap();
        drop(f);

        let mt = open_memtable(tmp.path(), 4096);
        assert_eq!(mt.len().unwrap(), 4);
        assert_eq!(mt.get(b"k5").unwrap(), MemtableGetResult::NotFound);
        assert_eq!(mt.max_lsn().unwrap(), 4);

        // The segment stays appendable after the tail was cut.
        mt.put(b"k6".to_vec(), b"v".to_vec(), 6).unwrap();
        drop(mt);
        let mt = open_memtable(tmp.path(), 4096);
        assert_eq!(mt.len().unwrap(), 5);
    }
}
