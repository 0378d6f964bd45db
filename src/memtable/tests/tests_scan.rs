#[cfg(test)]
mod tests {
    use crate::engine::utils::Record;
    use crate::memtable::tests::helpers::*;
    use tempfile::TempDir;

    fn keys(records: &[Record]) -> Vec<&[u8]> {
        records.iter().map(Record::key).collect()
    }

    #[test]
    fn range_is_half_open_and_sorted() {
        init_tracing();
        let tmp = TempDir::new().unwrap();
        let mt = open_memtable(tmp.path(), 1 << 20);
        for (i, k) in ["d", "a", "c", "b", "e"].iter().enumerate() {
            mt.put(k.as_bytes().to_vec(), b"v".to_vec(), i as u64 + 1).unwrap();
        }

        let r = mt.range(Some(&b"b"[..]), Some(&b"d"[..])).unwrap();
        assert_eq!(keys(&r), vec![b"b".as_slice(), b"c"]);

        let r = mt.range(None, Some(&b"c"[..])).unwrap();
        assert_eq!(keys(&r), vec![b"a".as_slice(), b"b"]);

        let r = mt.range(Some(&b"d"[..]), None).unwrap();
        assert_eq!(keys(&r), vec![b"d".as_slice(), b"e"]);

        assert_eq!(mt.records().unwrap().len(), 5);
    }

    #[test]
    fn range_includes_tombstones() {
        init_tracing();
        let tmp = TempDir::new().unwrap();
        let mt = open_memtable(tmp.path(), 1 << 20);
        mt.put(b"a".to_vec(), b"1".to_vec(), 1).unwrap();
        mt.delete(b"a".to_vec(), 2).unwrap();

        let r = mt.range(None, None).unwrap();
        assert_eq!(r.len(), 1);
        assert!(r[0].is_delete());
        assert_eq!(r[0].lsn(), 2);
    }

    #[test]
    fn empty_or_inverted_range_is_empty() {
        init_tracing();
        let tmp = TempDir::new().unwrap();
        let mt = open_memtable(tmp.path(), 1 << 20);
        mt.put(b"m".to_vec(), b"v".to_vec(), 1).unwrap();

        assert!(mt.range(Some(&b"m"[..]), Some(&b"m"[..])).unwrap().is_empty());
        assert!(mt.range(Some(&b"z"[..]), Some(&b"a"[..])).unwrap().is_empty());
    }

    #[test]
    fn range_is_a_snapshot_copy() {
        init_tracing();
        let tmp = TempDir::new().unwrap();
        let mt = open_memtable(tmp.path(), 1 << 20);
        mt.put(b"a".to_vec(), b"1".to_vec(), 1).unwrap();

        let snapshot = mt.range(None, None).unwrap();
        mt.put(b"b".to_vec(), b"2".to_vec(), 2).unwrap();
        assert_eq!(snapshot.len(), 1);
    }
}
