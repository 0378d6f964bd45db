//! Torn tails: a crash can cut the file anywhere inside the last frame.
//! Replay must return every complete record before the cut and nothing else.

#[cfg(test)]
mod tests {
    use crate::wal::tests::helpers::*;
    use crate::wal::{Wal, WalError};
    use std::io::{self, Write};
    use tempfile::TempDir;

    #[test]
    fn cut_anywhere_in_last_frame_recovers_prefix() {
        init_tracing();
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("000001.log");
        let offsets = write_records(&path, 3);
        let (start, end) = (offsets[2], offsets[3]);

        let bytes = std::fs::read(&path).unwrap();

        for cut in start + 1..end {
            std::fs::write(&path, &bytes[..cut as usize]).unwrap();

            let wal: Wal<TestRecord> = Wal::open(&path, None).unwrap();
            let recovered = wal.recover().unwrap();
            assert_eq!(recovered, vec![TestRecord::put(0), TestRecord::put(1)], "cut at {cut}");
            assert_eq!(wal.file_size().unwrap(), start);
        }
    }

    #[test]
    fn truncating_after_n_of_m_recovers_exactly_n() {
        init_tracing();
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("000001.log");
        let offsets = write_records(&path, 20);

        for n in [0usize, 1, 7, 19, 20] {
            let bytes = std::fs::read(&path).unwrap();
            set_file_len(&path, offsets[n]);

            let wal: Wal<TestRecord> = Wal::open(&path, None).unwrap();
            let recovered = wal.recover().unwrap();
            let expected: Vec<_> = (0..n as u64).map(TestRecord::put).collect();
            assert_eq!(recovered, expected);
            drop(wal);

            std::fs::write(&path, &bytes).unwrap();
        }
    }

    #[test]
    fn partial_length_prefix_is_reported_by_iterator() {
        init_tracing();
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("000001.log");
        let offsets = write_records(&path, 2);
        set_file_len(&path, offsets[1] + 2);

        let wal: Wal<TestRecord> = Wal::open(&path, None).unwrap();
        let mut iter = wal.replay_iter().unwrap();
        assert_eq!(iter.next().unwrap().unwrap(), TestRecord::put(0));
        assert!(matches!(iter.next(), Some(Err(WalError::UnexpectedEof))));
        assert_eq!(iter.offset(), offsets[1]);
        assert!(iter.next().is_none());
    }

    #[test]
    fn appends_after_recovery_are_replayable() {
        init_tracing();
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("000001.log");
        let offsets = write_records(&path, 3);
        set_file_len(&path, offsets[3] - 3);

        {
            let wal: Wal<TestRecord> = Wal::open(&path, None).unwrap();
            assert_eq!(wal.recover().unwrap().len(), 2);
            wal.append(&TestRecord::put(42)).unwrap();
        }

        let wal: Wal<TestRecord> = Wal::open(&path, None).unwrap();
        let records = wal.recover().unwrap();
        assert_eq!(
            records,
            vec![TestRecord::put(0), TestRecord::put(1), TestRecord::put(42)]
        );
    }

    /// # Scenario
    /// An append writes half its frame and then fails (disk full), after
    /// which the writer keeps going and acknowledges more records.
    ///
    /// # Expected behavior
    /// The failed append leaves no bytes behind, and every record written
    /// after it is replayed on reopen.
    #[test]
    fn failed_append_leaves_no_partial_frame() {
        init_tracing();
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("000001.log");

        {
            let wal: Wal<TestRecord> = Wal::open(&path, None).unwrap();
            wal.append(&TestRecord::put(0)).unwrap();
            let before = wal.file_size().unwrap();

            let res = wal.append_with(&TestRecord::put(1), |file, frame| {
                file.write_all(&frame[..frame.len() / 2])?;
                Err(io::Error::new(io::ErrorKind::StorageFull, "no space left"))
            });
            assert!(matches!(res, Err(WalError::Io(_))));
            assert_eq!(wal.file_size().unwrap(), before);

            wal.append(&TestRecord::put(2)).unwrap();
            wal.append(&TestRecord::put(3)).unwrap();
        }

        let wal: Wal<TestRecord> = Wal::open(&path, None).unwrap();
        assert_eq!(
            wal.recover().unwrap(),
            vec![TestRecord::put(0), TestRecord::put(2), TestRecord::put(3)]
        );
    }

    /// A failure before any byte is written also leaves the file untouched.
    #[test]
    fn failed_append_without_bytes_is_harmless() {
        init_tracing();
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("000001.log");

        let wal: Wal<TestRecord> = Wal::open(&path, None).unwrap();
        let res = wal.append_with(&TestRecord::put(0), |_, _| Err(io::Error::other("EIO")));
        assert!(matches!(res, Err(WalError::Io(_))));
        assert_eq!(wal.file_size().unwrap(), WAL_DATA_START);

        wal.append(&TestRecord::put(1)).unwrap();
        assert_eq!(collect_iter(&wal).unwrap(), vec![TestRecord::put(1)]);
    }
}
