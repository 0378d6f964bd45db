//! Collapses a merged record stream into the live key-value pairs.

use super::Record;

/// Yields one `(key, value)` per key from a `(key ASC, LSN DESC)` stream.
///
/// The first record seen for a key is its newest version; it wins and
/// every older version is skipped. Keys whose newest version is a
/// tombstone produce nothing.
pub struct VisibilityFilter<I>
where
    I: Iterator<Item = Record>,
{
    input: I,
    current_key: Option<Vec<u8>>,
}

impl<I> VisibilityFilter<I>
where
    I: Iterator<Item = Record>,
{
    pub fn new(input: I) -> Self {
        Self {
            input,
            current_key: None,
        }
    }
}

impl<I> Iterator for VisibilityFilter<I>
where
    I: Iterator<Item = Record>,
{
    type Item = (Vec<u8>, Vec<u8>);

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let record = self.input.next()?;

            if self.current_key.as_deref() == Some(record.key()) {
                continue;
            }

            match record {
                Record::Put { key, value, .. } => {
                    self.current_key = Some(key.clone());
                    return Some((key, value));
                }
                Record::Delete { key, .. } => {
                    self.current_key = Some(key);
                }
            }
        }
    }
}
