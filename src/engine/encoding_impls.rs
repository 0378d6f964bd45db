//! Wire encoding of [`Record`], used by the memtable log segments.

use super::utils::Record;
use crate::encoding::{Decode, Encode, EncodingError};

const TAG_PUT: u32 = 0;
const TAG_DELETE: u32 = 1;

impl Encode for Record {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        match self {
            Record::Put { key, value, lsn } => {
                TAG_PUT.encode_to(buf)?;
                key.encode_to(buf)?;
                value.encode_to(buf)?;
                lsn.encode_to(buf)
            }
            Record::Delete { key, lsn } => {
                TAG_DELETE.encode_to(buf)?;
                key.encode_to(buf)?;
                lsn.encode_to(buf)
            }
        }
    }
}

impl Decode for Record {
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        let (tag, mut offset) = u32::decode_from(buf)?;
        let (key, n) = Vec::<u8>::decode_from(&buf[offset..])?;
        offset += n;
        match tag {
            TAG_PUT => {
                let (value, n) = Vec::<u8>::decode_from(&buf[offset..])?;
                offset += n;
                let (lsn, n) = u64::decode_from(&buf[offset..])?;
                offset += n;
                Ok((Record::Put { key, value, lsn }, offset))
            }
            TAG_DELETE => {
                let (lsn, n) = u64::decode_from(&buf[offset..])?;
                offset += n;
                Ok((Record::Delete { key, lsn }, offset))
            }
            other => Err(EncodingError::InvalidTag {
                tag: other,
                type_name: "Record",
            }),
        }
    }
}
