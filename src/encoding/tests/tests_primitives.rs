//! Integers, bool, fixed arrays, byte vectors and strings.

use crate::encoding::*;

#[test]
fn u32_is_little_endian() {
    let bytes = encode_to_vec(&0xDEAD_BEEFu32).unwrap();
    assert_eq!(bytes, [0xEF, 0xBE, 0xAD, 0xDE]);
    let (decoded, consumed) = decode_from_slice::<u32>(&bytes).unwrap();
    assert_eq!(decoded, 0xDEAD_BEEF);
    assert_eq!(consumed, 4);
}

#[test]
fn u64_is_little_endian() {
    let bytes = encode_to_vec(&0x0102_0304_0506_0708u64).unwrap();
    assert_eq!(bytes, [8, 7, 6, 5, 4, 3, 2, 1]);
    assert_eq!(decode_from_slice::<u64>(&bytes).unwrap(), (0x0102_0304_0506_0708, 8));
}

#[test]
fn short_integer_input_reports_eof() {
    let err = decode_from_slice::<u64>(&[1, 2, 3]).unwrap_err();
    match err {
        EncodingError::UnexpectedEof { needed, available } => {
            assert_eq!(needed, 8);
            assert_eq!(available, 3);
        }
        other => panic!("expected UnexpectedEof, got {other:?}"),
    }
}

#[test]
fn bool_rejects_other_bytes() {
    assert_eq!(decode_from_slice::<bool>(&[0]).unwrap(), (false, 1));
    assert_eq!(decode_from_slice::<bool>(&[1]).unwrap(), (true, 1));
    assert!(matches!(
        decode_from_slice::<bool>(&[2]),
        Err(EncodingError::InvalidBool(2))
    ));
}

#[test]
fn fixed_array_has_no_prefix() {
    let magic = *b"KWAL";
    let bytes = encode_to_vec(&magic).unwrap();
    assert_eq!(bytes, b"KWAL");
    assert_eq!(decode_from_slice::<[u8; 4]>(&bytes).unwrap(), (magic, 4));
}

#[test]
fn byte_vector_is_length_prefixed() {
    let value = b"hello".to_vec();
    let bytes = encode_to_vec(&value).unwrap();
    assert_eq!(&bytes[..4], &5u32.to_le_bytes());
    assert_eq!(&bytes[4..], b"hello");
    assert_eq!(decode_from_slice::<Vec<u8>>(&bytes).unwrap(), (value, 9));
}

#[test]
fn empty_byte_vector() {
    let bytes = encode_to_vec(&Vec::<u8>::new()).unwrap();
    assert_eq!(bytes, [0, 0, 0, 0]);
    assert_eq!(decode_from_slice::<Vec<u8>>(&bytes).unwrap(), (Vec::new(), 4));
}

#[test]
fn truncated_byte_vector_reports_eof() {
    let mut bytes = encode_to_vec(&b"truncated".to_vec()).unwrap();
    bytes.truncate(7);
    assert!(matches!(
        decode_from_slice::<Vec<u8>>(&bytes),
        Err(EncodingError::UnexpectedEof { .. })
    ));
}

#[test]
fn string_rejects_invalid_utf8() {
    let mut bytes = 2u32.to_le_bytes().to_vec();
    bytes.extend_from_slice(&[0xC3, 0x28]);
    assert!(matches!(
        decode_from_slice::<String>(&bytes),
        Err(EncodingError::InvalidUtf8(_))
    ));
}

#[test]
fn decode_reports_consumed_bytes_with_trailing_data() {
    let mut bytes = encode_to_vec(&"ab".to_string()).unwrap();
    bytes.extend_from_slice(b"tail");
    let (s, consumed) = decode_from_slice::<String>(&bytes).unwrap();
    assert_eq!(s, "ab");
    assert_eq!(consumed, 6);
}
