//! Canonical RLP helpers over `alloy-rlp`.
//!
//! Header serialization works on positional byte-string sequences; typed
//! transactions additionally need nested lists, so decoding produces a small
//! recursive item tree.

use crate::{ConsensusError, ConsensusResult};
use alloy_rlp::{Buf, Encodable, Header as RlpHeader};

/// A decoded RLP item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Item {
    Bytes(Vec<u8>),
    List(Vec<Item>),
}

impl Item {
    /// Byte-string payload, or an error naming the field.
    pub fn into_bytes(self, field: &'static str) -> ConsensusResult<Vec<u8>> {
        match self {
            Item::Bytes(bytes) => Ok(bytes),
            Item::List(_) => Err(ConsensusError::Rlp(format!(
                "{field}: expected bytes, got list"
            ))),
        }
    }

    /// List payload, or an error naming the field.
    pub fn into_list(self, field: &'static str) -> ConsensusResult<Vec<Item>> {
        match self {
            Item::List(items) => Ok(items),
            Item::Bytes(_) => Err(ConsensusError::Rlp(format!(
                "{field}: expected list, got bytes"
            ))),
        }
    }
}

/// Decode a complete RLP item, rejecting trailing bytes.
pub fn decode(buf: &[u8]) -> ConsensusResult<Item> {
    let mut cursor = buf;
    let item = decode_one(&mut cursor)?;
    if !cursor.is_empty() {
        return Err(ConsensusError::Rlp(format!(
            "{} trailing bytes after item",
            cursor.len()
        )));
    }
    Ok(item)
}

fn decode_one(buf: &mut &[u8]) -> ConsensusResult<Item> {
    let header =
        RlpHeader::decode(buf).map_err(|e| ConsensusError::Rlp(format!("item header: {e}")))?;
    if buf.len() < header.payload_length {
        return Err(ConsensusError::Rlp("payload shorter than header".into()));
    }
    if header.list {
        let mut payload = &buf[..header.payload_length];
        let mut items = Vec::new();
        while !payload.is_empty() {
            items.push(decode_one(&mut payload)?);
        }
        buf.advance(header.payload_length);
        Ok(Item::List(items))
    } else {
        let bytes = buf[..header.payload_length].to_vec();
        buf.advance(header.payload_length);
        Ok(Item::Bytes(bytes))
    }
}

/// Encode a flat list of byte strings as one RLP list.
pub fn encode_value_list(items: &[Vec<u8>]) -> Vec<u8> {
    let payload_length: usize = items.iter().map(|it| it.as_slice().length()).sum();
    let mut out = Vec::with_capacity(payload_length + 9);
    RlpHeader {
        list: true,
        payload_length,
    }
    .encode(&mut out);
    for item in items {
        item.as_slice().encode(&mut out);
    }
    out
}

/// Encode an arbitrary item tree.
pub fn encode_item(item: &Item) -> Vec<u8> {
    let mut out = Vec::new();
    encode_item_into(item, &mut out);
    out
}

fn encode_item_into(item: &Item, out: &mut Vec<u8>) {
    match item {
        Item::Bytes(bytes) => bytes.as_slice().encode(out),
        Item::List(items) => {
            let payload_length: usize = items.iter().map(item_length).sum();
            RlpHeader {
                list: true,
                payload_length,
            }
            .encode(out);
            for inner in items {
                encode_item_into(inner, out);
            }
        }
    }
}

fn item_length(item: &Item) -> usize {
    match item {
        Item::Bytes(bytes) => bytes.as_slice().length(),
        Item::List(items) => {
            let payload_length: usize = items.iter().map(item_length).sum();
            RlpHeader {
                list: true,
                payload_length,
            }
            .length()
                + payload_length
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flat_list_roundtrip() {
        let items = vec![vec![0x01], vec![], vec![0xab; 40]];
        let encoded = encode_value_list(&items);
        let decoded = decode(&encoded).unwrap();
        match decoded {
            Item::List(list) => {
                assert_eq!(list.len(), 3);
                assert_eq!(list[0], Item::Bytes(vec![0x01]));
                assert_eq!(list[1], Item::Bytes(vec![]));
                assert_eq!(list[2], Item::Bytes(vec![0xab; 40]));
            }
            other => panic!("expected list, got {other:?}"),
        }
    }

    #[test]
    fn test_empty_bytes_encode_as_0x80() {
        let encoded = encode_value_list(&[vec![]]);
        assert_eq!(encoded, vec![0xc1, 0x80]);
    }

    #[test]
    fn test_single_low_byte_is_itself() {
        let encoded = encode_value_list(&[vec![0x01]]);
        assert_eq!(encoded, vec![0xc1, 0x01]);
    }

    #[test]
    fn test_nested_list_roundtrip() {
        let item = Item::List(vec![
            Item::Bytes(vec![0x01, 0x02]),
            Item::List(vec![Item::Bytes(vec![0xff; 21])]),
        ]);
        let encoded = encode_item(&item);
        assert_eq!(decode(&encoded).unwrap(), item);
    }

    #[test]
    fn test_trailing_bytes_rejected() {
        let mut encoded = encode_value_list(&[vec![0x01]]);
        encoded.push(0x00);
        assert!(decode(&encoded).is_err());
    }

    #[test]
    fn test_truncated_payload_rejected() {
        let encoded = encode_value_list(&[vec![0xab; 40]]);
        assert!(decode(&encoded[..10]).is_err());
    }
}
