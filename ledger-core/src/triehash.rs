//! Standalone trie-root computation over an in-memory map
//!
//! Builds the canonical root hash of a key/value set without persisting any
//! node. The stored trie in `ledger-trie` must agree with this for any
//! content, which makes it the test oracle for root correctness.

use std::collections::BTreeMap;

use ethereum_types::H256;
use keccak_hash::keccak;
use rlp::RlpStream;

use crate::nibbles::{bytes_to_nibbles, hex_prefix_encode};

/// Root hash of the trie holding exactly the given key/value pairs.
pub fn trie_root<I, K, V>(input: I) -> H256
where
    I: IntoIterator<Item = (K, V)>,
    K: AsRef<[u8]>,
    V: AsRef<[u8]>,
{
    let map: BTreeMap<Vec<u8>, Vec<u8>> = input
        .into_iter()
        .map(|(key, value)| (bytes_to_nibbles(key.as_ref()), value.as_ref().to_vec()))
        .collect();
    if map.is_empty() {
        return keccak(rlp::NULL_RLP);
    }
    let pairs: Vec<(Vec<u8>, Vec<u8>)> = map.into_iter().collect();
    let mut stream = RlpStream::new();
    build_node(&pairs, 0, &mut stream);
    keccak(stream.out())
}

/// Root hash of a trie keyed by the RLP of each item's index, as used for
/// transaction and receipt roots.
pub fn ordered_trie_root<I, V>(input: I) -> H256
where
    I: IntoIterator<Item = V>,
    V: AsRef<[u8]>,
{
    trie_root(
        input
            .into_iter()
            .enumerate()
            .map(|(index, value)| (rlp::encode(&index).to_vec(), value.as_ref().to_vec())),
    )
}

fn build_node(pairs: &[(Vec<u8>, Vec<u8>)], pre_len: usize, stream: &mut RlpStream) {
    if pairs.is_empty() {
        stream.append_empty_data();
        return;
    }
    if pairs.len() == 1 {
        let (key, value) = &pairs[0];
        stream.begin_list(2);
        stream.append(&hex_prefix_encode(&key[pre_len..], true));
        stream.append(&value.clone());
        return;
    }

    // Longest prefix beyond pre_len shared by every key in the range.
    let first = &pairs[0].0;
    let mut shared = first.len();
    for (key, _) in &pairs[1..] {
        let bound = shared.min(key.len());
        let mut s = pre_len;
        while s < bound && first[s] == key[s] {
            s += 1;
        }
        shared = s;
    }

    if shared > pre_len {
        stream.begin_list(2);
        stream.append(&hex_prefix_encode(&first[pre_len..shared], false));
        build_child(pairs, shared, stream);
    } else {
        stream.begin_list(17);
        let value_here = first.len() == pre_len;
        let mut cursor = usize::from(value_here);
        for slot in 0..16u8 {
            let mut end = cursor;
            while end < pairs.len() && pairs[end].0[pre_len] == slot {
                end += 1;
            }
            if cursor == end {
                stream.append_empty_data();
            } else {
                build_child(&pairs[cursor..end], pre_len + 1, stream);
            }
            cursor = end;
        }
        if value_here {
            stream.append(&pairs[0].1.clone());
        } else {
            stream.append_empty_data();
        }
    }
}

fn build_child(pairs: &[(Vec<u8>, Vec<u8>)], pre_len: usize, stream: &mut RlpStream) {
    let mut child = RlpStream::new();
    build_node(pairs, pre_len, &mut child);
    let encoded = child.out();
    if encoded.len() < 32 {
        stream.append_raw(&encoded, 1);
    } else {
        stream.append(&keccak(&encoded));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::EMPTY_TRIE_ROOT;

    #[test]
    fn empty_map_is_canonical_empty_root() {
        assert_eq!(trie_root(Vec::<(Vec<u8>, Vec<u8>)>::new()), EMPTY_TRIE_ROOT);
    }

    #[test]
    fn single_leaf_matches_hand_built_encoding() {
        // [hex_prefix("do", leaf), "verb"] assembled by hand: a 10-byte list.
        let node = [0xc9, 0x83, 0x20, 0x64, 0x6f, 0x84, b'v', b'e', b'r', b'b'];
        assert_eq!(trie_root(vec![(b"do".to_vec(), b"verb".to_vec())]), keccak(node));
    }

    #[test]
    fn insertion_order_is_irrelevant() {
        let pairs = [
            (b"do".to_vec(), b"verb".to_vec()),
            (b"dog".to_vec(), b"puppy".to_vec()),
            (b"doge".to_vec(), b"coin".to_vec()),
        ];
        let forward = trie_root(pairs.clone());
        let mut reversed = pairs.to_vec();
        reversed.reverse();
        assert_eq!(forward, trie_root(reversed));
        let rotated = [pairs[1].clone(), pairs[2].clone(), pairs[0].clone()];
        assert_eq!(forward, trie_root(rotated));
    }

    #[test]
    fn ordered_root_distinguishes_order() {
        let a = ordered_trie_root(vec![b"first".to_vec(), b"second".to_vec()]);
        let b = ordered_trie_root(vec![b"second".to_vec(), b"first".to_vec()]);
        assert_ne!(a, b);
    }

    #[test]
    fn differing_content_differs() {
        let a = trie_root(vec![(b"key".to_vec(), b"one".to_vec())]);
        let b = trie_root(vec![(b"key".to_vec(), b"two".to_vec())]);
        assert_ne!(a, b);
    }
}
