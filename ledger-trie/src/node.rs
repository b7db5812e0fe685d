//! Trie node representation
//!
//! Nodes are a tagged variant over the wire shapes: a 2-item list holding a
//! hex-prefix-encoded partial key plus either a value (leaf) or a child
//! reference (extension), or a 17-item list of sixteen child slots plus an
//! optional value. Children are referenced inline when their encoding is
//! shorter than 32 bytes and by hash otherwise.

use ethereum_types::H256;
use ledger_core::nibbles::{hex_prefix_decode, hex_prefix_encode};
use rlp::{Rlp, RlpStream};

use crate::error::{TrieError, TrieResult};

/// Reference from a node to one of its children.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChildRef {
    /// No child in this slot.
    Empty,
    /// Child embedded as its raw encoding (always shorter than 32 bytes).
    Inline(Vec<u8>),
    /// Child stored in the database under its keccak hash.
    Hash(H256),
}

impl ChildRef {
    pub fn is_empty(&self) -> bool {
        matches!(self, ChildRef::Empty)
    }

    /// Parse a child slot out of a node's item.
    pub fn from_rlp(item: &Rlp) -> TrieResult<ChildRef> {
        if item.is_list() {
            return Ok(ChildRef::Inline(item.as_raw().to_vec()));
        }
        let data = item.data()?;
        match data.len() {
            0 => Ok(ChildRef::Empty),
            32 => Ok(ChildRef::Hash(H256::from_slice(data))),
            _ => Err(TrieError::InvalidNode("child reference is neither empty, inline nor a hash")),
        }
    }

    fn append(&self, stream: &mut RlpStream) {
        match self {
            ChildRef::Empty => {
                stream.append_empty_data();
            }
            ChildRef::Inline(raw) => {
                stream.append_raw(raw, 1);
            }
            ChildRef::Hash(hash) => {
                stream.append(hash);
            }
        }
    }
}

/// Decoded trie node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    Empty,
    Leaf { path: Vec<u8>, value: Vec<u8> },
    Extension { path: Vec<u8>, child: ChildRef },
    Branch { children: Box<[ChildRef; 16]>, value: Option<Vec<u8>> },
}

impl Node {
    /// Branch with no children and no value.
    pub fn empty_branch() -> Node {
        Node::Branch {
            children: Box::new(std::array::from_fn(|_| ChildRef::Empty)),
            value: None,
        }
    }

    /// True for the two-item shapes (leaf and extension).
    pub fn is_pair(&self) -> bool {
        matches!(self, Node::Leaf { .. } | Node::Extension { .. })
    }

    /// Partial key of a pair node.
    pub fn path(&self) -> &[u8] {
        match self {
            Node::Leaf { path, .. } | Node::Extension { path, .. } => path,
            _ => &[],
        }
    }

    /// Decode a node from its stored encoding.
    pub fn decode(bytes: &[u8]) -> TrieResult<Node> {
        if bytes.is_empty() {
            return Ok(Node::Empty);
        }
        let rlp = Rlp::new(bytes);
        if rlp.is_empty() {
            return Ok(Node::Empty);
        }
        if !rlp.is_list() {
            return Err(TrieError::InvalidNode("node is not a list"));
        }
        match rlp.item_count()? {
            2 => {
                let (leaf, path) = hex_prefix_decode(rlp.at(0)?.data()?);
                if leaf {
                    Ok(Node::Leaf {
                        path,
                        value: rlp.at(1)?.data()?.to_vec(),
                    })
                } else {
                    Ok(Node::Extension {
                        path,
                        child: ChildRef::from_rlp(&rlp.at(1)?)?,
                    })
                }
            }
            17 => {
                let mut children: Vec<ChildRef> = Vec::with_capacity(16);
                for i in 0..16 {
                    children.push(ChildRef::from_rlp(&rlp.at(i)?)?);
                }
                let value_item = rlp.at(16)?;
                let value = match value_item.data()? {
                    [] => None,
                    data => Some(data.to_vec()),
                };
                let children: Box<[ChildRef; 16]> =
                    match children.into_boxed_slice().try_into() {
                        Ok(array) => array,
                        Err(_) => return Err(TrieError::InvalidNode("branch slot count")),
                    };
                Ok(Node::Branch { children, value })
            }
            _ => Err(TrieError::InvalidNode("node is neither a pair nor a branch")),
        }
    }

    /// Serialise to the stored encoding.
    pub fn encode(&self) -> Vec<u8> {
        let mut stream = RlpStream::new();
        match self {
            Node::Empty => {
                stream.append_empty_data();
            }
            Node::Leaf { path, value } => {
                stream.begin_list(2);
                stream.append(&hex_prefix_encode(path, true));
                stream.append(&value.clone());
            }
            Node::Extension { path, child } => {
                stream.begin_list(2);
                stream.append(&hex_prefix_encode(path, false));
                child.append(&mut stream);
            }
            Node::Branch { children, value } => {
                stream.begin_list(17);
                for child in children.iter() {
                    child.append(&mut stream);
                }
                match value {
                    Some(value) => stream.append(&value.clone()),
                    None => stream.append_empty_data(),
                };
            }
        }
        stream.out().to_vec()
    }
}
