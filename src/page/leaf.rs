use super::btree_node::NodeBody;
use crate::types::PageId;

/// A B+-tree leaf page: ordered `(key, value)` pairs plus a foster
/// pointer and fences, and the `next_pid`/`prev_pid` sibling links the
/// iterator follows across page boundaries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeafPage {
    pub body: NodeBody,
    pub next_pid: Option<PageId>,
    pub prev_pid: Option<PageId>,
}

impl LeafPage {
    pub fn new() -> Self {
        Self {
            body: NodeBody::new_leaf(),
            next_pid: None,
            prev_pid: None,
        }
    }

    pub fn used_bytes(&self) -> usize {
        self.body.used_bytes() + 18
    }

    pub fn encode(&self) -> Vec<u8> {
        use crate::io::Encodeable;
        let mut buf = self.body.encode();
        buf.extend_from_slice(&self.next_pid.unwrap_or(0).encode());
        buf.extend_from_slice(&self.prev_pid.unwrap_or(0).encode());
        buf.push(self.next_pid.is_some() as u8);
        buf.push(self.prev_pid.is_some() as u8);
        buf
    }

    pub fn decode(bytes: &[u8]) -> std::io::Result<Self> {
        use crate::io::Decodeable;
        let node_len = bytes.len() - 18;
        let body = NodeBody::decode(&bytes[..node_len], false)?;
        let mut cursor = std::io::Cursor::new(&bytes[node_len..]);
        let next_raw = u64::decode_from(&mut cursor)?;
        let prev_raw = u64::decode_from(&mut cursor)?;
        let has_next = u8::decode_from(&mut cursor)?;
        let has_prev = u8::decode_from(&mut cursor)?;
        Ok(Self {
            body,
            next_pid: (has_next == 1).then_some(next_raw),
            prev_pid: (has_prev == 1).then_some(prev_raw),
        })
    }
}

impl Default for LeafPage {
    fn default() -> Self {
        Self::new()
    }
}
