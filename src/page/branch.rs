use super::btree_node::NodeBody;

/// A B+-tree branch (internal) page: the same slotted node body as a
/// leaf, but payloads are child page ids and `lowest_page` carries the
/// child for keys below `entries[0].0`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BranchPage {
    pub body: NodeBody,
}

impl BranchPage {
    pub fn new(lowest_page: crate::types::PageId) -> Self {
        Self {
            body: NodeBody::new_branch(lowest_page),
        }
    }

    pub fn used_bytes(&self) -> usize {
        self.body.used_bytes()
    }

    pub fn encode(&self) -> Vec<u8> {
        self.body.encode()
    }

    pub fn decode(bytes: &[u8]) -> std::io::Result<Self> {
        Ok(Self {
            body: NodeBody::decode(bytes, true)?,
        })
    }
}
