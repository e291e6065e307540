//! Shared types for affine-blocks
//!
//! This crate provides the identifier newtypes used across the workspace,
//! plus the block-level change events recorded while a document tree is
//! being edited.

use std::fmt;

use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::{Deserialize, Serialize};

/// Length of generated block ids.
const BLOCK_ID_LEN: usize = 10;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(id: &str) -> Self {
                Self(id.to_string())
            }
        }

        impl From<String> for $name {
            fn from(id: String) -> Self {
                Self(id)
            }
        }
    };
}

string_id! {
    /// Document identifier (also the CRDT doc guid on the sync server)
    DocId
}

string_id! {
    /// Workspace identifier; the workspace root doc shares this id
    WorkspaceId
}

string_id! {
    /// Block identifier, unique within one document
    BlockId
}

impl BlockId {
    /// Generate a fresh random block id.
    pub fn generate() -> Self {
        Self(random_id(BLOCK_ID_LEN))
    }
}

impl DocId {
    /// Generate a fresh random document id.
    pub fn generate() -> Self {
        Self(random_id(BLOCK_ID_LEN))
    }
}

/// Random alphanumeric string of the given length.
pub fn random_id(len: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

/// Block-level change recorded by the tree model and replayed into the CRDT.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum BlockChange {
    /// A new block (with its props and children list) must be written
    Created(BlockId),

    /// A block was removed from the document
    Removed(BlockId),

    /// The ordered children of a block changed
    ChildrenChanged(BlockId),

    /// Props (including the rich-text field) of a block changed
    PropsChanged(BlockId),
}

impl BlockChange {
    pub fn block_id(&self) -> &BlockId {
        match self {
            BlockChange::Created(id)
            | BlockChange::Removed(id)
            | BlockChange::ChildrenChanged(id)
            | BlockChange::PropsChanged(id) => id,
        }
    }
}
