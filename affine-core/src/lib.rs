//! # affine-core
//!
//! Document logic for AFFiNE workspaces on top of `yrs`.
//!
//! This crate materializes a document's block tree, converts it to and from
//! markdown, applies surgical text patches, and maintains the folder and page
//! hierarchies that live in sibling documents. It performs no I/O; callers
//! hand in a [`yrs::Doc`] and ship the resulting updates themselves.

pub mod block;
pub mod error;
pub mod flavour;
pub mod folders;
pub mod fractional;
pub mod markdown;
pub mod patch;
pub mod rich_text;
pub mod store;
pub mod tree;
pub mod workspace;

pub use block::{create_block, Block, BlockInput, BlockProps, BlockUpdate, TableData};
pub use error::{CoreError, Result};
pub use flavour::{BlockType, Flavour, ListStyle, ParagraphType};
pub use folders::{EntryType, FolderEntry, FolderOp, FolderTree, FOLDERS_DOC_ID};
pub use fractional::{index_between, n_indices_between};
pub use markdown::{render, BlockLineRange, Rendered};
pub use patch::{patch, PatchOutcome};
pub use rich_text::{AttrValue, Mark, RichText, TextRun};
pub use store::{commit, load_tree, scaffold_doc, DocMeta};
pub use tree::{BlockTree, Placement};
pub use workspace::PageMeta;
