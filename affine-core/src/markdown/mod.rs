//! Markdown view of a block tree.
//!
//! The dialect is CommonMark with GFM tables, strikethrough and task lists,
//! plus single-line forms for latex (`$$…$$`), attachments (`📎 [name](…)`),
//! images and internal doc links (`affine://`).

pub mod inline;
pub mod parse;
pub mod render;

pub use parse::{insert_parsed, parse, ParsedBlock};
pub use render::{render, BlockLineRange, Rendered};

use crate::error::Result;
use crate::tree::BlockTree;

/// Parse `markdown` and append the blocks to the end of the first note.
pub fn append_markdown(tree: &mut BlockTree, markdown: &str) -> Result<Vec<affine_types::BlockId>> {
    let forest = parse(markdown);
    if forest.is_empty() {
        return Ok(Vec::new());
    }
    let note = tree.ensure_note()?;
    let index = tree.children(&note).len();
    insert_parsed(tree, &note, index, forest)
}
