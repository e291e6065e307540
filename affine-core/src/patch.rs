//! Exact-substring edits against the rendered markdown of a document.
//!
//! Only the top-level blocks whose rendered lines overlap the match are
//! replaced; everything else in the tree keeps its identity.

use affine_types::BlockId;
use serde::Serialize;
use tracing::debug;

use crate::error::{CoreError, Result};
use crate::markdown::render::renders_blank;
use crate::markdown::{insert_parsed, parse, render, BlockLineRange, Rendered};
use crate::tree::BlockTree;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PatchOutcome {
    /// Every removed block, descendants included.
    pub removed: Vec<BlockId>,
    /// Every created block, parents before children.
    pub created: Vec<BlockId>,
}

/// Byte offset of the start of every line in `text`.
fn line_starts(text: &str) -> Vec<usize> {
    std::iter::once(0)
        .chain(text.match_indices('\n').map(|(i, _)| i + 1))
        .collect()
}

fn line_of(starts: &[usize], offset: usize) -> usize {
    match starts.binary_search(&offset) {
        Ok(line) => line,
        Err(next) => next - 1,
    }
}

/// Locate the single occurrence of `old` and return its byte span.
fn unique_match(markdown: &str, old: &str) -> Result<(usize, usize)> {
    if old.is_empty() {
        return Err(CoreError::not_found("text", ""));
    }
    let mut hits = markdown.match_indices(old).map(|(i, _)| i);
    let Some(start) = hits.next() else {
        return Err(CoreError::not_found("text", old));
    };
    let extra = hits.count();
    if extra > 0 {
        return Err(CoreError::AmbiguousMatch { count: extra + 1 });
    }
    Ok((start, start + old.len()))
}

/// Replace the unique occurrence of `old` in the rendered document with
/// `new`, rebuilding only the affected top-level blocks.
///
/// The tree is left untouched on every error path.
pub fn patch(tree: &mut BlockTree, title: &str, old: &str, new: &str) -> Result<PatchOutcome> {
    let Rendered { markdown, ranges } = render(tree, title);
    let (start, end) = unique_match(&markdown, old)?;

    let starts = line_starts(&markdown);
    let start_line = line_of(&starts, start);
    let last_char = markdown[start..end]
        .char_indices()
        .last()
        .map_or(start, |(i, _)| start + i);
    let end_line = line_of(&starts, last_char);

    if start_line < Rendered::title_lines(title) {
        return Err(CoreError::TitleOnlyChange);
    }

    // Blank blocks share a neighbour's line and are never part of a match.
    let affected: Vec<&BlockLineRange> = ranges
        .iter()
        .filter(|r| r.start_line <= end_line && r.end_line >= start_line)
        .filter(|r| tree.get(&r.block_id).is_some_and(|b| !renders_blank(tree, b)))
        .collect();
    let (Some(first), Some(last)) = (affected.first(), affected.last()) else {
        return Err(CoreError::TitleOnlyChange);
    };

    let first_line = first.start_line.min(start_line);
    let last_line = last.end_line.max(end_line);
    let region_start = starts[first_line];
    let region_end = starts
        .get(last_line + 1)
        .map_or(markdown.len(), |next| next - 1)
        .max(end);

    let mut region = String::with_capacity(region_end - region_start + new.len());
    region.push_str(&markdown[region_start..start]);
    region.push_str(new);
    region.push_str(&markdown[end..region_end]);

    let anchor = first.block_id.clone();
    let parent = tree
        .parent_of(&anchor)
        .cloned()
        .ok_or_else(|| CoreError::not_found("block", anchor.as_str()))?;
    let index = tree
        .child_index(&parent, &anchor)
        .ok_or_else(|| CoreError::not_found("block", anchor.as_str()))?;

    debug!(
        first_line,
        last_line,
        blocks = affected.len(),
        "patch region selected"
    );

    let forest = parse(&region);
    let targets: Vec<BlockId> = affected.iter().map(|r| r.block_id.clone()).collect();
    let mut outcome = PatchOutcome::default();
    for id in &targets {
        outcome.removed.extend(tree.remove_subtree(id)?);
    }
    outcome.created = insert_parsed(tree, &parent, index, forest)?;
    Ok(outcome)
}
