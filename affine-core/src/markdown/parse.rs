//! Markdown to blocks.
//!
//! [`parse`] produces a detached forest of [`ParsedBlock`]s; [`insert_parsed`]
//! attaches it to a tree. Single-paragraph sentinels (latex, attachment,
//! image, internal doc link) are recognised from the paragraph's literal
//! source before it falls back to a plain paragraph.

use std::ops::Range;

use affine_types::BlockId;
use once_cell::sync::Lazy;
use pulldown_cmark::{CodeBlockKind, Event, HeadingLevel, Options, Parser, Tag, TagEnd};
use regex::Regex;

use super::inline::{InlineBuilder, AFFINE_SCHEME, BLOB_SCHEME};
use crate::block::{Block, BlockProps, TableData};
use crate::error::Result;
use crate::flavour::{ListStyle, ParagraphType};
use crate::rich_text::{RichText, TextRun};
use crate::tree::BlockTree;

static LATEX_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)^\$\$(.*)\$\$$").expect("valid latex regex"));
static ATTACHMENT_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^📎\s*\[((?:\\.|[^\]])*)\]\(([^)\s]+)\)$").expect("valid attachment regex")
});
static IMAGE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"^!\[((?:\\.|[^\]])*)\]\(([^)\s]+)(?:\s+"[^"]*")?\)$"#).expect("valid image regex")
});
static DOC_LINK_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\[((?:\\.|[^\]])*)\]\(affine://([^)\s]+)\)$").expect("valid doc link regex")
});
static TASK_PREFIX_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\[([ xX])\]\s+").expect("valid task regex"));

/// A block produced by the parser, not yet attached to a tree.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedBlock {
    pub props: BlockProps,
    pub children: Vec<ParsedBlock>,
}

impl ParsedBlock {
    fn leaf(props: BlockProps) -> Self {
        Self {
            props,
            children: Vec::new(),
        }
    }

    /// Number of blocks in this subtree.
    pub fn count(&self) -> usize {
        1 + self.children.iter().map(ParsedBlock::count).sum::<usize>()
    }
}

fn options() -> Options {
    let mut options = Options::empty();
    options.insert(Options::ENABLE_TABLES);
    options.insert(Options::ENABLE_STRIKETHROUGH);
    options.insert(Options::ENABLE_TASKLISTS);
    options
}

fn unescape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            if let Some(next) = chars.next() {
                out.push(next);
            }
        } else {
            out.push(c);
        }
    }
    out
}

fn strip_blob(url: &str) -> String {
    url.strip_prefix(BLOB_SCHEME).unwrap_or(url).to_string()
}

/// Match the single-paragraph sentinels against a paragraph's source.
fn sentinel(source: &str) -> Option<BlockProps> {
    let source = source.trim();
    if let Some(caps) = LATEX_RE.captures(source) {
        return Some(BlockProps::Latex {
            latex: caps[1].trim().to_string(),
        });
    }
    if let Some(caps) = ATTACHMENT_RE.captures(source) {
        return Some(BlockProps::Attachment {
            source_id: strip_blob(&caps[2]),
            name: unescape(&caps[1]),
            size: 0,
            mime: "application/octet-stream".to_string(),
            caption: None,
        });
    }
    if let Some(caps) = IMAGE_RE.captures(source) {
        let caption = unescape(&caps[1]);
        return Some(BlockProps::Image {
            source_id: strip_blob(&caps[2]),
            caption: Some(caption).filter(|c| !c.is_empty()),
            width: None,
            height: None,
        });
    }
    if let Some(caps) = DOC_LINK_RE.captures(source) {
        let page_id = caps[2].to_string();
        let title = unescape(&caps[1]);
        return Some(BlockProps::LinkedDoc {
            title: Some(title).filter(|t| !t.is_empty() && *t != page_id),
            page_id,
            caption: None,
        });
    }
    None
}

/// Strip a literal `[ ]` / `[x]` prefix from item text.
fn strip_task_prefix(text: &RichText) -> Option<(bool, RichText)> {
    let first = text.runs().first()?;
    let caps = TASK_PREFIX_RE.captures(&first.insert)?;
    let checked = !caps[1].trim().is_empty();
    let prefix_len = caps[0].len();

    let mut runs: Vec<TextRun> = text.runs().to_vec();
    runs[0].insert = runs[0].insert[prefix_len..].to_string();
    Some((checked, RichText::from_runs(runs)))
}

fn is_block_start(tag: &Tag<'_>) -> bool {
    matches!(
        tag,
        Tag::Paragraph
            | Tag::Heading { .. }
            | Tag::BlockQuote(_)
            | Tag::CodeBlock(_)
            | Tag::HtmlBlock
            | Tag::List(_)
            | Tag::Item
            | Tag::FootnoteDefinition(_)
            | Tag::Table(_)
            | Tag::MetadataBlock(_)
            | Tag::DefinitionList
    )
}

fn heading_level(level: HeadingLevel) -> i64 {
    level as i64
}

struct BlockParser<'a> {
    source: &'a str,
    events: Vec<(Event<'a>, Range<usize>)>,
    pos: usize,
}

impl<'a> BlockParser<'a> {
    fn new(source: &'a str) -> Self {
        let events = Parser::new_ext(source, options())
            .into_offset_iter()
            .collect();
        Self {
            source,
            events,
            pos: 0,
        }
    }

    fn peek(&self) -> Option<&Event<'a>> {
        self.events.get(self.pos).map(|(event, _)| event)
    }

    fn next(&mut self) -> Option<(Event<'a>, Range<usize>)> {
        let item = self.events.get(self.pos).cloned();
        if item.is_some() {
            self.pos += 1;
        }
        item
    }

    /// Skip the remainder of a container whose start was just consumed.
    fn skip_container(&mut self) {
        let mut depth = 1usize;
        while let Some((event, _)) = self.next() {
            match event {
                Event::Start(_) => depth += 1,
                Event::End(_) => {
                    depth -= 1;
                    if depth == 0 {
                        return;
                    }
                }
                _ => {}
            }
        }
    }

    /// Consume inline events up to (and including) the end of the current
    /// container.
    fn inline_until_end(&mut self) -> RichText {
        let mut builder = InlineBuilder::new();
        while let Some((event, _)) = self.next() {
            match event {
                Event::End(
                    TagEnd::Paragraph
                    | TagEnd::Heading(_)
                    | TagEnd::TableCell
                    | TagEnd::Item,
                ) => break,
                other => {
                    builder.feed(&other);
                }
            }
        }
        builder.finish()
    }

    /// Consume inline events of a tight list item, stopping before the first
    /// nested block or the end of the item.
    fn inline_tight(&mut self) -> RichText {
        let mut builder = InlineBuilder::new();
        while let Some(event) = self.peek() {
            let stop = match event {
                Event::Start(tag) => is_block_start(tag),
                Event::End(TagEnd::Item) | Event::Rule | Event::Html(_) => true,
                _ => false,
            };
            if stop {
                break;
            }
            if let Some((event, _)) = self.next() {
                builder.feed(&event);
            }
        }
        builder.finish()
    }

    /// Parse blocks until the end of the enclosing container (or input).
    fn blocks(&mut self, in_quote: bool) -> Vec<ParsedBlock> {
        let mut out = Vec::new();
        while let Some((event, range)) = self.next() {
            match event {
                Event::End(_) => break,
                Event::Start(tag) => {
                    if let Some(block) = self.block(tag, range, in_quote) {
                        out.extend(block);
                    }
                }
                Event::Rule => out.push(ParsedBlock::leaf(BlockProps::Divider)),
                Event::Text(text) if !text.trim().is_empty() => {
                    out.push(ParsedBlock::leaf(BlockProps::paragraph(
                        ParagraphType::Text,
                        RichText::plain(text.to_string()),
                    )));
                }
                _ => {}
            }
        }
        out
    }

    fn block(
        &mut self,
        tag: Tag<'a>,
        range: Range<usize>,
        in_quote: bool,
    ) -> Option<Vec<ParsedBlock>> {
        let parsed = match tag {
            Tag::Paragraph => {
                let literal = self.source.get(range).unwrap_or_default();
                if let Some(props) = sentinel(literal) {
                    self.skip_container();
                    vec![ParsedBlock::leaf(props)]
                } else {
                    let text = self.inline_until_end();
                    let kind = if in_quote {
                        ParagraphType::Quote
                    } else {
                        ParagraphType::Text
                    };
                    vec![ParsedBlock::leaf(BlockProps::paragraph(kind, text))]
                }
            }
            Tag::Heading { level, .. } => {
                let text = self.inline_until_end();
                vec![ParsedBlock::leaf(BlockProps::paragraph(
                    ParagraphType::heading(heading_level(level)),
                    text,
                ))]
            }
            Tag::BlockQuote(_) => self.blocks(true),
            Tag::CodeBlock(kind) => {
                let language = match kind {
                    CodeBlockKind::Fenced(info) => info
                        .split_whitespace()
                        .next()
                        .map(str::to_string)
                        .filter(|l| !l.is_empty()),
                    CodeBlockKind::Indented => None,
                };
                let mut body = String::new();
                while let Some((event, _)) = self.next() {
                    match event {
                        Event::Text(text) => body.push_str(&text),
                        Event::End(_) => break,
                        _ => {}
                    }
                }
                if body.ends_with('\n') {
                    body.pop();
                }
                vec![ParsedBlock::leaf(BlockProps::code(
                    language,
                    RichText::plain(body),
                ))]
            }
            Tag::List(start) => self.list(start.is_some()),
            Tag::Table(_) => vec![self.table()],
            _ => {
                self.skip_container();
                return None;
            }
        };
        Some(parsed)
    }

    fn list(&mut self, ordered: bool) -> Vec<ParsedBlock> {
        let mut items = Vec::new();
        while let Some((event, _)) = self.next() {
            match event {
                Event::Start(Tag::Item) => items.push(self.item(ordered)),
                Event::End(_) => break,
                Event::Start(_) => self.skip_container(),
                _ => {}
            }
        }
        items
    }

    fn item(&mut self, ordered: bool) -> ParsedBlock {
        let mut checked: Option<bool> = None;
        let mut text: Option<RichText> = None;
        let mut children = Vec::new();

        loop {
            let Some(event) = self.peek() else {
                break;
            };
            match event {
                Event::TaskListMarker(done) => {
                    checked = Some(*done);
                    self.pos += 1;
                }
                Event::End(TagEnd::Item) => {
                    self.pos += 1;
                    break;
                }
                Event::End(_) => break,
                Event::Start(Tag::Paragraph) if text.is_none() => {
                    self.pos += 1;
                    text = Some(self.inline_until_end());
                }
                Event::Start(tag) if is_block_start(tag) => {
                    if let Some((Event::Start(tag), range)) = self.next() {
                        if let Some(blocks) = self.block(tag, range, false) {
                            children.extend(blocks);
                        }
                    }
                }
                Event::Rule => {
                    self.pos += 1;
                    children.push(ParsedBlock::leaf(BlockProps::Divider));
                }
                Event::Html(_) => self.pos += 1,
                _ if text.is_none() => text = Some(self.inline_tight()),
                _ => {
                    // Stray inline content after nested blocks.
                    let extra = self.inline_tight();
                    if !extra.is_empty() {
                        children.push(ParsedBlock::leaf(BlockProps::paragraph(
                            ParagraphType::Text,
                            extra,
                        )));
                    }
                }
            }
        }

        let mut text = text.unwrap_or_default();
        if checked.is_none() {
            if let Some((done, stripped)) = strip_task_prefix(&text) {
                checked = Some(done);
                text = stripped;
            }
        }
        let style = match (checked, ordered) {
            (Some(_), _) => ListStyle::Todo,
            (None, true) => ListStyle::Numbered,
            (None, false) => ListStyle::Bulleted,
        };
        ParsedBlock {
            props: BlockProps::list(style, checked.unwrap_or(false), text),
            children,
        }
    }

    fn table(&mut self) -> ParsedBlock {
        let mut grid: Vec<Vec<RichText>> = Vec::new();
        let mut row: Vec<RichText> = Vec::new();
        while let Some((event, _)) = self.next() {
            match event {
                Event::Start(Tag::TableHead | Tag::TableRow) => row = Vec::new(),
                Event::Start(Tag::TableCell) => row.push(self.inline_until_end()),
                Event::End(TagEnd::TableHead | TagEnd::TableRow) => {
                    grid.push(std::mem::take(&mut row))
                }
                Event::End(TagEnd::Table) => break,
                _ => {}
            }
        }
        let width = grid.iter().map(Vec::len).max().unwrap_or(0);
        for row in &mut grid {
            row.resize_with(width, RichText::new);
        }
        let table = TableData::from_grid(grid).unwrap_or_default();
        ParsedBlock::leaf(BlockProps::Table(table))
    }
}

/// Parse markdown into a detached block forest. Unknown constructs are
/// skipped.
pub fn parse(markdown: &str) -> Vec<ParsedBlock> {
    let mut parser = BlockParser::new(markdown);
    let mut out = Vec::new();
    while parser.pos < parser.events.len() {
        out.extend(parser.blocks(false));
    }
    out
}

/// Attach a parsed forest under `parent` starting at `index`. Returns the
/// ids of every created block, parents before children.
pub fn insert_parsed(
    tree: &mut BlockTree,
    parent: &BlockId,
    index: usize,
    forest: Vec<ParsedBlock>,
) -> Result<Vec<BlockId>> {
    let mut created = Vec::new();
    for (offset, parsed) in forest.into_iter().enumerate() {
        insert_one(tree, parent, index + offset, parsed, &mut created)?;
    }
    Ok(created)
}

fn insert_one(
    tree: &mut BlockTree,
    parent: &BlockId,
    index: usize,
    parsed: ParsedBlock,
    created: &mut Vec<BlockId>,
) -> Result<()> {
    let id = tree.insert_at(parent, index, Block::new(parsed.props))?;
    created.push(id.clone());
    for (offset, child) in parsed.children.into_iter().enumerate() {
        insert_one(tree, &id, offset, child, created)?;
    }
    Ok(())
}
