//! Block tree to markdown, with a line range per top-level block.

use affine_types::BlockId;
use serde::Serialize;

use super::inline::{escape, escape_line_start, render_inline, AFFINE_SCHEME, BLOB_SCHEME};
use crate::block::{Block, BlockProps};
use crate::flavour::{ListStyle, ParagraphType};
use crate::rich_text::RichText;
use crate::tree::BlockTree;

/// Lines (0-based, inclusive) occupied by one top-level block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockLineRange {
    pub block_id: BlockId,
    pub start_line: usize,
    pub end_line: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Rendered {
    pub markdown: String,
    pub ranges: Vec<BlockLineRange>,
}

impl Rendered {
    /// Number of lines taken by the title header, including its blank line.
    pub fn title_lines(title: &str) -> usize {
        if title.trim().is_empty() {
            0
        } else {
            2
        }
    }
}

struct Writer<'t> {
    tree: &'t BlockTree,
    lines: Vec<String>,
}

fn is_list(block: &Block) -> bool {
    matches!(block.props, BlockProps::List { .. })
}

fn is_numbered(block: &Block) -> bool {
    matches!(
        block.props,
        BlockProps::List {
            style: ListStyle::Numbered,
            ..
        }
    )
}

fn one_line(text: &str) -> String {
    text.replace('\n', " ")
}

fn code_fence(body: &str) -> String {
    let mut longest = 0;
    let mut current = 0;
    for c in body.chars() {
        if c == '`' {
            current += 1;
            longest = longest.max(current);
        } else {
            current = 0;
        }
    }
    "`".repeat((longest + 1).max(3))
}

impl<'t> Writer<'t> {
    fn push(&mut self, line: String) {
        self.lines.push(line);
    }

    /// Emit `text` with `first` before its first line and `rest` before the
    /// others.
    fn push_text(&mut self, first: &str, rest: &str, text: &RichText) {
        let rendered = render_inline(text);
        for (i, line) in rendered.split('\n').enumerate() {
            let body = escape_line_start(line);
            if i == 0 {
                self.push(format!("{first}{body}"));
            } else {
                self.push(format!("{rest}{body}"));
            }
        }
    }

    fn table_row(cells: &[RichText]) -> String {
        let cells: Vec<String> = cells
            .iter()
            .map(|c| one_line(&render_inline(c)).replace('|', "\\|"))
            .collect();
        format!("| {} |", cells.join(" | "))
    }

    /// Render `block` at `indent`; `number` is its position in a run of
    /// numbered siblings.
    fn block(&mut self, block: &Block, indent: &str, number: usize) {
        let child_indent = match &block.props {
            BlockProps::Paragraph { kind, text } => {
                match kind {
                    ParagraphType::Text => self.push_text(indent, indent, text),
                    ParagraphType::Quote => {
                        let prefix = format!("{indent}> ");
                        self.push_text(&prefix, &prefix, text)
                    }
                    heading => {
                        let level = heading.heading_level().unwrap_or(1);
                        let line = one_line(&render_inline(text));
                        self.push(format!("{indent}{} {line}", "#".repeat(level)));
                    }
                }
                None
            }
            BlockProps::List {
                style,
                checked,
                text,
                ..
            } => {
                let marker = match style {
                    ListStyle::Numbered => format!("{number}. "),
                    _ => "- ".to_string(),
                };
                let task = match (style, checked) {
                    (ListStyle::Todo, true) => "[x] ",
                    (ListStyle::Todo, false) => "[ ] ",
                    _ => "",
                };
                let nested = format!("{indent}{}", " ".repeat(marker.chars().count()));
                let first = format!("{indent}{marker}{task}");
                if text.is_empty() {
                    self.push(first.trim_end().to_string());
                } else {
                    self.push_text(&first, &nested, text);
                }
                Some(nested)
            }
            BlockProps::Code { language, text, .. } => {
                let body = text.to_plain();
                let fence = code_fence(&body);
                self.push(format!(
                    "{indent}{fence}{}",
                    language.as_deref().unwrap_or_default()
                ));
                if !body.is_empty() {
                    for line in body.split('\n') {
                        self.push(format!("{indent}{line}"));
                    }
                }
                self.push(format!("{indent}{fence}"));
                None
            }
            BlockProps::Divider => {
                self.push(format!("{indent}---"));
                None
            }
            BlockProps::Callout { emoji, text } => {
                let first = if emoji.is_empty() {
                    format!("{indent}> ")
                } else {
                    format!("{indent}> {emoji} ")
                };
                self.push_text(&first, &format!("{indent}> "), text);
                None
            }
            BlockProps::Latex { latex } => {
                self.push(format!("{indent}$${}$$", one_line(latex.trim())));
                None
            }
            BlockProps::Table(table) => {
                let grid = table.to_grid();
                let width = grid.iter().map(Vec::len).max().unwrap_or(0);
                if grid.is_empty() || width == 0 {
                    self.push(format!("{indent}| |"));
                    self.push(format!("{indent}| --- |"));
                } else {
                    self.push(format!("{indent}{}", Self::table_row(&grid[0])));
                    self.push(format!("{indent}|{}", " --- |".repeat(width)));
                    for row in &grid[1..] {
                        self.push(format!("{indent}{}", Self::table_row(row)));
                    }
                }
                None
            }
            BlockProps::Bookmark { url, title, .. } => {
                let label = title.as_deref().filter(|t| !t.is_empty()).unwrap_or(url);
                self.push(format!("{indent}[{}]({url})", escape(&one_line(label))));
                None
            }
            BlockProps::Image {
                source_id, caption, ..
            } => {
                let caption = caption.as_deref().unwrap_or_default();
                self.push(format!(
                    "{indent}![{}]({BLOB_SCHEME}{source_id})",
                    escape(&one_line(caption))
                ));
                None
            }
            BlockProps::Attachment {
                source_id, name, ..
            } => {
                self.push(format!(
                    "{indent}📎 [{}]({BLOB_SCHEME}{source_id})",
                    escape(&one_line(name))
                ));
                None
            }
            BlockProps::UrlEmbed { embed, url, .. } => {
                self.push(format!("{indent}[{}]({url})", embed.label()));
                None
            }
            BlockProps::LinkedDoc { page_id, title, .. } => {
                let label = title.as_deref().filter(|t| !t.is_empty()).unwrap_or(page_id);
                self.push(format!(
                    "{indent}[{}]({AFFINE_SCHEME}{page_id})",
                    escape(&one_line(label))
                ));
                None
            }
            BlockProps::SyncedDoc { page_id } => {
                self.push(format!("{indent}[{page_id}]({AFFINE_SCHEME}{page_id})"));
                None
            }
            BlockProps::EmbedHtml { .. } => {
                self.push(format!("{indent}<!-- affine:embed-html -->"));
                None
            }
            BlockProps::Database { title } => {
                self.push(format!(
                    "{indent}<!-- affine:database {} -->",
                    one_line(&title.to_plain())
                ));
                None
            }
            BlockProps::SurfaceRef { reference, .. } => {
                self.push(format!("{indent}<!-- affine:surface-ref {reference} -->"));
                None
            }
            BlockProps::Frame { title, .. } => {
                self.push(format!(
                    "{indent}<!-- affine:frame {} -->",
                    one_line(&title.to_plain())
                ));
                None
            }
            BlockProps::EdgelessText { .. } => {
                self.push(format!("{indent}<!-- affine:edgeless-text -->"));
                None
            }
            BlockProps::Unknown { flavour } => {
                self.push(format!("{indent}<!-- {flavour} -->"));
                None
            }
            BlockProps::Page { .. } | BlockProps::Surface | BlockProps::Note { .. } => {
                Some(indent.to_string())
            }
        };

        let children = self.tree.children(&block.id);
        if children.is_empty() {
            return;
        }
        match child_indent {
            // List items carry their children as indented continuation.
            Some(nested) if is_list(block) => {
                let mut counter = 0;
                for child in children {
                    counter = if is_numbered(child) { counter + 1 } else { 0 };
                    if !is_list(child) {
                        self.push(String::new());
                    }
                    self.block(child, &nested, counter);
                }
            }
            _ => {
                let mut counter = 0;
                for child in children {
                    counter = if is_numbered(child) { counter + 1 } else { 0 };
                    self.push(String::new());
                    self.block(child, indent, counter);
                }
            }
        }
    }
}

/// Collapse runs of blank lines outside code fences. Returns the kept lines
/// and, for every input line, the index of the output line it maps to.
fn collapse_blank_lines(lines: Vec<String>) -> (Vec<String>, Vec<usize>) {
    let mut out: Vec<String> = Vec::with_capacity(lines.len());
    let mut map = Vec::with_capacity(lines.len());
    let mut fence: Option<String> = None;

    for line in lines {
        let trimmed = line.trim_start();
        let blank = line.trim().is_empty();
        let previous_blank = out.last().is_some_and(|l| l.trim().is_empty());

        if fence.is_none() && blank && (out.is_empty() || previous_blank) {
            map.push(out.len().saturating_sub(1));
            continue;
        }

        match &fence {
            Some(open) if trimmed.starts_with(open.as_str()) && trimmed.trim_matches('`').is_empty() => {
                fence = None;
            }
            None if trimmed.starts_with("```") => {
                let ticks = trimmed.len() - trimmed.trim_start_matches('`').len();
                fence = Some("`".repeat(ticks));
            }
            _ => {}
        }
        map.push(out.len());
        out.push(line);
    }

    while out.last().is_some_and(|l| l.trim().is_empty()) {
        out.pop();
    }
    let last = out.len().saturating_sub(1);
    for target in &mut map {
        *target = (*target).min(last);
    }
    (out, map)
}

/// Whether `block` renders to nothing but blank lines. Such blocks have no
/// line of their own once blank runs are collapsed.
pub fn renders_blank(tree: &BlockTree, block: &Block) -> bool {
    let mut writer = Writer {
        tree,
        lines: Vec::new(),
    };
    writer.block(block, "", 1);
    writer.lines.iter().all(|line| line.trim().is_empty())
}

/// Render the document body under `title`.
pub fn render(tree: &BlockTree, title: &str) -> Rendered {
    let mut writer = Writer {
        tree,
        lines: Vec::new(),
    };
    if !title.trim().is_empty() {
        writer.push(format!("# {}", one_line(title.trim())));
        writer.push(String::new());
    }

    let mut raw_ranges = Vec::new();
    let mut previous: Option<&Block> = None;
    let mut counter = 0;
    for block in tree.top_level_blocks() {
        let joined_list = previous.is_some_and(is_list) && is_list(block);
        if previous.is_some() && !joined_list {
            writer.push(String::new());
        }
        counter = if is_numbered(block) { counter + 1 } else { 0 };

        let start = writer.lines.len();
        writer.block(block, "", counter);
        let end = writer.lines.len().max(start + 1) - 1;
        raw_ranges.push((block.id.clone(), start, end));
        previous = Some(block);
    }

    let (lines, map) = collapse_blank_lines(writer.lines);
    let ranges = raw_ranges
        .into_iter()
        .map(|(block_id, start, end)| BlockLineRange {
            block_id,
            start_line: map.get(start).copied().unwrap_or(0),
            end_line: map.get(end).copied().unwrap_or(0),
        })
        .collect();

    let markdown = if lines.is_empty() {
        String::new()
    } else {
        let mut joined = lines.join("\n");
        joined.push('\n');
        joined
    };
    Rendered { markdown, ranges }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::{create_block, BlockInput, TableData};
    use crate::rich_text::{AttrValue, Mark, TextRun};
    use crate::store::scaffold_doc;
    use crate::tree::Placement;

    fn tree_with(blocks: Vec<BlockProps>) -> BlockTree {
        let mut tree = BlockTree::new();
        scaffold_doc(&mut tree, "").unwrap();
        for props in blocks {
            tree.insert(Block::new(props), &Placement::Default).unwrap();
        }
        tree
    }

    fn bullet(text: &str) -> BlockProps {
        BlockProps::list(ListStyle::Bulleted, false, text.into())
    }

    fn numbered(text: &str) -> BlockProps {
        BlockProps::list(ListStyle::Numbered, false, text.into())
    }

    #[test]
    fn test_heading_scenario() {
        let mut tree = BlockTree::new();
        let input = BlockInput {
            level: Some(2),
            ..BlockInput::new("heading").with_text("Intro")
        };
        tree.insert(create_block(&input, true).unwrap(), &Placement::Default)
            .unwrap();
        assert_eq!(render(&tree, "").markdown, "## Intro\n");
    }

    #[test]
    fn test_title_and_separators() {
        let tree = tree_with(vec![
            BlockProps::paragraph(ParagraphType::Text, "First".into()),
            bullet("a"),
            bullet("b"),
            BlockProps::Divider,
            BlockProps::Latex {
                latex: "E = mc^2".into(),
            },
        ]);
        let rendered = render(&tree, "Notes");
        insta::assert_snapshot!(rendered.markdown, @r"
        # Notes

        First

        - a
        - b

        ---

        $$E = mc^2$$
        ");
        let lines: Vec<(usize, usize)> = rendered
            .ranges
            .iter()
            .map(|r| (r.start_line, r.end_line))
            .collect();
        assert_eq!(lines, vec![(2, 2), (4, 4), (5, 5), (7, 7), (9, 9)]);
    }

    #[test]
    fn test_numbering_resets_and_nests() {
        let mut tree = tree_with(vec![numbered("one"), numbered("two")]);
        let second = tree.top_level_blocks()[1].id.clone();
        for text in ["inner a", "inner b"] {
            tree.insert(
                Block::new(numbered(text)),
                &Placement::Parent {
                    parent: second.clone(),
                    index: None,
                },
            )
            .unwrap();
        }
        tree.insert(
            Block::new(BlockProps::paragraph(ParagraphType::Text, "break".into())),
            &Placement::Default,
        )
        .unwrap();
        tree.insert(Block::new(numbered("again")), &Placement::Default)
            .unwrap();

        insta::assert_snapshot!(render(&tree, "").markdown, @r"
        1. one
        2. two
           1. inner a
           2. inner b

        break

        1. again
        ");
        let ranges = render(&tree, "").ranges;
        assert_eq!((ranges[1].start_line, ranges[1].end_line), (1, 3));
    }

    #[test]
    fn test_todo_code_and_embeds() {
        let tree = tree_with(vec![
            BlockProps::list(ListStyle::Todo, true, "done".into()),
            BlockProps::list(ListStyle::Todo, false, "open".into()),
            BlockProps::code(Some("rust".into()), "fn main() {}".into()),
            BlockProps::Image {
                source_id: "blob1".into(),
                caption: Some("Cat".into()),
                width: None,
                height: None,
            },
            BlockProps::Attachment {
                source_id: "blob2".into(),
                name: "report.pdf".into(),
                size: 10,
                mime: "application/pdf".into(),
                caption: None,
            },
            BlockProps::LinkedDoc {
                page_id: "doc9".into(),
                title: Some("Roadmap".into()),
                caption: None,
            },
        ]);
        insta::assert_snapshot!(render(&tree, "").markdown, @r"
        - [x] done
        - [ ] open

        ```rust
        fn main() {}
        ```

        ![Cat](blob://blob1)

        📎 [report.pdf](blob://blob2)

        [Roadmap](affine://doc9)
        ");
    }

    #[test]
    fn test_table_uses_order_keys() {
        let mut table = TableData::from_grid(vec![
            vec!["h1".into(), "h2".into()],
            vec!["a".into(), "b".into()],
        ])
        .unwrap();
        table.rows.reverse();
        table.columns.reverse();
        let tree = tree_with(vec![BlockProps::Table(table), BlockProps::Table(TableData::default())]);
        insta::assert_snapshot!(render(&tree, "").markdown, @r"
        | h1 | h2 |
        | --- | --- |
        | a | b |

        | |
        | --- |
        ");
    }

    #[test]
    fn test_blank_lines_collapse_and_ranges_follow() {
        let tree = tree_with(vec![
            BlockProps::paragraph(ParagraphType::Text, "a".into()),
            BlockProps::paragraph(ParagraphType::Text, RichText::new()),
            BlockProps::paragraph(ParagraphType::Text, RichText::new()),
            BlockProps::paragraph(ParagraphType::Text, "b".into()),
        ]);
        let rendered = render(&tree, "");
        assert_eq!(rendered.markdown, "a\n\nb\n");
        let last = rendered.ranges.last().unwrap();
        assert_eq!((last.start_line, last.end_line), (2, 2));
        for range in &rendered.ranges {
            assert!(range.end_line < 3);
        }
    }

    #[test]
    fn test_blank_lines_inside_fences_are_kept() {
        let tree = tree_with(vec![BlockProps::code(None, "a\n\n\nb".into())]);
        assert_eq!(render(&tree, "").markdown, "```\na\n\n\nb\n```\n");
    }

    #[test]
    fn test_formatted_runs() {
        let text = RichText::from_runs(vec![
            TextRun::plain("Bold").with(Mark::Bold, AttrValue::Bool(true)),
            TextRun::plain(" and "),
            TextRun::plain("gone").with(Mark::Strike, AttrValue::Bool(true)),
        ]);
        let tree = tree_with(vec![BlockProps::paragraph(ParagraphType::Quote, text)]);
        assert_eq!(render(&tree, "").markdown, "> **Bold** and ~~gone~~\n");
    }
}
