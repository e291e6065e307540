//! Inline formatting: rich-text runs to markdown and back.

use pulldown_cmark::{Event, Tag, TagEnd};

use crate::rich_text::{AttrValue, Mark, RichText, TextRun};

pub const AFFINE_SCHEME: &str = "affine://";
pub const BLOB_SCHEME: &str = "blob://";

/// Escape characters that would otherwise start inline markup.
pub fn escape(text: &str) -> String {
    let chars: Vec<char> = text.chars().collect();
    let mut out = String::with_capacity(text.len());
    for (i, c) in chars.iter().enumerate() {
        match c {
            '\\' | '*' | '`' | '~' | '[' | ']' | '<' => {
                out.push('\\');
                out.push(*c);
            }
            '_' => {
                let before = i > 0 && chars[i - 1].is_alphanumeric();
                let after = chars.get(i + 1).is_some_and(|n| n.is_alphanumeric());
                if !(before && after) {
                    out.push('\\');
                }
                out.push('_');
            }
            _ => out.push(*c),
        }
    }
    out
}

/// Escape a leading character that would turn a line into a block marker.
pub fn escape_line_start(line: &str) -> String {
    let trimmed = line.trim_start();
    let indent = &line[..line.len() - trimmed.len()];
    let needs = match trimmed.chars().next() {
        Some('#') | Some('>') | Some('+') | Some('-') | Some('=') | Some('|') => true,
        Some(c) if c.is_ascii_digit() => {
            let rest = trimmed.trim_start_matches(|c: char| c.is_ascii_digit());
            rest.starts_with(". ") || rest.starts_with(") ") || rest == "." || rest == ")"
        }
        _ => false,
    };
    if !needs {
        return line.to_string();
    }
    match trimmed.chars().next() {
        Some(c) if c.is_ascii_digit() => {
            let digits = trimmed.len() - trimmed.trim_start_matches(|c: char| c.is_ascii_digit()).len();
            format!("{indent}{}\\{}", &trimmed[..digits], &trimmed[digits..])
        }
        _ => format!("{indent}\\{trimmed}"),
    }
}

fn code_span(text: &str) -> String {
    let longest = text
        .split(|c| c != '`')
        .map(str::len)
        .max()
        .unwrap_or(0);
    let fence = "`".repeat(longest + 1);
    if text.starts_with('`') || text.ends_with('`') {
        format!("{fence} {text} {fence}")
    } else {
        format!("{fence}{text}{fence}")
    }
}

fn render_run(run: &TextRun) -> String {
    let code = run.is_active(Mark::Code);
    let (lead, core, trail) = if code {
        ("", run.insert.as_str(), "")
    } else {
        let core = run.insert.trim();
        if core.is_empty() {
            return escape(&run.insert);
        }
        let start = run.insert.len() - run.insert.trim_start().len();
        let end = start + core.len();
        (&run.insert[..start], core, &run.insert[end..])
    };

    let mut out = if code {
        code_span(core)
    } else {
        escape(core)
    };

    if let Some(page_id) = run.reference() {
        out = format!("[{out}]({AFFINE_SCHEME}{page_id})");
    } else if let Some(url) = run.link() {
        out = format!("[{out}]({url})");
    }

    let bold = run.is_active(Mark::Bold);
    let italic = run.is_active(Mark::Italic);
    out = match (bold, italic) {
        (true, true) => format!("***{out}***"),
        (true, false) => format!("**{out}**"),
        (false, true) => format!("*{out}*"),
        (false, false) => out,
    };
    if run.is_active(Mark::Strike) {
        out = format!("~~{out}~~");
    }
    if run.is_active(Mark::Underline) {
        out = format!("<u>{out}</u>");
    }
    format!("{lead}{out}{trail}")
}

/// Serialize formatted text to inline markdown.
pub fn render_inline(text: &RichText) -> String {
    text.runs().iter().map(render_run).collect()
}

/// Accumulates inline events into formatted runs.
#[derive(Debug, Default)]
pub struct InlineBuilder {
    runs: Vec<TextRun>,
    bold: usize,
    italic: usize,
    strike: usize,
    underline: usize,
    links: Vec<String>,
}

impl InlineBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&mut self, text: &str, code: bool) {
        if text.is_empty() {
            return;
        }
        let mut run = TextRun::plain(text);
        if self.bold > 0 {
            run = run.with(Mark::Bold, AttrValue::Bool(true));
        }
        if self.italic > 0 {
            run = run.with(Mark::Italic, AttrValue::Bool(true));
        }
        if self.strike > 0 {
            run = run.with(Mark::Strike, AttrValue::Bool(true));
        }
        if self.underline > 0 {
            run = run.with(Mark::Underline, AttrValue::Bool(true));
        }
        if code {
            run = run.with(Mark::Code, AttrValue::Bool(true));
        }
        if let Some(dest) = self.links.last() {
            run = match dest.strip_prefix(AFFINE_SCHEME) {
                Some(page_id) => run.with(
                    Mark::Reference,
                    AttrValue::Reference {
                        page_id: page_id.to_string(),
                    },
                ),
                None => run.with(Mark::Link, AttrValue::Str(dest.clone())),
            };
        }
        self.runs.push(run);
    }

    /// Feed one event; returns `false` for events that are not inline.
    pub fn feed(&mut self, event: &Event<'_>) -> bool {
        match event {
            Event::Text(text) => self.push(text, false),
            Event::Code(text) => self.push(text, true),
            Event::SoftBreak | Event::HardBreak => self.push("\n", false),
            Event::InlineHtml(html) => match html.trim() {
                "<u>" => self.underline += 1,
                "</u>" => self.underline = self.underline.saturating_sub(1),
                _ => {}
            },
            Event::InlineMath(math) => self.push(&format!("${math}$"), false),
            Event::Start(Tag::Strong) => self.bold += 1,
            Event::End(TagEnd::Strong) => self.bold = self.bold.saturating_sub(1),
            Event::Start(Tag::Emphasis) => self.italic += 1,
            Event::End(TagEnd::Emphasis) => self.italic = self.italic.saturating_sub(1),
            Event::Start(Tag::Strikethrough) => self.strike += 1,
            Event::End(TagEnd::Strikethrough) => self.strike = self.strike.saturating_sub(1),
            Event::Start(Tag::Link { dest_url, .. }) => self.links.push(dest_url.to_string()),
            Event::End(TagEnd::Link) => {
                self.links.pop();
            }
            // Image alt text is carried as plain text inside a paragraph.
            Event::Start(Tag::Image { .. } | Tag::Superscript | Tag::Subscript)
            | Event::End(TagEnd::Image)
            | Event::End(TagEnd::Superscript | TagEnd::Subscript)
            | Event::FootnoteReference(_) => {}
            _ => return false,
        }
        true
    }

    pub fn is_empty(&self) -> bool {
        self.runs.is_empty()
    }

    pub fn finish(self) -> RichText {
        RichText::from_runs(self.runs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pulldown_cmark::{Options, Parser};

    fn parse_inline(markdown: &str) -> RichText {
        let mut builder = InlineBuilder::new();
        for event in Parser::new_ext(markdown, Options::ENABLE_STRIKETHROUGH) {
            builder.feed(&event);
        }
        builder.finish()
    }

    #[test]
    fn test_precedence_order() {
        let text = RichText::from_runs(vec![TextRun::plain("x")
            .with(Mark::Bold, AttrValue::Bool(true))
            .with(Mark::Italic, AttrValue::Bool(true))
            .with(Mark::Strike, AttrValue::Bool(true))
            .with(Mark::Underline, AttrValue::Bool(true))
            .with(Mark::Link, AttrValue::Str("https://a.b".into()))]);
        assert_eq!(render_inline(&text), "<u>~~***[x](https://a.b)***~~</u>");
    }

    #[test]
    fn test_whitespace_stays_outside_markers() {
        let text = RichText::from_runs(vec![
            TextRun::plain("a "),
            TextRun::plain("bold ").with(Mark::Bold, AttrValue::Bool(true)),
            TextRun::plain("tail"),
        ]);
        assert_eq!(render_inline(&text), "a **bold** tail");
    }

    #[test]
    fn test_inline_parse_uses_explicit_nulls() {
        let text = parse_inline("**Bold** normal");
        assert_eq!(text.runs().len(), 2);
        assert_eq!(text.runs()[1].attrs.get(&Mark::Bold), Some(&AttrValue::Null));
    }

    #[test]
    fn test_affine_links_become_references() {
        let text = parse_inline("see [Other](affine://doc42) now");
        assert_eq!(text.runs()[1].reference(), Some("doc42"));
        assert_eq!(render_inline(&text), "see [Other](affine://doc42) now");
    }

    #[test]
    fn test_escaping_round_trips() {
        let raw = "a*b [c] snake_case _x_ `q`";
        let text = parse_inline(&escape(raw));
        assert_eq!(text.to_plain(), raw);
    }

    #[test]
    fn test_line_start_markers_are_escaped() {
        assert_eq!(escape_line_start("# not a heading"), "\\# not a heading");
        assert_eq!(escape_line_start("1. not a list"), "1\\. not a list");
        assert_eq!(escape_line_start("plain"), "plain");
    }

    #[test]
    fn test_code_and_underline() {
        let text = parse_inline("use `x*y` and <u>under</u>");
        let runs = text.runs();
        assert!(runs[1].is_active(Mark::Code));
        assert_eq!(runs[1].insert, "x*y");
        assert!(runs[3].is_active(Mark::Underline));
        assert_eq!(render_inline(&text), "use `x*y` and <u>under</u>");
    }
}
