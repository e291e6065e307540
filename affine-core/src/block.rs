//! Blocks and their flavour-specific props.
//!
//! Callers describe a block with a flat [`BlockInput`] (the shape that arrives
//! over JSON). [`BlockProps::from_input`] turns it into the typed union, which
//! only holds the fields legal for its flavour; what remains to be checked at
//! runtime is irrelevant fields (strict mode), closed style names, numeric
//! ranges and URL syntax.

use std::collections::BTreeMap;

use affine_types::BlockId;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};
use crate::flavour::{BlockType, BookmarkStyle, Flavour, ListStyle, ParagraphType, UrlEmbed};
use crate::fractional::n_indices_between;
use crate::rich_text::RichText;

pub const DEFAULT_NOTE_XYWH: &str = "[0,0,800,95]";
pub const DEFAULT_NOTE_BACKGROUND: &str = "--affine-note-background-white";
pub const DEFAULT_FRAME_XYWH: &str = "[0,0,400,300]";
pub const DEFAULT_CALLOUT_EMOJI: &str = "💡";

static URL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z][A-Za-z0-9+.\-]*://[^\s/?#]+[^\s]*$").expect("valid URL regex")
});

/// Check that a URL is syntactically usable (scheme + authority).
pub fn validate_url(url: &str) -> Result<()> {
    if URL_RE.is_match(url.trim()) {
        Ok(())
    } else {
        Err(CoreError::validation(format!("invalid URL: {url:?}")))
    }
}

/// Row or column of a table, ordered by its fractional `order` key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableAxis {
    pub id: String,
    pub order: String,
}

/// Flattened table storage: rows, columns and `row:column` keyed cells.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableData {
    pub rows: Vec<TableAxis>,
    pub columns: Vec<TableAxis>,
    pub cells: BTreeMap<String, RichText>,
}

impl TableData {
    pub fn cell_key(row: &str, column: &str) -> String {
        format!("{row}:{column}")
    }

    /// Build a table from a grid of cells; short rows are padded.
    pub fn from_grid(grid: Vec<Vec<RichText>>) -> Result<Self> {
        let width = grid.iter().map(Vec::len).max().unwrap_or(0);
        let row_orders = n_indices_between(None, None, grid.len())?;
        let column_orders = n_indices_between(None, None, width)?;

        let rows: Vec<TableAxis> = row_orders
            .into_iter()
            .map(|order| TableAxis {
                id: BlockId::generate().0,
                order,
            })
            .collect();
        let columns: Vec<TableAxis> = column_orders
            .into_iter()
            .map(|order| TableAxis {
                id: BlockId::generate().0,
                order,
            })
            .collect();

        let mut cells = BTreeMap::new();
        for (row, values) in rows.iter().zip(grid) {
            let mut values = values.into_iter();
            for column in &columns {
                let value = values.next().unwrap_or_default();
                cells.insert(Self::cell_key(&row.id, &column.id), value);
            }
        }

        Ok(Self {
            rows,
            columns,
            cells,
        })
    }

    /// Cells in display order (rows and columns sorted by order key).
    pub fn to_grid(&self) -> Vec<Vec<RichText>> {
        let mut rows: Vec<&TableAxis> = self.rows.iter().collect();
        rows.sort_by(|a, b| a.order.cmp(&b.order).then_with(|| a.id.cmp(&b.id)));
        let mut columns: Vec<&TableAxis> = self.columns.iter().collect();
        columns.sort_by(|a, b| a.order.cmp(&b.order).then_with(|| a.id.cmp(&b.id)));

        rows.iter()
            .map(|row| {
                columns
                    .iter()
                    .map(|col| {
                        self.cells
                            .get(&Self::cell_key(&row.id, &col.id))
                            .cloned()
                            .unwrap_or_default()
                    })
                    .collect()
            })
            .collect()
    }
}

/// Flavour-specific block props.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BlockProps {
    Page {
        title: RichText,
    },
    Surface,
    Note {
        xywh: String,
        background: String,
        index: String,
        hidden: bool,
        display_mode: String,
    },
    Paragraph {
        #[serde(rename = "type")]
        kind: ParagraphType,
        text: RichText,
    },
    List {
        style: ListStyle,
        checked: bool,
        collapsed: bool,
        text: RichText,
    },
    Code {
        language: Option<String>,
        wrap: bool,
        caption: Option<String>,
        text: RichText,
    },
    Divider,
    Callout {
        emoji: String,
        text: RichText,
    },
    Latex {
        latex: String,
    },
    Table(TableData),
    Bookmark {
        url: String,
        style: BookmarkStyle,
        title: Option<String>,
        description: Option<String>,
        caption: Option<String>,
    },
    Image {
        source_id: String,
        caption: Option<String>,
        width: Option<f64>,
        height: Option<f64>,
    },
    Attachment {
        source_id: String,
        name: String,
        size: u64,
        mime: String,
        caption: Option<String>,
    },
    UrlEmbed {
        embed: UrlEmbed,
        url: String,
        caption: Option<String>,
    },
    EmbedHtml {
        html: String,
    },
    LinkedDoc {
        page_id: String,
        title: Option<String>,
        caption: Option<String>,
    },
    SyncedDoc {
        page_id: String,
    },
    Database {
        title: RichText,
    },
    SurfaceRef {
        reference: String,
        ref_flavour: String,
        caption: Option<String>,
    },
    Frame {
        title: RichText,
        xywh: String,
        background: String,
    },
    EdgelessText {
        xywh: String,
    },
    /// Flavour this crate does not model; kept so the tree stays intact.
    Unknown {
        flavour: String,
    },
}

impl BlockProps {
    pub fn flavour(&self) -> Option<Flavour> {
        let flavour = match self {
            BlockProps::Page { .. } => Flavour::Page,
            BlockProps::Surface => Flavour::Surface,
            BlockProps::Note { .. } => Flavour::Note,
            BlockProps::Paragraph { .. } => Flavour::Paragraph,
            BlockProps::List { .. } => Flavour::List,
            BlockProps::Code { .. } => Flavour::Code,
            BlockProps::Divider => Flavour::Divider,
            BlockProps::Callout { .. } => Flavour::Callout,
            BlockProps::Latex { .. } => Flavour::Latex,
            BlockProps::Table(_) => Flavour::Table,
            BlockProps::Bookmark { .. } => Flavour::Bookmark,
            BlockProps::Image { .. } => Flavour::Image,
            BlockProps::Attachment { .. } => Flavour::Attachment,
            BlockProps::UrlEmbed { embed, .. } => embed.flavour(),
            BlockProps::EmbedHtml { .. } => Flavour::EmbedHtml,
            BlockProps::LinkedDoc { .. } => Flavour::EmbedLinkedDoc,
            BlockProps::SyncedDoc { .. } => Flavour::EmbedSyncedDoc,
            BlockProps::Database { .. } => Flavour::Database,
            BlockProps::SurfaceRef { .. } => Flavour::SurfaceRef,
            BlockProps::Frame { .. } => Flavour::Frame,
            BlockProps::EdgelessText { .. } => Flavour::EdgelessText,
            BlockProps::Unknown { .. } => return None,
        };
        Some(flavour)
    }

    pub fn flavour_name(&self) -> &str {
        match self {
            BlockProps::Unknown { flavour } => flavour,
            other => other.flavour().map(|f| f.as_str()).unwrap_or_default(),
        }
    }

    /// The rich-text `prop:text` field, for flavours that have one.
    pub fn text(&self) -> Option<&RichText> {
        match self {
            BlockProps::Paragraph { text, .. }
            | BlockProps::List { text, .. }
            | BlockProps::Code { text, .. }
            | BlockProps::Callout { text, .. } => Some(text),
            _ => None,
        }
    }

    pub fn text_mut(&mut self) -> Option<&mut RichText> {
        match self {
            BlockProps::Paragraph { text, .. }
            | BlockProps::List { text, .. }
            | BlockProps::Code { text, .. }
            | BlockProps::Callout { text, .. } => Some(text),
            _ => None,
        }
    }

    pub fn paragraph(kind: ParagraphType, text: RichText) -> Self {
        BlockProps::Paragraph { kind, text }
    }

    pub fn list(style: ListStyle, checked: bool, text: RichText) -> Self {
        BlockProps::List {
            style,
            checked,
            collapsed: false,
            text,
        }
    }

    pub fn code(language: Option<String>, text: RichText) -> Self {
        BlockProps::Code {
            language,
            wrap: false,
            caption: None,
            text,
        }
    }

    pub fn note(index: impl Into<String>) -> Self {
        BlockProps::Note {
            xywh: DEFAULT_NOTE_XYWH.to_string(),
            background: DEFAULT_NOTE_BACKGROUND.to_string(),
            index: index.into(),
            hidden: false,
            display_mode: "both".to_string(),
        }
    }

    /// Normalize caller input into typed props.
    ///
    /// In strict mode any field irrelevant to the resolved type is an error;
    /// otherwise such fields are ignored.
    pub fn from_input(input: &BlockInput, strict: bool) -> Result<Self> {
        let block_type = BlockType::parse(&input.block_type)?;
        let resolved_style = match block_type {
            BlockType::List { style: Some(style) } => Some(style),
            BlockType::List { style: None } => Some(match input.style.as_deref() {
                None => ListStyle::Bulleted,
                Some(name) => ListStyle::from_str(name).ok_or_else(|| {
                    CoreError::validation(format!(
                        "invalid list style {name:?}; expected bulleted, numbered, todo or toggle"
                    ))
                })?,
            }),
            _ => None,
        };

        let allowed = allowed_fields(block_type, resolved_style);
        let unexpected: Vec<&str> = input
            .present_fields()
            .into_iter()
            .filter(|field| !allowed.contains(field))
            .collect();
        if strict && !unexpected.is_empty() {
            return Err(CoreError::validation(format!(
                "properties not supported for block type {:?}: {}",
                input.block_type,
                unexpected.join(", ")
            )));
        }

        let text = || RichText::plain(input.text.clone().unwrap_or_default());
        let props = match block_type {
            BlockType::Paragraph => BlockProps::paragraph(ParagraphType::Text, text()),
            BlockType::Quote => BlockProps::paragraph(ParagraphType::Quote, text()),
            BlockType::Heading { level } => {
                let level = level.map(i64::from).or(input.level).unwrap_or(1);
                BlockProps::paragraph(ParagraphType::heading(level), text())
            }
            BlockType::List { .. } => {
                let style = resolved_style.unwrap_or(ListStyle::Bulleted);
                let checked = style == ListStyle::Todo && input.checked.unwrap_or(false);
                BlockProps::list(style, checked, text())
            }
            BlockType::Code => BlockProps::Code {
                language: input.language.clone().filter(|l| !l.is_empty()),
                wrap: false,
                caption: input.caption.clone(),
                text: text(),
            },
            BlockType::Divider => BlockProps::Divider,
            BlockType::Callout => BlockProps::Callout {
                emoji: input
                    .emoji
                    .clone()
                    .unwrap_or_else(|| DEFAULT_CALLOUT_EMOJI.to_string()),
                text: text(),
            },
            BlockType::Latex => BlockProps::Latex {
                latex: input.latex.clone().unwrap_or_default(),
            },
            BlockType::Table => {
                let grid = input
                    .rows
                    .clone()
                    .unwrap_or_default()
                    .into_iter()
                    .map(|row| row.into_iter().map(RichText::plain).collect())
                    .collect();
                BlockProps::Table(TableData::from_grid(grid)?)
            }
            BlockType::Bookmark => {
                let url = required(&input.url, "url", "bookmark")?;
                validate_url(&url)?;
                let style = match input.style.as_deref() {
                    None => BookmarkStyle::Horizontal,
                    Some(name) => BookmarkStyle::from_str(name).ok_or_else(|| {
                        CoreError::validation(format!(
                            "invalid bookmark style {name:?}; expected vertical, horizontal, list, cube or citation"
                        ))
                    })?,
                };
                BlockProps::Bookmark {
                    url,
                    style,
                    title: input.title.clone(),
                    description: input.description.clone(),
                    caption: input.caption.clone(),
                }
            }
            BlockType::Image => BlockProps::Image {
                source_id: required(&input.source_id, "sourceId", "image")?,
                caption: input.caption.clone(),
                width: positive(input.width, "width")?,
                height: positive(input.height, "height")?,
            },
            BlockType::Attachment => BlockProps::Attachment {
                source_id: required(&input.source_id, "sourceId", "attachment")?,
                name: input.name.clone().unwrap_or_else(|| "attachment".to_string()),
                size: input.size.unwrap_or(0),
                mime: input
                    .mime
                    .clone()
                    .unwrap_or_else(|| "application/octet-stream".to_string()),
                caption: input.caption.clone(),
            },
            BlockType::Embed(embed) => {
                let url = required(&input.url, "url", "embed")?;
                validate_url(&url)?;
                BlockProps::UrlEmbed {
                    embed,
                    url,
                    caption: input.caption.clone(),
                }
            }
            BlockType::EmbedHtml => BlockProps::EmbedHtml {
                html: input.html.clone().unwrap_or_default(),
            },
            BlockType::LinkedDoc => BlockProps::LinkedDoc {
                page_id: required(&input.doc_id, "docId", "linked doc")?,
                title: input.title.clone(),
                caption: input.caption.clone(),
            },
            BlockType::SyncedDoc => BlockProps::SyncedDoc {
                page_id: required(&input.doc_id, "docId", "synced doc")?,
            },
            BlockType::Database => BlockProps::Database {
                title: RichText::plain(input.title.clone().unwrap_or_default()),
            },
            BlockType::SurfaceRef => BlockProps::SurfaceRef {
                reference: required(&input.reference, "reference", "surface ref")?,
                ref_flavour: input
                    .ref_flavour
                    .clone()
                    .unwrap_or_else(|| Flavour::Frame.as_str().to_string()),
                caption: input.caption.clone(),
            },
            BlockType::Frame => BlockProps::Frame {
                title: RichText::plain(input.title.clone().unwrap_or_default()),
                xywh: input
                    .xywh
                    .clone()
                    .unwrap_or_else(|| DEFAULT_FRAME_XYWH.to_string()),
                background: input
                    .background
                    .clone()
                    .unwrap_or_else(|| "--affine-palette-transparent".to_string()),
            },
            BlockType::EdgelessText => BlockProps::EdgelessText {
                xywh: input
                    .xywh
                    .clone()
                    .unwrap_or_else(|| DEFAULT_FRAME_XYWH.to_string()),
            },
            BlockType::Note => {
                let mut note = BlockProps::note("a0");
                if let BlockProps::Note {
                    xywh, background, ..
                } = &mut note
                {
                    if let Some(value) = &input.xywh {
                        *xywh = value.clone();
                    }
                    if let Some(value) = &input.background {
                        *background = value.clone();
                    }
                }
                note
            }
        };
        Ok(props)
    }

    /// Apply an in-place update; structural flavours are rejected upstream.
    pub fn apply_update(&mut self, update: &BlockUpdate, strict: bool) -> Result<()> {
        let present = update.present_fields();
        let allowed: &[&str] = match self {
            BlockProps::Paragraph { kind, .. } if kind.heading_level().is_some() => {
                &["text", "level"]
            }
            BlockProps::Paragraph { .. } => &["text"],
            BlockProps::List {
                style: ListStyle::Todo,
                ..
            } => &["text", "checked"],
            BlockProps::List { .. } | BlockProps::Callout { .. } => &["text"],
            BlockProps::Code { .. } => &["text", "language", "caption"],
            BlockProps::Latex { .. } => &["latex"],
            BlockProps::Bookmark { .. } | BlockProps::UrlEmbed { .. } => &["url", "caption"],
            BlockProps::Image { .. } | BlockProps::Attachment { .. } => &["caption"],
            BlockProps::LinkedDoc { .. } | BlockProps::SurfaceRef { .. } => &["caption"],
            BlockProps::Database { .. } | BlockProps::Frame { .. } => &["title"],
            _ => &[],
        };
        let unexpected: Vec<&str> = present
            .iter()
            .copied()
            .filter(|f| !allowed.contains(f))
            .collect();
        if strict && !unexpected.is_empty() {
            return Err(CoreError::validation(format!(
                "properties not supported for {} blocks: {}",
                self.flavour_name(),
                unexpected.join(", ")
            )));
        }
        if let Some(url) = update.url.as_deref().filter(|_| allowed.contains(&"url")) {
            validate_url(url)?;
        }

        if let (Some(value), true) = (&update.text, allowed.contains(&"text")) {
            if let Some(text) = self.text_mut() {
                *text = RichText::plain(value.clone());
            }
        }
        match self {
            BlockProps::Paragraph { kind, .. } => {
                if let (Some(level), Some(_)) = (update.level, kind.heading_level()) {
                    *kind = ParagraphType::heading(level);
                }
            }
            BlockProps::List {
                style: ListStyle::Todo,
                checked,
                ..
            } => {
                if let Some(value) = update.checked {
                    *checked = value;
                }
            }
            BlockProps::Code {
                language, caption, ..
            } => {
                if let Some(value) = &update.language {
                    *language = Some(value.clone()).filter(|l| !l.is_empty());
                }
                if let Some(value) = &update.caption {
                    *caption = Some(value.clone());
                }
            }
            BlockProps::Latex { latex } => {
                if let Some(value) = &update.latex {
                    *latex = value.clone();
                }
            }
            BlockProps::Bookmark { url, caption, .. } | BlockProps::UrlEmbed { url, caption, .. } => {
                if let Some(value) = &update.url {
                    *url = value.clone();
                }
                if let Some(value) = &update.caption {
                    *caption = Some(value.clone());
                }
            }
            BlockProps::Image { caption, .. }
            | BlockProps::Attachment { caption, .. }
            | BlockProps::LinkedDoc { caption, .. }
            | BlockProps::SurfaceRef { caption, .. } => {
                if let Some(value) = &update.caption {
                    *caption = Some(value.clone());
                }
            }
            BlockProps::Database { title } | BlockProps::Frame { title, .. } => {
                if let Some(value) = &update.title {
                    *title = RichText::plain(value.clone());
                }
            }
            _ => {}
        }
        Ok(())
    }
}

fn required(value: &Option<String>, field: &str, kind: &str) -> Result<String> {
    value
        .clone()
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| CoreError::validation(format!("{kind} blocks require {field}")))
}

fn positive(value: Option<f64>, field: &str) -> Result<Option<f64>> {
    match value {
        Some(v) if !(v.is_finite() && v > 0.0) => Err(CoreError::validation(format!(
            "{field} must be a positive number"
        ))),
        other => Ok(other),
    }
}

fn allowed_fields(block_type: BlockType, style: Option<ListStyle>) -> &'static [&'static str] {
    match block_type {
        BlockType::Paragraph | BlockType::Quote => &["text"],
        BlockType::Heading { level: None } => &["text", "level"],
        BlockType::Heading { level: Some(_) } => &["text"],
        BlockType::List { style: None } if style == Some(ListStyle::Todo) => {
            &["text", "style", "checked"]
        }
        BlockType::List { style: None } => &["text", "style"],
        BlockType::List {
            style: Some(ListStyle::Todo),
        } => &["text", "checked"],
        BlockType::List { style: Some(_) } => &["text"],
        BlockType::Code => &["text", "language", "caption"],
        BlockType::Divider => &[],
        BlockType::Callout => &["text", "emoji"],
        BlockType::Latex => &["latex"],
        BlockType::Table => &["rows"],
        BlockType::Bookmark => &["url", "style", "title", "description", "caption"],
        BlockType::Image => &["sourceId", "caption", "width", "height"],
        BlockType::Attachment => &["sourceId", "name", "size", "mime", "caption"],
        BlockType::Embed(_) => &["url", "caption"],
        BlockType::EmbedHtml => &["html"],
        BlockType::LinkedDoc => &["docId", "title", "caption"],
        BlockType::SyncedDoc => &["docId"],
        BlockType::Database => &["title"],
        BlockType::SurfaceRef => &["reference", "refFlavour", "caption"],
        BlockType::Frame => &["title", "xywh", "background"],
        BlockType::EdgelessText => &["xywh"],
        BlockType::Note => &["xywh", "background"],
    }
}

/// Flat caller input for block creation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockInput {
    #[serde(rename = "type")]
    pub block_type: String,
    pub text: Option<String>,
    pub level: Option<i64>,
    pub style: Option<String>,
    pub checked: Option<bool>,
    pub language: Option<String>,
    pub caption: Option<String>,
    pub url: Option<String>,
    pub latex: Option<String>,
    pub emoji: Option<String>,
    pub doc_id: Option<String>,
    pub source_id: Option<String>,
    pub name: Option<String>,
    pub size: Option<u64>,
    pub mime: Option<String>,
    pub title: Option<String>,
    pub description: Option<String>,
    pub html: Option<String>,
    pub rows: Option<Vec<Vec<String>>>,
    pub width: Option<f64>,
    pub height: Option<f64>,
    pub xywh: Option<String>,
    pub background: Option<String>,
    pub reference: Option<String>,
    pub ref_flavour: Option<String>,
}

impl BlockInput {
    pub fn new(block_type: impl Into<String>) -> Self {
        Self {
            block_type: block_type.into(),
            ..Default::default()
        }
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    /// Wire names of the optional fields that were supplied.
    pub fn present_fields(&self) -> Vec<&'static str> {
        let flags = [
            ("text", self.text.is_some()),
            ("level", self.level.is_some()),
            ("style", self.style.is_some()),
            ("checked", self.checked.is_some()),
            ("language", self.language.is_some()),
            ("caption", self.caption.is_some()),
            ("url", self.url.is_some()),
            ("latex", self.latex.is_some()),
            ("emoji", self.emoji.is_some()),
            ("docId", self.doc_id.is_some()),
            ("sourceId", self.source_id.is_some()),
            ("name", self.name.is_some()),
            ("size", self.size.is_some()),
            ("mime", self.mime.is_some()),
            ("title", self.title.is_some()),
            ("description", self.description.is_some()),
            ("html", self.html.is_some()),
            ("rows", self.rows.is_some()),
            ("width", self.width.is_some()),
            ("height", self.height.is_some()),
            ("xywh", self.xywh.is_some()),
            ("background", self.background.is_some()),
            ("reference", self.reference.is_some()),
            ("refFlavour", self.ref_flavour.is_some()),
        ];
        flags
            .into_iter()
            .filter(|(_, present)| *present)
            .map(|(name, _)| name)
            .collect()
    }
}

/// Partial update of an existing block.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockUpdate {
    pub text: Option<String>,
    pub level: Option<i64>,
    pub checked: Option<bool>,
    pub language: Option<String>,
    pub caption: Option<String>,
    pub latex: Option<String>,
    pub url: Option<String>,
    pub title: Option<String>,
}

impl BlockUpdate {
    pub fn present_fields(&self) -> Vec<&'static str> {
        let flags = [
            ("text", self.text.is_some()),
            ("level", self.level.is_some()),
            ("checked", self.checked.is_some()),
            ("language", self.language.is_some()),
            ("caption", self.caption.is_some()),
            ("latex", self.latex.is_some()),
            ("url", self.url.is_some()),
            ("title", self.title.is_some()),
        ];
        flags
            .into_iter()
            .filter(|(_, present)| *present)
            .map(|(name, _)| name)
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.present_fields().is_empty()
    }
}

/// A node of the document tree. Children are referenced by id only.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Block {
    pub id: BlockId,
    pub parent: Option<BlockId>,
    pub children: Vec<BlockId>,
    pub props: BlockProps,
}

impl Block {
    /// Fresh, unattached block with a generated id.
    pub fn new(props: BlockProps) -> Self {
        Self {
            id: BlockId::generate(),
            parent: None,
            children: Vec::new(),
            props,
        }
    }

    pub fn flavour(&self) -> Option<Flavour> {
        self.props.flavour()
    }

    pub fn is_structural(&self) -> bool {
        self.flavour().is_some_and(|f| f.is_structural())
    }

    pub fn text(&self) -> Option<&RichText> {
        self.props.text()
    }
}

/// Build a fully populated block from caller input.
pub fn create_block(input: &BlockInput, strict: bool) -> Result<Block> {
    Ok(Block::new(BlockProps::from_input(input, strict)?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_heading_input_becomes_paragraph_with_level() {
        let input = BlockInput {
            level: Some(2),
            ..BlockInput::new("heading").with_text("Intro")
        };
        let block = create_block(&input, true).unwrap();
        assert_eq!(block.flavour(), Some(Flavour::Paragraph));
        assert_eq!(
            block.props,
            BlockProps::paragraph(ParagraphType::H2, RichText::plain("Intro"))
        );
    }

    #[test]
    fn test_heading_level_is_clamped() {
        let input = BlockInput {
            level: Some(12),
            ..BlockInput::new("heading")
        };
        let props = BlockProps::from_input(&input, true).unwrap();
        assert!(matches!(
            props,
            BlockProps::Paragraph {
                kind: ParagraphType::H6,
                ..
            }
        ));
    }

    #[test]
    fn test_strict_mode_rejects_irrelevant_fields() {
        let input = BlockInput {
            checked: Some(true),
            ..BlockInput::new("paragraph").with_text("x")
        };
        let err = BlockProps::from_input(&input, true).unwrap_err();
        assert!(matches!(err, CoreError::Validation(ref m) if m.contains("checked")));

        let props = BlockProps::from_input(&input, false).unwrap();
        assert_eq!(
            props,
            BlockProps::paragraph(ParagraphType::Text, RichText::plain("x"))
        );
    }

    #[test]
    fn test_checked_only_allowed_for_todo_lists() {
        let bulleted = BlockInput {
            checked: Some(true),
            style: Some("bulleted".into()),
            ..BlockInput::new("list")
        };
        assert!(BlockProps::from_input(&bulleted, true).is_err());

        let todo = BlockInput {
            checked: Some(true),
            ..BlockInput::new("todo").with_text("ship it")
        };
        let props = BlockProps::from_input(&todo, true).unwrap();
        assert!(matches!(
            props,
            BlockProps::List {
                style: ListStyle::Todo,
                checked: true,
                ..
            }
        ));
    }

    #[test]
    fn test_list_style_is_validated() {
        let input = BlockInput {
            style: Some("starred".into()),
            ..BlockInput::new("list")
        };
        assert!(matches!(
            BlockProps::from_input(&input, true),
            Err(CoreError::Validation(_))
        ));
    }

    #[test]
    fn test_url_blocks_require_valid_urls() {
        let missing = BlockInput::new("bookmark");
        assert!(BlockProps::from_input(&missing, true).is_err());

        let bad = BlockInput {
            url: Some("not a url".into()),
            ..BlockInput::new("embed_youtube")
        };
        assert!(BlockProps::from_input(&bad, true).is_err());

        let good = BlockInput {
            url: Some("https://www.youtube.com/watch?v=abc".into()),
            ..BlockInput::new("embed_youtube")
        };
        assert!(matches!(
            BlockProps::from_input(&good, true).unwrap(),
            BlockProps::UrlEmbed {
                embed: UrlEmbed::Youtube,
                ..
            }
        ));
    }

    #[test]
    fn test_table_grid_is_padded_and_ordered() {
        let input = BlockInput {
            rows: Some(vec![
                vec!["a".into(), "b".into()],
                vec!["c".into()],
            ]),
            ..BlockInput::new("table")
        };
        let BlockProps::Table(table) = BlockProps::from_input(&input, true).unwrap() else {
            panic!("expected table");
        };
        assert_eq!(table.rows.len(), 2);
        assert_eq!(table.columns.len(), 2);
        let grid = table.to_grid();
        assert_eq!(grid[0][1].to_plain(), "b");
        assert_eq!(grid[1][0].to_plain(), "c");
        assert!(grid[1][1].is_empty());
    }

    #[test]
    fn test_updates_respect_strict_mode() {
        let mut props = BlockProps::list(ListStyle::Bulleted, false, RichText::plain("x"));
        let update = BlockUpdate {
            checked: Some(true),
            ..Default::default()
        };
        assert!(props.apply_update(&update, true).is_err());

        let update = BlockUpdate {
            text: Some("y".into()),
            ..Default::default()
        };
        props.apply_update(&update, true).unwrap();
        assert_eq!(props.text().map(RichText::to_plain).as_deref(), Some("y"));
    }
}
