//! Block flavours and the caller-facing block type vocabulary.

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};

/// Stored block flavour (`sys:flavour`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Flavour {
    Page,
    Surface,
    Note,
    Paragraph,
    List,
    Code,
    Divider,
    Callout,
    Latex,
    Table,
    Bookmark,
    Image,
    Attachment,
    EmbedYoutube,
    EmbedGithub,
    EmbedFigma,
    EmbedLoom,
    EmbedHtml,
    EmbedLinkedDoc,
    EmbedSyncedDoc,
    Database,
    SurfaceRef,
    Frame,
    EdgelessText,
}

impl Flavour {
    pub const ALL: [Flavour; 24] = [
        Flavour::Page,
        Flavour::Surface,
        Flavour::Note,
        Flavour::Paragraph,
        Flavour::List,
        Flavour::Code,
        Flavour::Divider,
        Flavour::Callout,
        Flavour::Latex,
        Flavour::Table,
        Flavour::Bookmark,
        Flavour::Image,
        Flavour::Attachment,
        Flavour::EmbedYoutube,
        Flavour::EmbedGithub,
        Flavour::EmbedFigma,
        Flavour::EmbedLoom,
        Flavour::EmbedHtml,
        Flavour::EmbedLinkedDoc,
        Flavour::EmbedSyncedDoc,
        Flavour::Database,
        Flavour::SurfaceRef,
        Flavour::Frame,
        Flavour::EdgelessText,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Flavour::Page => "affine:page",
            Flavour::Surface => "affine:surface",
            Flavour::Note => "affine:note",
            Flavour::Paragraph => "affine:paragraph",
            Flavour::List => "affine:list",
            Flavour::Code => "affine:code",
            Flavour::Divider => "affine:divider",
            Flavour::Callout => "affine:callout",
            Flavour::Latex => "affine:latex",
            Flavour::Table => "affine:table",
            Flavour::Bookmark => "affine:bookmark",
            Flavour::Image => "affine:image",
            Flavour::Attachment => "affine:attachment",
            Flavour::EmbedYoutube => "affine:embed-youtube",
            Flavour::EmbedGithub => "affine:embed-github",
            Flavour::EmbedFigma => "affine:embed-figma",
            Flavour::EmbedLoom => "affine:embed-loom",
            Flavour::EmbedHtml => "affine:embed-html",
            Flavour::EmbedLinkedDoc => "affine:embed-linked-doc",
            Flavour::EmbedSyncedDoc => "affine:embed-synced-doc",
            Flavour::Database => "affine:database",
            Flavour::SurfaceRef => "affine:surface-ref",
            Flavour::Frame => "affine:frame",
            Flavour::EdgelessText => "affine:edgeless-text",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        Flavour::ALL.into_iter().find(|f| f.as_str() == s)
    }

    /// Page, surface and note form the skeleton of every document.
    pub fn is_structural(&self) -> bool {
        matches!(self, Flavour::Page | Flavour::Surface | Flavour::Note)
    }

    /// Blocks that live on the edgeless surface rather than in a note.
    pub fn is_edgeless(&self) -> bool {
        matches!(self, Flavour::Frame | Flavour::EdgelessText)
    }

    /// Whether a block of this flavour may host a child of `child` flavour.
    pub fn can_host(&self, child: Flavour) -> bool {
        match self {
            Flavour::Page => matches!(child, Flavour::Note | Flavour::Surface),
            Flavour::Surface => child.is_edgeless(),
            Flavour::Note => !child.is_structural() && !child.is_edgeless(),
            Flavour::Paragraph | Flavour::List | Flavour::Callout => {
                !child.is_structural() && !child.is_edgeless()
            }
            _ => false,
        }
    }
}

/// Paragraph sub-type (`prop:type` on `affine:paragraph`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParagraphType {
    Text,
    Quote,
    H1,
    H2,
    H3,
    H4,
    H5,
    H6,
}

impl ParagraphType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ParagraphType::Text => "text",
            ParagraphType::Quote => "quote",
            ParagraphType::H1 => "h1",
            ParagraphType::H2 => "h2",
            ParagraphType::H3 => "h3",
            ParagraphType::H4 => "h4",
            ParagraphType::H5 => "h5",
            ParagraphType::H6 => "h6",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "text" => Some(ParagraphType::Text),
            "quote" => Some(ParagraphType::Quote),
            "h1" => Some(ParagraphType::H1),
            "h2" => Some(ParagraphType::H2),
            "h3" => Some(ParagraphType::H3),
            "h4" => Some(ParagraphType::H4),
            "h5" => Some(ParagraphType::H5),
            "h6" => Some(ParagraphType::H6),
            _ => None,
        }
    }

    /// Heading for a level, clamped into 1..=6.
    pub fn heading(level: i64) -> Self {
        match level.clamp(1, 6) {
            1 => ParagraphType::H1,
            2 => ParagraphType::H2,
            3 => ParagraphType::H3,
            4 => ParagraphType::H4,
            5 => ParagraphType::H5,
            _ => ParagraphType::H6,
        }
    }

    pub fn heading_level(&self) -> Option<usize> {
        match self {
            ParagraphType::H1 => Some(1),
            ParagraphType::H2 => Some(2),
            ParagraphType::H3 => Some(3),
            ParagraphType::H4 => Some(4),
            ParagraphType::H5 => Some(5),
            ParagraphType::H6 => Some(6),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ListStyle {
    Bulleted,
    Numbered,
    Todo,
    Toggle,
}

impl ListStyle {
    pub fn as_str(&self) -> &'static str {
        match self {
            ListStyle::Bulleted => "bulleted",
            ListStyle::Numbered => "numbered",
            ListStyle::Todo => "todo",
            ListStyle::Toggle => "toggle",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "bulleted" => Some(ListStyle::Bulleted),
            "numbered" => Some(ListStyle::Numbered),
            "todo" => Some(ListStyle::Todo),
            "toggle" => Some(ListStyle::Toggle),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum BookmarkStyle {
    Vertical,
    Horizontal,
    List,
    Cube,
    Citation,
}

impl BookmarkStyle {
    pub fn as_str(&self) -> &'static str {
        match self {
            BookmarkStyle::Vertical => "vertical",
            BookmarkStyle::Horizontal => "horizontal",
            BookmarkStyle::List => "list",
            BookmarkStyle::Cube => "cube",
            BookmarkStyle::Citation => "citation",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "vertical" => Some(BookmarkStyle::Vertical),
            "horizontal" => Some(BookmarkStyle::Horizontal),
            "list" => Some(BookmarkStyle::List),
            "cube" => Some(BookmarkStyle::Cube),
            "citation" => Some(BookmarkStyle::Citation),
            _ => None,
        }
    }
}

/// Embeds whose only payload is an external URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UrlEmbed {
    Youtube,
    Github,
    Figma,
    Loom,
}

impl UrlEmbed {
    pub fn flavour(&self) -> Flavour {
        match self {
            UrlEmbed::Youtube => Flavour::EmbedYoutube,
            UrlEmbed::Github => Flavour::EmbedGithub,
            UrlEmbed::Figma => Flavour::EmbedFigma,
            UrlEmbed::Loom => Flavour::EmbedLoom,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            UrlEmbed::Youtube => "YouTube",
            UrlEmbed::Github => "GitHub",
            UrlEmbed::Figma => "Figma",
            UrlEmbed::Loom => "Loom",
        }
    }
}

/// Block type as named by callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockType {
    Paragraph,
    Heading { level: Option<u8> },
    Quote,
    List { style: Option<ListStyle> },
    Code,
    Divider,
    Callout,
    Latex,
    Table,
    Bookmark,
    Image,
    Attachment,
    Embed(UrlEmbed),
    EmbedHtml,
    LinkedDoc,
    SyncedDoc,
    Database,
    SurfaceRef,
    Frame,
    EdgelessText,
    Note,
}

impl BlockType {
    /// Parse a caller type name, accepting legacy aliases.
    pub fn parse(name: &str) -> Result<Self> {
        let normalized = name.trim().to_ascii_lowercase().replace('-', "_");
        let ty = match normalized.as_str() {
            "paragraph" | "text" => BlockType::Paragraph,
            "heading" => BlockType::Heading { level: None },
            "heading1" | "h1" => BlockType::Heading { level: Some(1) },
            "heading2" | "h2" => BlockType::Heading { level: Some(2) },
            "heading3" | "h3" => BlockType::Heading { level: Some(3) },
            "heading4" | "h4" => BlockType::Heading { level: Some(4) },
            "heading5" | "h5" => BlockType::Heading { level: Some(5) },
            "heading6" | "h6" => BlockType::Heading { level: Some(6) },
            "quote" => BlockType::Quote,
            "list" => BlockType::List { style: None },
            "bulleted_list" | "bullet_list" => BlockType::List {
                style: Some(ListStyle::Bulleted),
            },
            "numbered_list" => BlockType::List {
                style: Some(ListStyle::Numbered),
            },
            "todo" | "todo_list" => BlockType::List {
                style: Some(ListStyle::Todo),
            },
            "code" => BlockType::Code,
            "divider" => BlockType::Divider,
            "callout" => BlockType::Callout,
            "latex" => BlockType::Latex,
            "table" => BlockType::Table,
            "bookmark" => BlockType::Bookmark,
            "image" => BlockType::Image,
            "attachment" => BlockType::Attachment,
            "embed_youtube" => BlockType::Embed(UrlEmbed::Youtube),
            "embed_github" => BlockType::Embed(UrlEmbed::Github),
            "embed_figma" => BlockType::Embed(UrlEmbed::Figma),
            "embed_loom" => BlockType::Embed(UrlEmbed::Loom),
            "embed_html" => BlockType::EmbedHtml,
            "embed_linked_doc" | "linked_doc" => BlockType::LinkedDoc,
            "embed_synced_doc" | "synced_doc" => BlockType::SyncedDoc,
            "database" => BlockType::Database,
            "surface_ref" => BlockType::SurfaceRef,
            "frame" => BlockType::Frame,
            "edgeless_text" => BlockType::EdgelessText,
            "note" => BlockType::Note,
            _ => {
                return Err(CoreError::validation(format!(
                    "unknown block type: {name:?}"
                )))
            }
        };
        Ok(ty)
    }

    pub fn flavour(&self) -> Flavour {
        match self {
            BlockType::Paragraph | BlockType::Heading { .. } | BlockType::Quote => {
                Flavour::Paragraph
            }
            BlockType::List { .. } => Flavour::List,
            BlockType::Code => Flavour::Code,
            BlockType::Divider => Flavour::Divider,
            BlockType::Callout => Flavour::Callout,
            BlockType::Latex => Flavour::Latex,
            BlockType::Table => Flavour::Table,
            BlockType::Bookmark => Flavour::Bookmark,
            BlockType::Image => Flavour::Image,
            BlockType::Attachment => Flavour::Attachment,
            BlockType::Embed(kind) => kind.flavour(),
            BlockType::EmbedHtml => Flavour::EmbedHtml,
            BlockType::LinkedDoc => Flavour::EmbedLinkedDoc,
            BlockType::SyncedDoc => Flavour::EmbedSyncedDoc,
            BlockType::Database => Flavour::Database,
            BlockType::SurfaceRef => Flavour::SurfaceRef,
            BlockType::Frame => Flavour::Frame,
            BlockType::EdgelessText => Flavour::EdgelessText,
            BlockType::Note => Flavour::Note,
        }
    }
}
