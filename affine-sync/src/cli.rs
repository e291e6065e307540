use std::path::PathBuf;

use affine_core::folders::EntryType;
use affine_core::tree::Placement;
use affine_types::BlockId;
use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};

use crate::config::{DEFAULT_CLIENT_VERSION, DEFAULT_CONNECT_TIMEOUT_MS, DEFAULT_REQUEST_TIMEOUT_MS};

/// CLI for reading and editing AFFiNE workspace documents.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "affine-sync",
    about = "Read and edit AFFiNE documents through the workspace sync server"
)]
pub struct Cli {
    /// Server base URL (http or https)
    #[arg(long, env = "AFFINE_BASE_URL", default_value = "https://app.affine.pro")]
    pub base_url: String,

    /// Workspace to operate on
    #[arg(long, env = "AFFINE_WORKSPACE_ID")]
    pub workspace: String,

    /// Client version announced when joining the workspace
    #[arg(long, env = "AFFINE_CLIENT_VERSION", default_value = DEFAULT_CLIENT_VERSION)]
    pub client_version: String,

    /// Session cookie sent with the WebSocket upgrade
    #[arg(long, env = "AFFINE_COOKIE", hide_env_values = true)]
    pub cookie: Option<String>,

    /// Access token sent as a bearer token
    #[arg(long, env = "AFFINE_TOKEN", hide_env_values = true)]
    pub token: Option<String>,

    #[arg(long, env = "AFFINE_CONNECT_TIMEOUT_MS", default_value_t = DEFAULT_CONNECT_TIMEOUT_MS)]
    pub connect_timeout_ms: u64,

    /// Timeout for each join/load/push round trip
    #[arg(long, env = "AFFINE_REQUEST_TIMEOUT_MS", default_value_t = DEFAULT_REQUEST_TIMEOUT_MS)]
    pub request_timeout_ms: u64,

    /// Ignore block properties that do not apply to the block type instead
    /// of rejecting them
    #[arg(long)]
    pub lenient: bool,

    /// Enable debug logging
    #[arg(long, short, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

/// Markdown given inline or read from a file.
#[derive(Debug, Clone, Args)]
pub struct BodyArgs {
    /// Markdown text
    #[arg(long, conflicts_with = "file")]
    pub markdown: Option<String>,

    /// Read markdown from this file
    #[arg(long)]
    pub file: Option<PathBuf>,
}

impl BodyArgs {
    pub fn read(&self) -> Result<Option<String>> {
        match (&self.markdown, &self.file) {
            (Some(text), _) => Ok(Some(text.clone())),
            (None, Some(path)) => std::fs::read_to_string(path)
                .map(Some)
                .with_context(|| format!("reading {}", path.display())),
            (None, None) => Ok(None),
        }
    }

    pub fn require(&self) -> Result<String> {
        match self.read()? {
            Some(text) => Ok(text),
            None => bail!("pass --markdown or --file"),
        }
    }
}

/// Where a block goes. Without flags it lands at the end of the first note.
#[derive(Debug, Clone, Default, Args)]
pub struct PlacementArgs {
    /// Parent block id
    #[arg(long, conflicts_with_all = ["after", "before"])]
    pub parent: Option<String>,

    /// Position among the parent's children (defaults to the end)
    #[arg(long, requires = "parent")]
    pub index: Option<usize>,

    /// Insert right after this sibling
    #[arg(long, conflicts_with = "before")]
    pub after: Option<String>,

    /// Insert right before this sibling
    #[arg(long)]
    pub before: Option<String>,
}

impl PlacementArgs {
    pub fn to_placement(&self) -> Placement {
        if let Some(parent) = &self.parent {
            Placement::Parent {
                parent: BlockId::new(parent.clone()),
                index: self.index,
            }
        } else if let Some(after) = &self.after {
            Placement::After(BlockId::new(after.clone()))
        } else if let Some(before) = &self.before {
            Placement::Before(BlockId::new(before.clone()))
        } else {
            Placement::Default
        }
    }
}

fn parse_entry_type(value: &str) -> Result<EntryType, String> {
    EntryType::parse(value).ok_or_else(|| format!("unknown entry type {value:?}"))
}

#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Print a doc as markdown
    Read {
        doc: String,
        /// Print the block tree instead of markdown
        #[arg(long)]
        blocks: bool,
        /// Print JSON (markdown plus per-block line ranges)
        #[arg(long)]
        json: bool,
    },
    /// Create a doc, optionally with an initial body
    Create {
        #[arg(long)]
        title: String,
        #[command(flatten)]
        body: BodyArgs,
    },
    /// Insert one block, given as a JSON block description
    Append {
        doc: String,
        /// e.g. '{"type":"heading","level":2,"text":"Intro"}'
        #[arg(long)]
        block: String,
        #[command(flatten)]
        at: PlacementArgs,
    },
    /// Parse markdown and append it to the end of the first note
    AppendMarkdown {
        doc: String,
        #[command(flatten)]
        body: BodyArgs,
    },
    /// Replace a unique markdown substring, rebuilding only affected blocks
    Patch {
        doc: String,
        #[arg(long)]
        old: String,
        #[arg(long)]
        new: String,
    },
    /// Update a block's text or properties from a JSON object
    Update {
        doc: String,
        block: String,
        #[arg(long)]
        json: String,
    },
    /// Move a block (and its subtree)
    Move {
        doc: String,
        block: String,
        #[command(flatten)]
        at: PlacementArgs,
    },
    /// Delete a block and its subtree
    DeleteBlock { doc: String, block: String },
    /// Delete a doc and drop it from the page list
    Delete { doc: String },
    /// Set a doc's title
    Title { doc: String, title: String },
    /// List the workspace's docs
    List,
    /// Manage the sidebar folder tree
    Folders {
        #[command(subcommand)]
        command: FolderCommand,
    },
}

#[derive(Debug, Clone, Subcommand)]
pub enum FolderCommand {
    /// Print every entry, depth-first
    List,
    Create {
        name: String,
        #[arg(long)]
        parent: Option<String>,
        /// Explicit fractional index
        #[arg(long)]
        index: Option<String>,
    },
    /// Link a doc, tag or collection into a folder
    Link {
        target: String,
        #[arg(long = "type", value_parser = parse_entry_type, default_value = "doc")]
        entry_type: EntryType,
        #[arg(long)]
        parent: Option<String>,
    },
    Rename { id: String, name: String },
    Move {
        id: String,
        /// New parent folder (root level when omitted)
        #[arg(long)]
        parent: Option<String>,
        /// Place after this sibling (end of the list when omitted)
        #[arg(long)]
        after: Option<String>,
    },
    Delete { id: String },
    /// Apply a JSON array of operations; failures are reported per item
    Batch {
        #[arg(long, conflicts_with = "file")]
        json: Option<String>,
        #[arg(long)]
        file: Option<PathBuf>,
    },
}
