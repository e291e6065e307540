//! Library entrypoint for affine-sync.
//!
//! Provides the Socket.IO transport, the in-memory sync server used by tests,
//! scoped sessions and the [`service::DocService`] operations. The binary is
//! a thin clap front end over [`run_with_cli`].

pub mod cli;
pub mod config;
pub mod error;
pub mod memory;
pub mod protocol;
pub mod service;
pub mod session;
pub mod socketio;
pub mod transport;

use std::sync::Arc;

use affine_core::block::{BlockInput, BlockUpdate};
use affine_core::folders::FolderOp;
use affine_types::BlockId;
use anyhow::{Context, Result};
use serde::Serialize;
use serde_json::json;
use tracing_subscriber::EnvFilter;

use crate::cli::{Cli, Command, FolderCommand};
use crate::config::SyncConfig;
use crate::service::DocService;
use crate::socketio::SocketIoConnector;

pub use error::{ServiceError, TransportError};

pub fn init_tracing(verbose: bool) -> Result<()> {
    let level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Run one CLI command against the configured server.
pub async fn run_with_cli(cli: Cli) -> Result<()> {
    init_tracing(cli.verbose)?;

    let cfg = SyncConfig::from_cli(&cli)?;
    let connector = Arc::new(SocketIoConnector::from_config(&cfg));
    let service = DocService::new(connector, cfg);
    run_command(&service, cli.command).await
}

pub async fn run_command(service: &DocService, command: Command) -> Result<()> {
    match command {
        Command::Read { doc, blocks, json } => {
            if blocks {
                print_json(&service.read_blocks(&doc).await?)?;
            } else {
                let view = service.read_markdown(&doc).await?;
                if json {
                    print_json(&view)?;
                } else {
                    print!("{}", view.markdown);
                }
            }
        }
        Command::Create { title, body } => {
            let body = body.read()?;
            let id = service.create_doc(&title, body.as_deref()).await?;
            print_json(&json!({ "docId": id }))?;
        }
        Command::Append { doc, block, at } => {
            let input: BlockInput =
                serde_json::from_str(&block).context("--block must be a JSON block description")?;
            let id = service.append_block(&doc, &input, &at.to_placement()).await?;
            print_json(&json!({ "blockId": id }))?;
        }
        Command::AppendMarkdown { doc, body } => {
            let created = service.append_markdown(&doc, &body.require()?).await?;
            print_json(&json!({ "created": created }))?;
        }
        Command::Patch { doc, old, new } => {
            print_json(&service.patch_markdown(&doc, &old, &new).await?)?;
        }
        Command::Update { doc, block, json } => {
            let update: BlockUpdate =
                serde_json::from_str(&json).context("--json must be a JSON object")?;
            service
                .update_block(&doc, &BlockId::new(block), &update)
                .await?;
        }
        Command::Move { doc, block, at } => {
            service
                .move_block(&doc, &BlockId::new(block), &at.to_placement())
                .await?;
        }
        Command::DeleteBlock { doc, block } => {
            let removed = service.delete_block(&doc, &BlockId::new(block)).await?;
            print_json(&json!({ "removed": removed }))?;
        }
        Command::Delete { doc } => service.delete_doc(&doc).await?,
        Command::Title { doc, title } => service.set_title(&doc, &title).await?,
        Command::List => print_json(&service.list_docs().await?)?,
        Command::Folders { command } => run_folder_command(service, command).await?,
    }
    Ok(())
}

async fn run_folder_command(service: &DocService, command: FolderCommand) -> Result<()> {
    match command {
        FolderCommand::List => print_json(&service.list_folders().await?)?,
        FolderCommand::Create {
            name,
            parent,
            index,
        } => {
            let id = service
                .create_folder(parent.as_deref(), &name, index)
                .await?;
            print_json(&json!({ "id": id }))?;
        }
        FolderCommand::Link {
            target,
            entry_type,
            parent,
        } => {
            let id = service
                .add_folder_link(parent.as_deref(), entry_type, &target)
                .await?;
            print_json(&json!({ "id": id }))?;
        }
        FolderCommand::Rename { id, name } => {
            let changed = service.rename_folder(&id, &name).await?;
            print_json(&json!({ "changed": changed }))?;
        }
        FolderCommand::Move { id, parent, after } => {
            service
                .move_folder_entry(&id, parent.as_deref(), after.as_deref())
                .await?;
        }
        FolderCommand::Delete { id } => {
            let deleted = service.delete_folder_entry(&id).await?;
            print_json(&json!({ "deleted": deleted }))?;
        }
        FolderCommand::Batch { json, file } => {
            let text = match (json, file) {
                (Some(text), _) => text,
                (None, Some(path)) => std::fs::read_to_string(&path)
                    .with_context(|| format!("reading {}", path.display()))?,
                (None, None) => anyhow::bail!("pass --json or --file"),
            };
            let ops: Vec<FolderOp> =
                serde_json::from_str(&text).context("batch must be a JSON array of operations")?;
            print_json(&service.batch_folders(ops).await?)?;
        }
    }
    Ok(())
}
