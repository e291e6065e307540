//! Document operations, each run to completion on its own session.
//!
//! Every operation follows the same sequence: connect and join, load, mutate
//! locally, push one update per touched doc, refresh the workspace page list
//! when a page body or title changed, disconnect. Input validation happens
//! before the channel is opened wherever it does not need the document.

use std::sync::Arc;

use affine_core::block::{create_block, BlockInput, BlockUpdate};
use affine_core::folders::{EntryType, FolderEntry, FolderOp, FolderTree, FOLDERS_DOC_ID};
use affine_core::markdown::{self, BlockLineRange};
use affine_core::patch::{patch, PatchOutcome};
use affine_core::store::{self, DocMeta};
use affine_core::tree::{BlockTree, Placement};
use affine_core::workspace::{self, PageMeta};
use affine_types::{BlockId, DocId};
use serde::Serialize;
use tracing::info;
use yrs::Doc;

use crate::config::SyncConfig;
use crate::error::{ServiceResult, TransportError};
use crate::session::{LoadedDoc, Session};
use crate::transport::Connector;

fn now() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DocMarkdown {
    pub doc_id: String,
    pub title: String,
    pub markdown: String,
    pub ranges: Vec<BlockLineRange>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockSummary {
    pub id: BlockId,
    pub flavour: String,
    pub parent: Option<BlockId>,
    pub depth: usize,
    pub children: Vec<BlockId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FolderListing {
    #[serde(flatten)]
    pub entry: FolderEntry,
    pub depth: usize,
}

/// Outcome of one folder batch item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BatchItem {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

fn summarize(tree: &BlockTree) -> Vec<BlockSummary> {
    fn visit(tree: &BlockTree, id: &BlockId, depth: usize, out: &mut Vec<BlockSummary>) {
        let Some(block) = tree.get(id) else {
            return;
        };
        out.push(BlockSummary {
            id: block.id.clone(),
            flavour: block.props.flavour_name().to_string(),
            parent: block.parent.clone(),
            depth,
            children: block.children.clone(),
            text: block.text().map(|t| t.to_plain()),
        });
        for child in &block.children {
            visit(tree, child, depth + 1, out);
        }
    }

    let mut out = Vec::new();
    if let Some(root) = tree.root() {
        visit(tree, root, 0, &mut out);
    }
    out
}

fn flatten_folders(tree: &FolderTree<'_>) -> Vec<FolderListing> {
    fn visit(tree: &FolderTree<'_>, parent: Option<&str>, depth: usize, out: &mut Vec<FolderListing>) {
        for entry in tree.children(parent) {
            out.push(FolderListing {
                entry: entry.clone(),
                depth,
            });
            if entry.entry_type == EntryType::Folder {
                visit(tree, Some(&entry.id), depth + 1, out);
            }
        }
    }

    let mut out = Vec::new();
    visit(tree, None, 0, &mut out);
    out
}

pub struct DocService {
    connector: Arc<dyn Connector>,
    config: SyncConfig,
}

impl DocService {
    pub fn new(connector: Arc<dyn Connector>, config: SyncConfig) -> Self {
        Self { connector, config }
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    async fn session(&self) -> Result<Session, TransportError> {
        Session::open(self.connector.as_ref(), &self.config).await
    }

    /// Load a doc and materialize its block tree.
    async fn load_tree(&self, session: &Session, doc_id: &str) -> ServiceResult<(LoadedDoc, BlockTree)> {
        let loaded = session.load_existing(doc_id).await?;
        let tree = store::load_tree(&loaded.doc);
        Ok((loaded, tree))
    }

    /// Commit `tree`, push it, and refresh the page list entry.
    async fn finish_edit(
        &self,
        session: &Session,
        loaded: &LoadedDoc,
        tree: &mut BlockTree,
        title: Option<&str>,
    ) -> ServiceResult<()> {
        store::commit(&loaded.doc, tree);
        if session.push_if_changed(loaded).await?.is_some() {
            let root = session.load(self.config.workspace_id.as_str()).await?;
            workspace::touch(&root.doc, &loaded.id, title, now());
            session.push_if_changed(&root).await?;
        }
        Ok(())
    }

    pub async fn read_markdown(&self, doc_id: &str) -> ServiceResult<DocMarkdown> {
        let session = self.session().await?;
        let (_, tree) = self.load_tree(&session, doc_id).await?;
        session.close().await;

        let title = tree.title();
        let rendered = markdown::render(&tree, &title);
        Ok(DocMarkdown {
            doc_id: doc_id.to_string(),
            title,
            markdown: rendered.markdown,
            ranges: rendered.ranges,
        })
    }

    pub async fn read_blocks(&self, doc_id: &str) -> ServiceResult<Vec<BlockSummary>> {
        let session = self.session().await?;
        let (_, tree) = self.load_tree(&session, doc_id).await?;
        session.close().await;
        Ok(summarize(&tree))
    }

    /// Create a page titled `title`, optionally with an initial markdown body.
    pub async fn create_doc(&self, title: &str, body: Option<&str>) -> ServiceResult<DocId> {
        let forest = body.map(markdown::parse).unwrap_or_default();
        let doc_id = DocId::generate();
        let created_at = now();

        let doc = Doc::new();
        let loaded = LoadedDoc {
            id: doc_id.to_string(),
            before: store::snapshot(&doc),
            doc,
            existed: false,
        };
        let mut tree = BlockTree::new();
        let note = store::scaffold_doc(&mut tree, title)?;
        markdown::insert_parsed(&mut tree, &note, 0, forest)?;
        store::write_meta(
            &loaded.doc,
            &DocMeta {
                id: doc_id.to_string(),
                title: title.to_string(),
                create_date: Some(created_at),
                tags: Vec::new(),
            },
        );
        store::commit(&loaded.doc, &mut tree);

        let session = self.session().await?;
        session.push_if_changed(&loaded).await?;
        let root = session.load(self.config.workspace_id.as_str()).await?;
        workspace::upsert_page(&root.doc, doc_id.as_str(), title, created_at);
        session.push_if_changed(&root).await?;
        session.close().await;

        info!(doc_id = %doc_id, "created doc");
        Ok(doc_id)
    }

    pub async fn append_block(
        &self,
        doc_id: &str,
        input: &BlockInput,
        placement: &Placement,
    ) -> ServiceResult<BlockId> {
        let block = create_block(input, self.config.strict)?;
        let session = self.session().await?;
        let (loaded, mut tree) = self.load_tree(&session, doc_id).await?;
        let id = tree.insert(block, placement)?;
        self.finish_edit(&session, &loaded, &mut tree, None).await?;
        session.close().await;
        info!(doc_id, block_id = %id, "appended block");
        Ok(id)
    }

    pub async fn append_markdown(&self, doc_id: &str, body: &str) -> ServiceResult<Vec<BlockId>> {
        let session = self.session().await?;
        let (loaded, mut tree) = self.load_tree(&session, doc_id).await?;
        let created = markdown::append_markdown(&mut tree, body)?;
        self.finish_edit(&session, &loaded, &mut tree, None).await?;
        session.close().await;
        info!(doc_id, blocks = created.len(), "appended markdown");
        Ok(created)
    }

    pub async fn patch_markdown(&self, doc_id: &str, old: &str, new: &str) -> ServiceResult<PatchOutcome> {
        let session = self.session().await?;
        let (loaded, mut tree) = self.load_tree(&session, doc_id).await?;
        let title = tree.title();
        let outcome = patch(&mut tree, &title, old, new)?;
        self.finish_edit(&session, &loaded, &mut tree, None).await?;
        session.close().await;
        info!(
            doc_id,
            removed = outcome.removed.len(),
            created = outcome.created.len(),
            "patched doc"
        );
        Ok(outcome)
    }

    pub async fn update_block(&self, doc_id: &str, block_id: &BlockId, update: &BlockUpdate) -> ServiceResult<()> {
        let session = self.session().await?;
        let (loaded, mut tree) = self.load_tree(&session, doc_id).await?;
        tree.update(block_id, update, self.config.strict)?;
        self.finish_edit(&session, &loaded, &mut tree, None).await?;
        session.close().await;
        Ok(())
    }

    pub async fn move_block(&self, doc_id: &str, block_id: &BlockId, placement: &Placement) -> ServiceResult<()> {
        let session = self.session().await?;
        let (loaded, mut tree) = self.load_tree(&session, doc_id).await?;
        tree.reparent(block_id, placement)?;
        self.finish_edit(&session, &loaded, &mut tree, None).await?;
        session.close().await;
        Ok(())
    }

    /// Delete a block and its subtree; returns every removed id.
    pub async fn delete_block(&self, doc_id: &str, block_id: &BlockId) -> ServiceResult<Vec<BlockId>> {
        let session = self.session().await?;
        let (loaded, mut tree) = self.load_tree(&session, doc_id).await?;
        let removed = tree.remove_subtree(block_id)?;
        self.finish_edit(&session, &loaded, &mut tree, None).await?;
        session.close().await;
        Ok(removed)
    }

    pub async fn set_title(&self, doc_id: &str, title: &str) -> ServiceResult<()> {
        let session = self.session().await?;
        let (loaded, mut tree) = self.load_tree(&session, doc_id).await?;
        tree.set_title(title);
        self.finish_edit(&session, &loaded, &mut tree, Some(title)).await?;
        session.close().await;
        Ok(())
    }

    pub async fn delete_doc(&self, doc_id: &str) -> ServiceResult<()> {
        let session = self.session().await?;
        session.load_existing(doc_id).await?;
        session.delete_doc(doc_id).await?;
        let root = session.load(self.config.workspace_id.as_str()).await?;
        workspace::remove_page(&root.doc, doc_id);
        session.push_if_changed(&root).await?;
        session.close().await;
        info!(doc_id, "deleted doc");
        Ok(())
    }

    pub async fn list_docs(&self) -> ServiceResult<Vec<PageMeta>> {
        let session = self.session().await?;
        let root = session.load(self.config.workspace_id.as_str()).await?;
        session.close().await;
        Ok(workspace::list_pages(&root.doc))
    }

    async fn with_folders<T>(
        &self,
        edit: impl FnOnce(&mut FolderTree<'_>) -> ServiceResult<T>,
    ) -> ServiceResult<T> {
        let session = self.session().await?;
        let loaded = session.load(FOLDERS_DOC_ID).await?;
        let result = {
            let mut folders = FolderTree::load(&loaded.doc);
            edit(&mut folders)?
        };
        session.push_if_changed(&loaded).await?;
        session.close().await;
        Ok(result)
    }

    /// Every live entry, depth-first in sibling order.
    pub async fn list_folders(&self) -> ServiceResult<Vec<FolderListing>> {
        self.with_folders(|folders| Ok(flatten_folders(folders))).await
    }

    pub async fn create_folder(
        &self,
        parent: Option<&str>,
        name: &str,
        index: Option<String>,
    ) -> ServiceResult<String> {
        self.with_folders(|folders| Ok(folders.create_folder(parent, name, index)?))
            .await
    }

    pub async fn add_folder_link(
        &self,
        parent: Option<&str>,
        entry_type: EntryType,
        target: &str,
    ) -> ServiceResult<String> {
        self.with_folders(|folders| Ok(folders.add_link(parent, entry_type, target)?))
            .await
    }

    /// Returns `false` when the folder already had that name.
    pub async fn rename_folder(&self, id: &str, name: &str) -> ServiceResult<bool> {
        self.with_folders(|folders| Ok(folders.rename(id, name)?)).await
    }

    pub async fn move_folder_entry(
        &self,
        id: &str,
        parent: Option<&str>,
        after: Option<&str>,
    ) -> ServiceResult<()> {
        self.with_folders(|folders| Ok(folders.move_entry(id, parent, after)?))
            .await
    }

    pub async fn delete_folder_entry(&self, id: &str) -> ServiceResult<Vec<String>> {
        self.with_folders(|folders| Ok(folders.delete(id)?)).await
    }

    /// Apply several folder operations in one session. Failures are reported
    /// per item; the successful ones are still pushed.
    pub async fn batch_folders(&self, ops: Vec<FolderOp>) -> ServiceResult<Vec<BatchItem>> {
        self.with_folders(|folders| {
            Ok(folders
                .batch(ops)
                .into_iter()
                .map(|result| match result {
                    Ok(id) => BatchItem {
                        ok: true,
                        id: Some(id),
                        error: None,
                    },
                    Err(err) => BatchItem {
                        ok: false,
                        id: None,
                        error: Some(err.to_string()),
                    },
                })
                .collect())
        })
        .await
    }
}
