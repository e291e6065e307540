//! Reading and writing block trees in a yrs document.
//!
//! Layout: root map `blocks` (id → block map with `sys:*` and `prop:*`
//! keys) and root map `meta`. Writes go through [`commit`], which replays
//! the tree's change journal inside one transaction so that a logical
//! operation always produces a single update.

use std::collections::{BTreeMap, HashSet};

use affine_types::{BlockChange, BlockId};
use serde::{Deserialize, Serialize};
use tracing::debug;
use yrs::updates::decoder::Decode;
use yrs::{
    Any, Array, ArrayPrelim, ArrayRef, Doc, GetString, Map, MapPrelim, MapRef, Out, ReadTxn,
    Snapshot, StateVector, TextPrelim, Transact, TransactionMut, Update, WriteTxn,
};

use crate::block::{Block, BlockProps, TableAxis, TableData};
use crate::error::{CoreError, Result};
use crate::flavour::{BookmarkStyle, Flavour, ListStyle, ParagraphType, UrlEmbed};
use crate::rich_text::RichText;
use crate::tree::BlockTree;

pub const BLOCKS: &str = "blocks";
pub const META: &str = "meta";

const SYS_ID: &str = "sys:id";
const SYS_FLAVOUR: &str = "sys:flavour";
const SYS_VERSION: &str = "sys:version";
const SYS_CHILDREN: &str = "sys:children";

// =============================================================================
// Value helpers
// =============================================================================

pub(crate) fn get_str<T: ReadTxn>(txn: &T, map: &MapRef, key: &str) -> Option<String> {
    match map.get(txn, key)? {
        Out::Any(Any::String(s)) => Some(s.to_string()),
        Out::YText(text) => Some(text.get_string(txn)),
        _ => None,
    }
}

fn get_bool<T: ReadTxn>(txn: &T, map: &MapRef, key: &str) -> Option<bool> {
    match map.get(txn, key)? {
        Out::Any(Any::Bool(b)) => Some(b),
        _ => None,
    }
}

pub(crate) fn get_f64<T: ReadTxn>(txn: &T, map: &MapRef, key: &str) -> Option<f64> {
    match map.get(txn, key)? {
        Out::Any(Any::Number(n)) => Some(n),
        Out::Any(Any::BigInt(n)) => Some(n as f64),
        _ => None,
    }
}

fn get_rich<T: ReadTxn>(txn: &T, map: &MapRef, key: &str) -> RichText {
    match map.get(txn, key) {
        Some(Out::YText(text)) => RichText::read(txn, &text),
        Some(Out::Any(Any::String(s))) => RichText::plain(s.to_string()),
        _ => RichText::new(),
    }
}

pub(crate) fn get_string_list<T: ReadTxn>(txn: &T, map: &MapRef, key: &str) -> Vec<String> {
    match map.get(txn, key) {
        Some(Out::YArray(array)) => array
            .iter(txn)
            .filter_map(|v| match v {
                Out::Any(Any::String(s)) => Some(s.to_string()),
                _ => None,
            })
            .collect(),
        Some(Out::Any(Any::Array(items))) => items
            .iter()
            .filter_map(|v| match v {
                Any::String(s) => Some(s.to_string()),
                _ => None,
            })
            .collect(),
        _ => Vec::new(),
    }
}

fn opt_str(value: &Option<String>) -> Any {
    match value {
        Some(s) => Any::from(s.as_str()),
        None => Any::Null,
    }
}

fn opt_f64(value: Option<f64>) -> Any {
    value.map(Any::Number).unwrap_or(Any::Null)
}

fn str_any(value: &str) -> Any {
    Any::from(value)
}

// =============================================================================
// Props <-> map keys
// =============================================================================

fn version_of(flavour: Option<Flavour>) -> f64 {
    match flavour {
        Some(Flavour::Page) => 2.0,
        Some(Flavour::Surface) => 5.0,
        _ => 1.0,
    }
}

/// Scalar `prop:*` values for a block.
fn scalar_props(props: &BlockProps) -> Vec<(String, Any)> {
    let p = |key: &str, value: Any| (format!("prop:{key}"), value);
    match props {
        BlockProps::Note {
            xywh,
            background,
            index,
            hidden,
            display_mode,
        } => vec![
            p("xywh", str_any(xywh)),
            p("background", str_any(background)),
            p("index", str_any(index)),
            p("hidden", Any::Bool(*hidden)),
            p("displayMode", str_any(display_mode)),
        ],
        BlockProps::Paragraph { kind, .. } => vec![p("type", str_any(kind.as_str()))],
        BlockProps::List {
            style,
            checked,
            collapsed,
            ..
        } => vec![
            p("type", str_any(style.as_str())),
            p("checked", Any::Bool(*checked)),
            p("collapsed", Any::Bool(*collapsed)),
        ],
        BlockProps::Code {
            language,
            wrap,
            caption,
            ..
        } => vec![
            p("language", opt_str(language)),
            p("wrap", Any::Bool(*wrap)),
            p("caption", opt_str(caption)),
        ],
        BlockProps::Callout { emoji, .. } => vec![p("emoji", str_any(emoji))],
        BlockProps::Latex { latex } => vec![p("latex", str_any(latex))],
        BlockProps::Table(table) => {
            let mut out = Vec::new();
            for row in &table.rows {
                out.push(p(&format!("rows.{}.rowId", row.id), str_any(&row.id)));
                out.push(p(&format!("rows.{}.order", row.id), str_any(&row.order)));
            }
            for column in &table.columns {
                out.push(p(
                    &format!("columns.{}.columnId", column.id),
                    str_any(&column.id),
                ));
                out.push(p(
                    &format!("columns.{}.order", column.id),
                    str_any(&column.order),
                ));
            }
            out
        }
        BlockProps::Bookmark {
            url,
            style,
            title,
            description,
            caption,
        } => vec![
            p("url", str_any(url)),
            p("style", str_any(style.as_str())),
            p("title", opt_str(title)),
            p("description", opt_str(description)),
            p("caption", opt_str(caption)),
        ],
        BlockProps::Image {
            source_id,
            caption,
            width,
            height,
        } => vec![
            p("sourceId", str_any(source_id)),
            p("caption", opt_str(caption)),
            p("width", opt_f64(*width)),
            p("height", opt_f64(*height)),
        ],
        BlockProps::Attachment {
            source_id,
            name,
            size,
            mime,
            caption,
        } => vec![
            p("sourceId", str_any(source_id)),
            p("name", str_any(name)),
            p("size", Any::Number(*size as f64)),
            p("type", str_any(mime)),
            p("caption", opt_str(caption)),
        ],
        BlockProps::UrlEmbed { url, caption, .. } => vec![
            p("url", str_any(url)),
            p("caption", opt_str(caption)),
        ],
        BlockProps::EmbedHtml { html } => vec![p("html", str_any(html))],
        BlockProps::LinkedDoc {
            page_id,
            title,
            caption,
        } => vec![
            p("pageId", str_any(page_id)),
            p("title", opt_str(title)),
            p("caption", opt_str(caption)),
        ],
        BlockProps::SyncedDoc { page_id } => vec![p("pageId", str_any(page_id))],
        BlockProps::SurfaceRef {
            reference,
            ref_flavour,
            caption,
        } => vec![
            p("reference", str_any(reference)),
            p("refFlavour", str_any(ref_flavour)),
            p("caption", opt_str(caption)),
        ],
        BlockProps::Frame {
            xywh, background, ..
        } => vec![
            p("xywh", str_any(xywh)),
            p("background", str_any(background)),
        ],
        BlockProps::EdgelessText { xywh } => vec![p("xywh", str_any(xywh))],
        BlockProps::Page { .. }
        | BlockProps::Surface
        | BlockProps::Divider
        | BlockProps::Database { .. }
        | BlockProps::Unknown { .. } => Vec::new(),
    }
}

/// Rich-text `prop:*` values for a block.
fn text_props(props: &BlockProps) -> Vec<(String, &RichText)> {
    match props {
        BlockProps::Page { title }
        | BlockProps::Database { title }
        | BlockProps::Frame { title, .. } => vec![("prop:title".to_string(), title)],
        BlockProps::Table(table) => table
            .cells
            .iter()
            .map(|(key, text)| (format!("prop:cells.{key}.text"), text))
            .collect(),
        other => other
            .text()
            .map(|text| vec![("prop:text".to_string(), text)])
            .unwrap_or_default(),
    }
}

fn read_table<T: ReadTxn>(txn: &T, map: &MapRef) -> TableData {
    let mut rows: BTreeMap<String, String> = BTreeMap::new();
    let mut columns: BTreeMap<String, String> = BTreeMap::new();
    let mut cells = BTreeMap::new();

    for (key, value) in map.iter(txn) {
        let Some(rest) = key.strip_prefix("prop:") else {
            continue;
        };
        if let Some(row) = rest.strip_prefix("rows.").and_then(|r| r.strip_suffix(".order")) {
            if let Out::Any(Any::String(order)) = value {
                rows.insert(row.to_string(), order.to_string());
            }
        } else if let Some(col) = rest
            .strip_prefix("columns.")
            .and_then(|c| c.strip_suffix(".order"))
        {
            if let Out::Any(Any::String(order)) = value {
                columns.insert(col.to_string(), order.to_string());
            }
        } else if let Some(cell) = rest
            .strip_prefix("cells.")
            .and_then(|c| c.strip_suffix(".text"))
        {
            let text = match value {
                Out::YText(text) => RichText::read(txn, &text),
                Out::Any(Any::String(s)) => RichText::plain(s.to_string()),
                _ => continue,
            };
            cells.insert(cell.to_string(), text);
        }
    }

    let axis = |(id, order): (String, String)| TableAxis { id, order };
    TableData {
        rows: rows.into_iter().map(axis).collect(),
        columns: columns.into_iter().map(axis).collect(),
        cells,
    }
}

fn read_props<T: ReadTxn>(txn: &T, map: &MapRef, flavour_name: &str) -> BlockProps {
    let s = |key: &str| get_str(txn, map, &format!("prop:{key}"));
    let b = |key: &str| get_bool(txn, map, &format!("prop:{key}")).unwrap_or(false);
    let text = || get_rich(txn, map, "prop:text");

    let Some(flavour) = Flavour::from_str(flavour_name) else {
        return BlockProps::Unknown {
            flavour: flavour_name.to_string(),
        };
    };
    let embed = |embed: UrlEmbed| BlockProps::UrlEmbed {
        embed,
        url: s("url").unwrap_or_default(),
        caption: s("caption"),
    };

    match flavour {
        Flavour::Page => BlockProps::Page {
            title: get_rich(txn, map, "prop:title"),
        },
        Flavour::Surface => BlockProps::Surface,
        Flavour::Note => BlockProps::Note {
            xywh: s("xywh").unwrap_or_else(|| crate::block::DEFAULT_NOTE_XYWH.to_string()),
            background: s("background").unwrap_or_default(),
            index: s("index").unwrap_or_else(|| "a0".to_string()),
            hidden: b("hidden"),
            display_mode: s("displayMode").unwrap_or_else(|| "both".to_string()),
        },
        Flavour::Paragraph => BlockProps::Paragraph {
            kind: s("type")
                .and_then(|t| ParagraphType::from_str(&t))
                .unwrap_or(ParagraphType::Text),
            text: text(),
        },
        Flavour::List => BlockProps::List {
            style: s("type")
                .and_then(|t| ListStyle::from_str(&t))
                .unwrap_or(ListStyle::Bulleted),
            checked: b("checked"),
            collapsed: b("collapsed"),
            text: text(),
        },
        Flavour::Code => BlockProps::Code {
            language: s("language").filter(|l| !l.is_empty()),
            wrap: b("wrap"),
            caption: s("caption"),
            text: text(),
        },
        Flavour::Divider => BlockProps::Divider,
        Flavour::Callout => BlockProps::Callout {
            emoji: s("emoji").unwrap_or_default(),
            text: text(),
        },
        Flavour::Latex => BlockProps::Latex {
            latex: s("latex").unwrap_or_default(),
        },
        Flavour::Table => BlockProps::Table(read_table(txn, map)),
        Flavour::Bookmark => BlockProps::Bookmark {
            url: s("url").unwrap_or_default(),
            style: s("style")
                .and_then(|v| BookmarkStyle::from_str(&v))
                .unwrap_or(BookmarkStyle::Horizontal),
            title: s("title"),
            description: s("description"),
            caption: s("caption"),
        },
        Flavour::Image => BlockProps::Image {
            source_id: s("sourceId").unwrap_or_default(),
            caption: s("caption"),
            width: get_f64(txn, map, "prop:width"),
            height: get_f64(txn, map, "prop:height"),
        },
        Flavour::Attachment => BlockProps::Attachment {
            source_id: s("sourceId").unwrap_or_default(),
            name: s("name").unwrap_or_default(),
            size: get_f64(txn, map, "prop:size").unwrap_or(0.0).max(0.0) as u64,
            mime: s("type").unwrap_or_default(),
            caption: s("caption"),
        },
        Flavour::EmbedYoutube => embed(UrlEmbed::Youtube),
        Flavour::EmbedGithub => embed(UrlEmbed::Github),
        Flavour::EmbedFigma => embed(UrlEmbed::Figma),
        Flavour::EmbedLoom => embed(UrlEmbed::Loom),
        Flavour::EmbedHtml => BlockProps::EmbedHtml {
            html: s("html").unwrap_or_default(),
        },
        Flavour::EmbedLinkedDoc => BlockProps::LinkedDoc {
            page_id: s("pageId").unwrap_or_default(),
            title: s("title"),
            caption: s("caption"),
        },
        Flavour::EmbedSyncedDoc => BlockProps::SyncedDoc {
            page_id: s("pageId").unwrap_or_default(),
        },
        Flavour::Database => BlockProps::Database {
            title: get_rich(txn, map, "prop:title"),
        },
        Flavour::SurfaceRef => BlockProps::SurfaceRef {
            reference: s("reference").unwrap_or_default(),
            ref_flavour: s("refFlavour").unwrap_or_default(),
            caption: s("caption"),
        },
        Flavour::Frame => BlockProps::Frame {
            title: get_rich(txn, map, "prop:title"),
            xywh: s("xywh").unwrap_or_default(),
            background: s("background").unwrap_or_default(),
        },
        Flavour::EdgelessText => BlockProps::EdgelessText {
            xywh: s("xywh").unwrap_or_default(),
        },
    }
}

fn read_block<T: ReadTxn>(txn: &T, key: &str, map: &MapRef) -> Block {
    let id = get_str(txn, map, SYS_ID).unwrap_or_else(|| key.to_string());
    let flavour = get_str(txn, map, SYS_FLAVOUR).unwrap_or_default();
    Block {
        id: BlockId::new(id),
        parent: None,
        children: get_string_list(txn, map, SYS_CHILDREN)
            .into_iter()
            .map(BlockId::new)
            .collect(),
        props: read_props(txn, map, &flavour),
    }
}

// =============================================================================
// Load / commit
// =============================================================================

/// Materialize the block tree held by `doc`.
pub fn load_tree(doc: &Doc) -> BlockTree {
    let mut txn = doc.transact_mut();
    let blocks = txn.get_or_insert_map(BLOCKS);
    let loaded: Vec<Block> = blocks
        .iter(&txn)
        .filter_map(|(key, value)| match value {
            Out::YMap(map) => Some(read_block(&txn, key, &map)),
            _ => None,
        })
        .collect();
    BlockTree::from_blocks(loaded)
}

fn write_scalars(txn: &mut TransactionMut, map: &MapRef, values: Vec<(String, Any)>) {
    for (key, value) in values {
        let unchanged = matches!(map.get(&*txn, &key), Some(Out::Any(ref current)) if *current == value);
        if !unchanged {
            map.insert(txn, key, value);
        }
    }
}

fn write_texts(txn: &mut TransactionMut, map: &MapRef, values: Vec<(String, &RichText)>) {
    for (key, value) in values {
        match map.get(&*txn, &key) {
            Some(Out::YText(text)) => {
                if RichText::read(&*txn, &text) != *value {
                    value.write(txn, &text);
                }
            }
            _ => {
                let text = map.insert(txn, key, TextPrelim::new(""));
                value.write(txn, &text);
            }
        }
    }
}

fn remove_stale_table_keys(txn: &mut TransactionMut, map: &MapRef, table: &TableData) {
    let mut live: HashSet<String> = HashSet::new();
    for (key, _) in scalar_props(&BlockProps::Table(table.clone())) {
        live.insert(key);
    }
    for key in table.cells.keys() {
        live.insert(format!("prop:cells.{key}.text"));
    }
    let stale: Vec<String> = map
        .iter(&*txn)
        .map(|(key, _)| key.to_string())
        .filter(|key| {
            ["prop:rows.", "prop:columns.", "prop:cells."]
                .iter()
                .any(|prefix| key.starts_with(prefix))
                && !live.contains(key)
        })
        .collect();
    for key in stale {
        map.remove(txn, &key);
    }
}

fn write_props(txn: &mut TransactionMut, map: &MapRef, props: &BlockProps) {
    if let BlockProps::Table(table) = props {
        remove_stale_table_keys(txn, map, table);
    }
    write_scalars(txn, map, scalar_props(props));
    write_texts(txn, map, text_props(props));
}

/// Bring `sys:children` in line with `desired` using the smallest
/// prefix/suffix-preserving edit.
fn sync_children(txn: &mut TransactionMut, map: &MapRef, desired: &[BlockId]) {
    let array: ArrayRef = match map.get(&*txn, SYS_CHILDREN) {
        Some(Out::YArray(array)) => array,
        _ => map.insert(txn, SYS_CHILDREN, ArrayPrelim::default()),
    };
    let current: Vec<String> = array
        .iter(&*txn)
        .map(|v| match v {
            Out::Any(Any::String(s)) => s.to_string(),
            _ => String::new(),
        })
        .collect();

    let prefix = current
        .iter()
        .zip(desired)
        .take_while(|(a, b)| a.as_str() == b.as_str())
        .count();
    let max_suffix = current.len().min(desired.len()) - prefix;
    let suffix = current
        .iter()
        .rev()
        .zip(desired.iter().rev())
        .take(max_suffix)
        .take_while(|(a, b)| a.as_str() == b.as_str())
        .count();

    let remove = current.len() - prefix - suffix;
    if remove > 0 {
        array.remove_range(txn, prefix as u32, remove as u32);
    }
    for (offset, id) in desired[prefix..desired.len() - suffix].iter().enumerate() {
        array.insert(txn, (prefix + offset) as u32, str_any(id.as_str()));
    }
}

fn write_new_block(txn: &mut TransactionMut, blocks: &MapRef, block: &Block) {
    let map: MapRef = blocks.insert(txn, block.id.as_str(), MapPrelim::default());
    map.insert(txn, SYS_ID, str_any(block.id.as_str()));
    map.insert(txn, SYS_FLAVOUR, str_any(block.props.flavour_name()));
    map.insert(txn, SYS_VERSION, Any::Number(version_of(block.flavour())));
    let children: ArrayRef = map.insert(txn, SYS_CHILDREN, ArrayPrelim::default());
    for child in &block.children {
        children.push_back(txn, str_any(child.as_str()));
    }
    if block.flavour() == Some(Flavour::Surface) {
        map.insert(txn, "prop:elements", MapPrelim::default());
    }
    write_props(txn, &map, &block.props);
}

/// Replay the tree's pending changes into `doc` in one transaction.
///
/// Returns the number of journal entries applied.
pub fn commit(doc: &Doc, tree: &mut BlockTree) -> usize {
    let changes = tree.take_changes();
    if changes.is_empty() {
        return 0;
    }
    let created: HashSet<&BlockId> = changes
        .iter()
        .filter_map(|c| match c {
            BlockChange::Created(id) => Some(id),
            _ => None,
        })
        .collect();

    let mut txn = doc.transact_mut();
    let blocks = txn.get_or_insert_map(BLOCKS);
    let mut title_changed = false;

    for change in &changes {
        let id = change.block_id();
        let is_root = tree.root() == Some(id);
        match change {
            BlockChange::Removed(id) => {
                blocks.remove(&mut txn, id.as_str());
            }
            BlockChange::Created(id) => {
                if let Some(block) = tree.get(id) {
                    write_new_block(&mut txn, &blocks, block);
                    title_changed |= is_root;
                }
            }
            BlockChange::ChildrenChanged(id) if !created.contains(id) => {
                if let (Some(block), Some(Out::YMap(map))) =
                    (tree.get(id), blocks.get(&txn, id.as_str()))
                {
                    sync_children(&mut txn, &map, &block.children);
                }
            }
            BlockChange::PropsChanged(id) if !created.contains(id) => {
                if let (Some(block), Some(Out::YMap(map))) =
                    (tree.get(id), blocks.get(&txn, id.as_str()))
                {
                    write_props(&mut txn, &map, &block.props);
                    title_changed |= is_root;
                }
            }
            _ => {}
        }
    }

    if title_changed {
        let meta = txn.get_or_insert_map(META);
        meta.insert(&mut txn, "title", str_any(&tree.title()));
    }

    debug!(changes = changes.len(), "committed block changes");
    changes.len()
}

/// Give an empty tree the page/surface/note skeleton; returns the note id.
pub fn scaffold_doc(tree: &mut BlockTree, title: &str) -> Result<BlockId> {
    tree.ensure_page();
    tree.set_title(title);
    tree.ensure_surface();
    tree.ensure_note()
}

// =============================================================================
// Document metadata
// =============================================================================

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocMeta {
    pub id: String,
    pub title: String,
    pub create_date: Option<i64>,
    pub tags: Vec<String>,
}

pub fn read_meta(doc: &Doc) -> DocMeta {
    let mut txn = doc.transact_mut();
    let meta = txn.get_or_insert_map(META);
    DocMeta {
        id: get_str(&txn, &meta, "id").unwrap_or_default(),
        title: get_str(&txn, &meta, "title").unwrap_or_default(),
        create_date: get_f64(&txn, &meta, "createDate").map(|n| n as i64),
        tags: get_string_list(&txn, &meta, "tags"),
    }
}

pub fn write_meta(doc: &Doc, value: &DocMeta) {
    let mut txn = doc.transact_mut();
    let meta = txn.get_or_insert_map(META);
    write_scalars(
        &mut txn,
        &meta,
        vec![
            ("id".to_string(), str_any(&value.id)),
            ("title".to_string(), str_any(&value.title)),
            (
                "createDate".to_string(),
                value
                    .create_date
                    .map(|d| Any::Number(d as f64))
                    .unwrap_or(Any::Null),
            ),
        ],
    );
    if get_string_list(&txn, &meta, "tags") != value.tags || meta.get(&txn, "tags").is_none() {
        let tags: ArrayRef = meta.insert(&mut txn, "tags", ArrayPrelim::default());
        for tag in &value.tags {
            tags.push_back(&mut txn, str_any(tag));
        }
    }
}

// =============================================================================
// Update capture
// =============================================================================

pub fn state_vector(doc: &Doc) -> StateVector {
    doc.transact().state_vector()
}

/// State vector plus delete set. Removals only grow the delete set, so this
/// is what tells whether a doc changed at all.
pub fn snapshot(doc: &Doc) -> Snapshot {
    doc.transact().snapshot()
}

/// Everything `doc` knows that a peer at `since` does not.
pub fn encode_diff(doc: &Doc, since: &StateVector) -> Vec<u8> {
    doc.transact().encode_diff_v1(since)
}

pub fn encode_state(doc: &Doc) -> Vec<u8> {
    doc.transact().encode_state_as_update_v1(&StateVector::default())
}

pub fn apply_update(doc: &Doc, bytes: &[u8]) -> Result<()> {
    let update = Update::decode_v1(bytes).map_err(|e| CoreError::Crdt(e.to_string()))?;
    doc.transact_mut()
        .apply_update(update)
        .map_err(|e| CoreError::Crdt(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::{create_block, BlockInput};
    use crate::rich_text::{AttrValue, Mark, TextRun};
    use crate::tree::Placement;

    fn round_trip(doc: &Doc) -> BlockTree {
        let replica = Doc::new();
        apply_update(&replica, &encode_state(doc)).unwrap();
        load_tree(&replica)
    }

    #[test]
    fn test_commit_and_reload() {
        let doc = Doc::new();
        let mut tree = BlockTree::new();
        let note = scaffold_doc(&mut tree, "Plan").unwrap();
        let input = BlockInput {
            checked: Some(true),
            ..BlockInput::new("todo").with_text("ship")
        };
        let todo = tree
            .insert(create_block(&input, true).unwrap(), &Placement::Default)
            .unwrap();
        commit(&doc, &mut tree);

        let loaded = round_trip(&doc);
        assert_eq!(loaded.title(), "Plan");
        assert_eq!(loaded.parent_of(&todo), Some(&note));
        assert_eq!(loaded.get(&todo).unwrap().props, tree.get(&todo).unwrap().props);
        assert_eq!(read_meta(&doc).title, "Plan");
    }

    #[test]
    fn test_commit_is_a_single_update() {
        let doc = Doc::new();
        let mut tree = BlockTree::new();
        scaffold_doc(&mut tree, "").unwrap();
        commit(&doc, &mut tree);

        let base = encode_state(&doc);
        let before = state_vector(&doc);
        let mut tree = load_tree(&doc);
        for text in ["one", "two", "three"] {
            tree.insert(
                Block::new(BlockProps::paragraph(ParagraphType::Text, text.into())),
                &Placement::Default,
            )
            .unwrap();
        }
        assert_eq!(commit(&doc, &mut tree), 4);

        let replica = Doc::new();
        apply_update(&replica, &base).unwrap();
        apply_update(&replica, &encode_diff(&doc, &before)).unwrap();
        let texts: Vec<String> = load_tree(&replica)
            .top_level_blocks()
            .iter()
            .filter_map(|b| b.text().map(RichText::to_plain))
            .collect();
        assert_eq!(texts, ["one", "two", "three"]);
    }

    #[test]
    fn test_removal_moves_snapshot() {
        let doc = Doc::new();
        let mut tree = BlockTree::new();
        scaffold_doc(&mut tree, "").unwrap();
        let gone = tree
            .insert(
                Block::new(BlockProps::paragraph(ParagraphType::Text, "gone".into())),
                &Placement::Default,
            )
            .unwrap();
        commit(&doc, &mut tree);

        let before = snapshot(&doc);
        let mut tree = load_tree(&doc);
        commit(&doc, &mut tree);
        assert_eq!(snapshot(&doc), before);

        tree.remove_subtree(&gone).unwrap();
        commit(&doc, &mut tree);
        assert_ne!(snapshot(&doc), before);
        assert!(round_trip(&doc).get(&gone).is_none());
    }

    #[test]
    fn test_noop_commit_keeps_state_vector() {
        let doc = Doc::new();
        let mut tree = BlockTree::new();
        scaffold_doc(&mut tree, "t").unwrap();
        commit(&doc, &mut tree);

        let before = state_vector(&doc);
        let mut reloaded = load_tree(&doc);
        assert_eq!(commit(&doc, &mut reloaded), 0);
        assert_eq!(state_vector(&doc), before);
    }

    #[test]
    fn test_text_is_spliced_not_replaced() {
        let doc = Doc::new();
        let mut tree = BlockTree::new();
        scaffold_doc(&mut tree, "").unwrap();
        let id = tree
            .insert(
                Block::new(BlockProps::paragraph(ParagraphType::Text, "draft".into())),
                &Placement::Default,
            )
            .unwrap();
        commit(&doc, &mut tree);

        let original = {
            let mut txn = doc.transact_mut();
            let blocks = txn.get_or_insert_map(BLOCKS);
            let Some(Out::YMap(map)) = blocks.get(&txn, id.as_str()) else {
                panic!("block missing");
            };
            let Some(Out::YText(text)) = map.get(&txn, "prop:text") else {
                panic!("text missing");
            };
            text
        };

        let mut tree = load_tree(&doc);
        let update = crate::block::BlockUpdate {
            text: Some("final".into()),
            ..Default::default()
        };
        tree.update(&id, &update, true).unwrap();
        commit(&doc, &mut tree);

        // The handle taken before the edit still sees the new content.
        let txn = doc.transact();
        assert_eq!(original.get_string(&txn), "final");
    }

    #[test]
    fn test_formatted_text_survives_reload() {
        let doc = Doc::new();
        let mut tree = BlockTree::new();
        scaffold_doc(&mut tree, "").unwrap();
        let text = RichText::from_runs(vec![
            TextRun::plain("bold").with(Mark::Bold, AttrValue::Bool(true)),
            TextRun::plain(" plain"),
        ]);
        let id = tree
            .insert(
                Block::new(BlockProps::paragraph(ParagraphType::Text, text.clone())),
                &Placement::Default,
            )
            .unwrap();
        commit(&doc, &mut tree);

        let loaded = round_trip(&doc);
        assert_eq!(loaded.get(&id).unwrap().text(), Some(&text));
    }

    #[test]
    fn test_table_round_trips_through_flat_keys() {
        let doc = Doc::new();
        let mut tree = BlockTree::new();
        scaffold_doc(&mut tree, "").unwrap();
        let input = BlockInput {
            rows: Some(vec![vec!["a".into(), "b".into()], vec!["c".into(), "d".into()]]),
            ..BlockInput::new("table")
        };
        let id = tree
            .insert(create_block(&input, true).unwrap(), &Placement::Default)
            .unwrap();
        commit(&doc, &mut tree);

        let loaded = round_trip(&doc);
        let Some(BlockProps::Table(table)) = loaded.get(&id).map(|b| &b.props) else {
            panic!("expected table");
        };
        let grid: Vec<Vec<String>> = table
            .to_grid()
            .iter()
            .map(|row| row.iter().map(RichText::to_plain).collect())
            .collect();
        assert_eq!(grid, vec![vec!["a", "b"], vec!["c", "d"]]);
    }

    #[test]
    fn test_children_edits_are_minimal() {
        let doc = Doc::new();
        let mut txn = doc.transact_mut();
        let root = txn.get_or_insert_map("m");
        let ids: Vec<BlockId> = ["a", "b", "c"].into_iter().map(BlockId::from).collect();
        sync_children(&mut txn, &root, &ids);
        let desired: Vec<BlockId> = ["a", "x", "c"].into_iter().map(BlockId::from).collect();
        sync_children(&mut txn, &root, &desired);
        assert_eq!(get_string_list(&txn, &root, SYS_CHILDREN), vec!["a", "x", "c"]);
    }
}
