//! Sidebar folder hierarchy stored in the workspace's folder doc.
//!
//! Every entry is its own root-level map named after the entry id. Siblings
//! are ordered by their fractional `index`; deletion is a soft delete that
//! sets `$$DELETED` and leaves the other keys in place.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use yrs::{Any, Doc, Map, MapRef, Out, ReadTxn, Transact, TransactionMut, WriteTxn};

use crate::error::{CoreError, Result};
use crate::fractional::index_between;

/// Doc id of the folder doc inside a workspace.
pub const FOLDERS_DOC_ID: &str = "db$folders";

const DELETED_KEY: &str = "$$DELETED";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryType {
    Folder,
    Doc,
    Tag,
    Collection,
}

impl EntryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryType::Folder => "folder",
            EntryType::Doc => "doc",
            EntryType::Tag => "tag",
            EntryType::Collection => "collection",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "folder" => Some(EntryType::Folder),
            "doc" => Some(EntryType::Doc),
            "tag" => Some(EntryType::Tag),
            "collection" => Some(EntryType::Collection),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FolderEntry {
    pub id: String,
    pub parent_id: Option<String>,
    #[serde(rename = "type")]
    pub entry_type: EntryType,
    /// Folder name, or the id of the linked doc/tag/collection.
    pub data: String,
    pub index: String,
}

/// One item of a [`FolderTree::batch`] call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "camelCase")]
pub enum FolderOp {
    #[serde(rename_all = "camelCase")]
    CreateFolder {
        parent_id: Option<String>,
        name: String,
        #[serde(default)]
        index: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    AddLink {
        parent_id: Option<String>,
        #[serde(rename = "type")]
        entry_type: EntryType,
        data: String,
    },
    Rename { id: String, name: String },
    #[serde(rename_all = "camelCase")]
    Move {
        id: String,
        parent_id: Option<String>,
        #[serde(default)]
        after: Option<String>,
    },
    Delete { id: String },
}

fn read_str<T: ReadTxn>(txn: &T, map: &MapRef, key: &str) -> Option<String> {
    match map.get(txn, key)? {
        Out::Any(Any::String(s)) => Some(s.to_string()),
        _ => None,
    }
}

fn read_entry<T: ReadTxn>(txn: &T, name: &str, map: &MapRef) -> Option<FolderEntry> {
    if matches!(map.get(txn, DELETED_KEY), Some(Out::Any(Any::Bool(true)))) {
        return None;
    }
    let entry_type = EntryType::parse(&read_str(txn, map, "type")?)?;
    Some(FolderEntry {
        id: read_str(txn, map, "id").unwrap_or_else(|| name.to_string()),
        parent_id: read_str(txn, map, "parentId"),
        entry_type,
        data: read_str(txn, map, "data").unwrap_or_default(),
        index: read_str(txn, map, "index").unwrap_or_default(),
    })
}

fn opt_any(value: &Option<String>) -> Any {
    match value {
        Some(s) => Any::from(s.as_str()),
        None => Any::Null,
    }
}

fn write_entry(txn: &mut TransactionMut, entry: &FolderEntry) {
    let map = txn.get_or_insert_map(entry.id.as_str());
    map.insert(txn, "id", Any::from(entry.id.as_str()));
    map.insert(txn, "parentId", opt_any(&entry.parent_id));
    map.insert(txn, "type", Any::from(entry.entry_type.as_str()));
    map.insert(txn, "data", Any::from(entry.data.as_str()));
    map.insert(txn, "index", Any::from(entry.index.as_str()));
}

/// Live entries of the folder doc, with write-through mutations.
pub struct FolderTree<'d> {
    doc: &'d Doc,
    entries: HashMap<String, FolderEntry>,
}

impl<'d> FolderTree<'d> {
    pub fn load(doc: &'d Doc) -> Self {
        let mut txn = doc.transact_mut();
        let names: Vec<String> = txn.root_refs().map(|(name, _)| name.to_string()).collect();
        let mut entries = HashMap::new();
        for name in names {
            let map = txn.get_or_insert_map(name.as_str());
            if let Some(entry) = read_entry(&txn, &name, &map) {
                entries.insert(entry.id.clone(), entry);
            }
        }
        debug!(entries = entries.len(), "loaded folder tree");
        Self { doc, entries }
    }

    pub fn entries(&self) -> impl Iterator<Item = &FolderEntry> {
        self.entries.values()
    }

    pub fn get(&self, id: &str) -> Option<&FolderEntry> {
        self.entries.get(id)
    }

    fn require(&self, id: &str) -> Result<&FolderEntry> {
        self.get(id).ok_or_else(|| CoreError::not_found("folder entry", id))
    }

    /// Children of `parent` (`None` for the root level), ordered by index.
    pub fn children(&self, parent: Option<&str>) -> Vec<&FolderEntry> {
        let mut children: Vec<&FolderEntry> = self
            .entries
            .values()
            .filter(|e| e.parent_id.as_deref() == parent)
            .collect();
        children.sort_by(|a, b| a.index.cmp(&b.index).then_with(|| a.id.cmp(&b.id)));
        children
    }

    pub fn roots(&self) -> Vec<&FolderEntry> {
        self.children(None)
    }

    fn require_host(&self, parent: Option<&str>) -> Result<()> {
        let Some(parent) = parent else {
            return Ok(());
        };
        let entry = self.require(parent)?;
        if entry.entry_type != EntryType::Folder {
            return Err(CoreError::validation(format!(
                "{parent} is a {} entry; only folders can contain entries",
                entry.entry_type.as_str()
            )));
        }
        Ok(())
    }

    fn append_index(&self, parent: Option<&str>, skip: Option<&str>) -> Result<String> {
        let last = self
            .children(parent)
            .into_iter()
            .filter(|e| Some(e.id.as_str()) != skip)
            .last()
            .map(|e| e.index.clone());
        index_between(last.as_deref(), None)
    }

    fn insert_entry(&mut self, entry: FolderEntry) -> String {
        {
            let mut txn = self.doc.transact_mut();
            write_entry(&mut txn, &entry);
        }
        let id = entry.id.clone();
        self.entries.insert(id.clone(), entry);
        id
    }

    pub fn create_folder(
        &mut self,
        parent: Option<&str>,
        name: &str,
        index: Option<String>,
    ) -> Result<String> {
        if name.trim().is_empty() {
            return Err(CoreError::validation("folder name must not be empty"));
        }
        self.require_host(parent)?;
        let index = match index {
            Some(index) if !index.is_empty() => index,
            _ => self.append_index(parent, None)?,
        };
        Ok(self.insert_entry(FolderEntry {
            id: uuid::Uuid::new_v4().to_string(),
            parent_id: parent.map(str::to_string),
            entry_type: EntryType::Folder,
            data: name.to_string(),
            index,
        }))
    }

    /// Link a doc, tag or collection under `parent`.
    pub fn add_link(
        &mut self,
        parent: Option<&str>,
        entry_type: EntryType,
        data: &str,
    ) -> Result<String> {
        if entry_type == EntryType::Folder {
            return Err(CoreError::validation("use create_folder to add folders"));
        }
        if data.is_empty() {
            return Err(CoreError::validation("link target must not be empty"));
        }
        self.require_host(parent)?;
        let index = self.append_index(parent, None)?;
        Ok(self.insert_entry(FolderEntry {
            id: uuid::Uuid::new_v4().to_string(),
            parent_id: parent.map(str::to_string),
            entry_type,
            data: data.to_string(),
            index,
        }))
    }

    /// Rename a folder. Returns `false` when the name was already `name`.
    pub fn rename(&mut self, id: &str, name: &str) -> Result<bool> {
        if name.trim().is_empty() {
            return Err(CoreError::validation("folder name must not be empty"));
        }
        let entry = self.require(id)?;
        if entry.entry_type != EntryType::Folder {
            return Err(CoreError::validation(format!("{id} is not a folder")));
        }
        if entry.data == name {
            return Ok(false);
        }
        {
            let mut txn = self.doc.transact_mut();
            let map = txn.get_or_insert_map(id);
            map.insert(&mut txn, "data", Any::from(name));
        }
        if let Some(entry) = self.entries.get_mut(id) {
            entry.data = name.to_string();
        }
        Ok(true)
    }

    /// Whether `ancestor` is `id` or above it. Concurrent moves can merge
    /// into a parent cycle; a walk that revisits an entry counts as a hit.
    fn is_ancestor<'a>(&'a self, ancestor: &str, mut id: Option<&'a str>) -> bool {
        let mut seen = HashSet::new();
        while let Some(current) = id {
            if current == ancestor || !seen.insert(current) {
                return true;
            }
            id = self.get(current).and_then(|e| e.parent_id.as_deref());
        }
        false
    }

    /// Move `id` under `new_parent`, directly after sibling `after`, or to
    /// the end when `after` is `None`.
    pub fn move_entry(
        &mut self,
        id: &str,
        new_parent: Option<&str>,
        after: Option<&str>,
    ) -> Result<()> {
        self.require(id)?;
        self.require_host(new_parent)?;
        if self.is_ancestor(id, new_parent) {
            return Err(CoreError::validation(format!(
                "cannot move {id} into itself or one of its descendants"
            )));
        }

        let index = match after {
            None => self.append_index(new_parent, Some(id))?,
            Some(after) => {
                let siblings: Vec<&FolderEntry> = self
                    .children(new_parent)
                    .into_iter()
                    .filter(|e| e.id != id)
                    .collect();
                let position = siblings
                    .iter()
                    .position(|e| e.id == after)
                    .ok_or_else(|| CoreError::not_found("sibling entry", after))?;
                let lower = siblings[position].index.as_str();
                let upper = siblings.get(position + 1).map(|e| e.index.as_str());
                index_between(Some(lower), upper)?
            }
        };

        {
            let mut txn = self.doc.transact_mut();
            let map = txn.get_or_insert_map(id);
            map.insert(&mut txn, "parentId", opt_any(&new_parent.map(str::to_string)));
            map.insert(&mut txn, "index", Any::from(index.as_str()));
        }
        if let Some(entry) = self.entries.get_mut(id) {
            entry.parent_id = new_parent.map(str::to_string);
            entry.index = index;
        }
        Ok(())
    }

    /// Soft-delete `id`; folders take their whole subtree with them,
    /// deepest entries first. Returns the deleted ids.
    pub fn delete(&mut self, id: &str) -> Result<Vec<String>> {
        self.require(id)?;
        let mut order = Vec::new();
        self.collect_post_order(id, &mut HashSet::new(), &mut order);

        {
            let mut txn = self.doc.transact_mut();
            for target in &order {
                let map = txn.get_or_insert_map(target.as_str());
                map.insert(&mut txn, DELETED_KEY, Any::Bool(true));
            }
        }
        for target in &order {
            self.entries.remove(target);
        }
        Ok(order)
    }

    fn collect_post_order(&self, id: &str, seen: &mut HashSet<String>, out: &mut Vec<String>) {
        if !seen.insert(id.to_string()) {
            return;
        }
        let children: Vec<String> = self
            .children(Some(id))
            .into_iter()
            .map(|e| e.id.clone())
            .collect();
        for child in children {
            self.collect_post_order(&child, seen, out);
        }
        out.push(id.to_string());
    }

    /// Apply every op in order; a failing op is reported and skipped.
    pub fn batch(&mut self, ops: Vec<FolderOp>) -> Vec<Result<String>> {
        ops.into_iter()
            .enumerate()
            .map(|(position, op)| {
                let result = self.apply(op);
                if let Err(err) = &result {
                    warn!(position, error = %err, "folder operation failed");
                }
                result
            })
            .collect()
    }

    fn apply(&mut self, op: FolderOp) -> Result<String> {
        match op {
            FolderOp::CreateFolder {
                parent_id,
                name,
                index,
            } => self.create_folder(parent_id.as_deref(), &name, index),
            FolderOp::AddLink {
                parent_id,
                entry_type,
                data,
            } => self.add_link(parent_id.as_deref(), entry_type, &data),
            FolderOp::Rename { id, name } => self.rename(&id, &name).map(|_| id),
            FolderOp::Move {
                id,
                parent_id,
                after,
            } => self
                .move_entry(&id, parent_id.as_deref(), after.as_deref())
                .map(|_| id),
            FolderOp::Delete { id } => self.delete(&id).map(|_| id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{apply_update, encode_state, state_vector};

    fn names(tree: &FolderTree<'_>, parent: Option<&str>) -> Vec<String> {
        tree.children(parent).iter().map(|e| e.data.clone()).collect()
    }

    #[test]
    fn test_insert_between_existing_siblings() {
        let doc = Doc::new();
        let mut tree = FolderTree::load(&doc);
        let root = tree.create_folder(None, "root", None).unwrap();
        tree.create_folder(Some(&root), "first", Some("a0".into())).unwrap();
        tree.create_folder(Some(&root), "last", Some("a1".into())).unwrap();

        let middle = index_between(Some("a0"), Some("a1")).unwrap();
        tree.create_folder(Some(&root), "middle", Some(middle)).unwrap();

        let reloaded = FolderTree::load(&doc);
        assert_eq!(names(&reloaded, Some(&root)), ["first", "middle", "last"]);
    }

    #[test]
    fn test_append_goes_last() {
        let doc = Doc::new();
        let mut tree = FolderTree::load(&doc);
        tree.create_folder(None, "a", None).unwrap();
        tree.create_folder(None, "b", None).unwrap();
        tree.add_link(None, EntryType::Doc, "doc-1").unwrap();
        assert_eq!(names(&tree, None), ["a", "b", "doc-1"]);
    }

    #[test]
    fn test_move_rejects_cycles_without_mutating() {
        let doc = Doc::new();
        let mut tree = FolderTree::load(&doc);
        let outer = tree.create_folder(None, "outer", None).unwrap();
        let inner = tree.create_folder(Some(&outer), "inner", None).unwrap();

        let before = state_vector(&doc);
        assert!(matches!(
            tree.move_entry(&outer, Some(&inner), None),
            Err(CoreError::Validation(_))
        ));
        assert!(matches!(
            tree.move_entry(&outer, Some(&outer), None),
            Err(CoreError::Validation(_))
        ));
        assert_eq!(state_vector(&doc), before);
        assert_eq!(tree.get(&outer).unwrap().parent_id, None);
    }

    #[test]
    fn test_merged_parent_cycle_is_handled() {
        let doc = Doc::new();
        {
            let mut txn = doc.transact_mut();
            for (id, parent, index) in [("a", "b", "a0"), ("b", "a", "a1")] {
                write_entry(
                    &mut txn,
                    &FolderEntry {
                        id: id.into(),
                        parent_id: Some(parent.into()),
                        entry_type: EntryType::Folder,
                        data: id.into(),
                        index: index.into(),
                    },
                );
            }
        }
        let mut tree = FolderTree::load(&doc);
        let loose = tree.create_folder(None, "loose", None).unwrap();

        assert!(matches!(
            tree.move_entry(&loose, Some("a"), None),
            Err(CoreError::Validation(_))
        ));
        assert_eq!(tree.get(&loose).unwrap().parent_id, None);

        let mut deleted = tree.delete("a").unwrap();
        deleted.sort();
        assert_eq!(deleted, ["a", "b"]);
    }

    #[test]
    fn test_only_folders_host_children() {
        let doc = Doc::new();
        let mut tree = FolderTree::load(&doc);
        let link = tree.add_link(None, EntryType::Doc, "doc-1").unwrap();
        assert!(matches!(
            tree.create_folder(Some(&link), "nested", None),
            Err(CoreError::Validation(_))
        ));
    }

    #[test]
    fn test_move_after_sibling() {
        let doc = Doc::new();
        let mut tree = FolderTree::load(&doc);
        let a = tree.create_folder(None, "a", None).unwrap();
        tree.create_folder(None, "b", None).unwrap();
        let c = tree.create_folder(None, "c", None).unwrap();

        tree.move_entry(&c, None, Some(&a)).unwrap();
        assert_eq!(names(&tree, None), ["a", "c", "b"]);
        assert_eq!(names(&FolderTree::load(&doc), None), ["a", "c", "b"]);
    }

    #[test]
    fn test_rename_same_name_is_a_no_op() {
        let doc = Doc::new();
        let mut tree = FolderTree::load(&doc);
        let id = tree.create_folder(None, "docs", None).unwrap();

        let before = state_vector(&doc);
        assert!(!tree.rename(&id, "docs").unwrap());
        assert_eq!(state_vector(&doc), before);

        assert!(tree.rename(&id, "papers").unwrap());
        assert_eq!(FolderTree::load(&doc).get(&id).unwrap().data, "papers");
    }

    #[test]
    fn test_delete_cascades_as_soft_delete() {
        let doc = Doc::new();
        let mut tree = FolderTree::load(&doc);
        let outer = tree.create_folder(None, "outer", None).unwrap();
        let inner = tree.create_folder(Some(&outer), "inner", None).unwrap();
        let link = tree.add_link(Some(&inner), EntryType::Doc, "doc-1").unwrap();
        let keep = tree.create_folder(None, "keep", None).unwrap();

        let deleted = tree.delete(&outer).unwrap();
        assert_eq!(deleted, vec![link.clone(), inner.clone(), outer.clone()]);

        let replica = Doc::new();
        apply_update(&replica, &encode_state(&doc)).unwrap();
        let reloaded = FolderTree::load(&replica);
        assert_eq!(reloaded.entries().count(), 1);
        assert!(reloaded.get(&keep).is_some());

        let mut txn = replica.transact_mut();
        let map = txn.get_or_insert_map(link.as_str());
        assert_eq!(read_str(&txn, &map, "data").as_deref(), Some("doc-1"));
    }

    #[test]
    fn test_batch_reports_each_item() {
        let doc = Doc::new();
        let mut tree = FolderTree::load(&doc);
        let results = tree.batch(vec![
            FolderOp::CreateFolder {
                parent_id: None,
                name: "ok".into(),
                index: None,
            },
            FolderOp::Rename {
                id: "missing".into(),
                name: "x".into(),
            },
            FolderOp::AddLink {
                parent_id: None,
                entry_type: EntryType::Tag,
                data: "tag-1".into(),
            },
        ]);
        assert!(results[0].is_ok());
        assert!(matches!(results[1], Err(CoreError::NotFound { .. })));
        assert!(results[2].is_ok());
        assert_eq!(tree.entries().count(), 2);
    }

    #[test]
    fn test_folder_op_wire_format() {
        let op: FolderOp = serde_json::from_str(
            r#"{"op":"move","id":"x","parentId":null,"after":"y"}"#,
        )
        .unwrap();
        assert_eq!(
            op,
            FolderOp::Move {
                id: "x".into(),
                parent_id: None,
                after: Some("y".into()),
            }
        );
    }
}
