//! Arena of blocks addressed by id.
//!
//! The tree mirrors the flat `blocks` map of a document: nodes refer to each
//! other only through [`BlockId`]s. Every mutation is recorded in a change
//! journal that [`crate::store::commit`] replays into a single transaction.

use std::collections::{HashMap, HashSet};

use affine_types::{BlockChange, BlockId};
use tracing::debug;

use crate::block::{Block, BlockProps, BlockUpdate};
use crate::error::{CoreError, Result};
use crate::flavour::Flavour;
use crate::fractional::index_between;
use crate::rich_text::RichText;

/// Where a new (or moved) block should go.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Placement {
    /// Under `parent` at `index` (appended when `None`, clamped to the end).
    Parent {
        parent: BlockId,
        index: Option<usize>,
    },
    After(BlockId),
    Before(BlockId),
    /// Type-directed: edgeless blocks under the surface, notes under the
    /// page, everything else at the end of the first note.
    #[default]
    Default,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedPlacement {
    pub parent: BlockId,
    pub index: usize,
}

#[derive(Debug, Clone, Default)]
pub struct BlockTree {
    root: Option<BlockId>,
    blocks: HashMap<BlockId, Block>,
    changes: Vec<BlockChange>,
}

impl BlockTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Assemble a tree from loaded blocks, deriving parent links from the
    /// children lists. Dangling child ids are dropped.
    pub fn from_blocks(blocks: impl IntoIterator<Item = Block>) -> Self {
        let mut map: HashMap<BlockId, Block> =
            blocks.into_iter().map(|b| (b.id.clone(), b)).collect();

        let known: HashSet<BlockId> = map.keys().cloned().collect();
        let mut links = Vec::new();
        for block in map.values_mut() {
            block.children.retain(|c| known.contains(c) && *c != block.id);
            for child in &block.children {
                links.push((child.clone(), block.id.clone()));
            }
        }
        for (child, parent) in links {
            if let Some(block) = map.get_mut(&child) {
                block.parent.get_or_insert(parent);
            }
        }

        let mut pages: Vec<&BlockId> = map
            .values()
            .filter(|b| b.flavour() == Some(Flavour::Page) && b.parent.is_none())
            .map(|b| &b.id)
            .collect();
        pages.sort();
        let root = pages.first().map(|id| (*id).clone());

        Self {
            root,
            blocks: map,
            changes: Vec::new(),
        }
    }

    pub fn root(&self) -> Option<&BlockId> {
        self.root.as_ref()
    }

    pub fn page(&self) -> Option<&Block> {
        self.root.as_ref().and_then(|id| self.blocks.get(id))
    }

    /// Plain title held by the page block.
    pub fn title(&self) -> String {
        match self.page().map(|b| &b.props) {
            Some(BlockProps::Page { title }) => title.to_plain(),
            _ => String::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn get(&self, id: &BlockId) -> Option<&Block> {
        self.blocks.get(id)
    }

    pub fn require(&self, id: &BlockId) -> Result<&Block> {
        self.blocks
            .get(id)
            .ok_or_else(|| CoreError::not_found("block", id.as_str()))
    }

    pub fn blocks(&self) -> impl Iterator<Item = &Block> {
        self.blocks.values()
    }

    pub fn children(&self, id: &BlockId) -> Vec<&Block> {
        self.blocks
            .get(id)
            .map(|b| b.children.iter().filter_map(|c| self.blocks.get(c)).collect())
            .unwrap_or_default()
    }

    pub fn parent_of(&self, id: &BlockId) -> Option<&BlockId> {
        self.blocks.get(id).and_then(|b| b.parent.as_ref())
    }

    pub fn child_index(&self, parent: &BlockId, child: &BlockId) -> Option<usize> {
        self.blocks
            .get(parent)?
            .children
            .iter()
            .position(|c| c == child)
    }

    /// Pre-order ids below `id`, excluding `id` itself.
    pub fn descendants(&self, id: &BlockId) -> Vec<BlockId> {
        let mut out = Vec::new();
        let mut stack: Vec<&BlockId> = match self.blocks.get(id) {
            Some(block) => block.children.iter().rev().collect(),
            None => return out,
        };
        while let Some(next) = stack.pop() {
            if out.contains(next) {
                continue;
            }
            out.push(next.clone());
            if let Some(block) = self.blocks.get(next) {
                stack.extend(block.children.iter().rev());
            }
        }
        out
    }

    /// Every block reachable from the page, in document order.
    pub fn walk(&self) -> Vec<&Block> {
        let Some(root) = &self.root else {
            return Vec::new();
        };
        std::iter::once(root)
            .chain(self.descendants(root).iter())
            .filter_map(|id| self.blocks.get(id))
            .collect::<Vec<_>>()
    }

    pub fn find_by_flavour(&self, flavour: Flavour) -> Vec<&Block> {
        self.walk()
            .into_iter()
            .filter(|b| b.flavour() == Some(flavour))
            .collect()
    }

    pub fn first_by_flavour(&self, flavour: Flavour) -> Option<&Block> {
        self.walk()
            .into_iter()
            .find(|b| b.flavour() == Some(flavour))
    }

    pub fn notes(&self) -> Vec<&Block> {
        self.root
            .as_ref()
            .map(|root| {
                self.children(root)
                    .into_iter()
                    .filter(|b| b.flavour() == Some(Flavour::Note))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Children of every note, in order. These are the units the markdown
    /// renderer maps to line ranges.
    pub fn top_level_blocks(&self) -> Vec<&Block> {
        self.notes()
            .into_iter()
            .flat_map(|note| self.children(&note.id))
            .collect()
    }

    /// Drain the mutation journal.
    pub fn take_changes(&mut self) -> Vec<BlockChange> {
        std::mem::take(&mut self.changes)
    }

    pub fn has_changes(&self) -> bool {
        !self.changes.is_empty()
    }

    fn record(&mut self, change: BlockChange) {
        if !self.changes.contains(&change) {
            self.changes.push(change);
        }
    }

    fn check_host(&self, parent: &Block, flavour: Flavour) -> Result<()> {
        let allowed = parent.flavour().is_some_and(|p| p.can_host(flavour));
        if allowed {
            Ok(())
        } else {
            Err(CoreError::validation(format!(
                "invalid parent: {} cannot contain {}",
                parent.props.flavour_name(),
                flavour.as_str()
            )))
        }
    }

    /// Resolve a placement request into a parent and insertion index.
    ///
    /// The default placement creates the page, surface or note it needs when
    /// the document lacks them.
    pub fn resolve_placement(
        &mut self,
        flavour: Flavour,
        placement: &Placement,
    ) -> Result<ResolvedPlacement> {
        let (parent, index) = match placement {
            Placement::Parent { parent, index } => {
                let block = self
                    .blocks
                    .get(parent)
                    .ok_or_else(|| CoreError::not_found("parent block", parent.as_str()))?;
                let len = block.children.len();
                (parent.clone(), index.unwrap_or(len).min(len))
            }
            Placement::After(sibling) | Placement::Before(sibling) => {
                let parent = self
                    .blocks
                    .get(sibling)
                    .ok_or_else(|| CoreError::not_found("sibling block", sibling.as_str()))?
                    .parent
                    .clone()
                    .ok_or_else(|| {
                        CoreError::validation(format!("block {sibling} has no parent"))
                    })?;
                let position = self.child_index(&parent, sibling).unwrap_or(0);
                let index = match placement {
                    Placement::After(_) => position + 1,
                    _ => position,
                };
                (parent, index)
            }
            Placement::Default => {
                let parent = match flavour {
                    Flavour::Note | Flavour::Surface => self.ensure_page(),
                    f if f.is_edgeless() => self.ensure_surface(),
                    _ => self.ensure_note()?,
                };
                let len = self.blocks.get(&parent).map_or(0, |b| b.children.len());
                (parent, len)
            }
        };

        let host = self.require(&parent)?;
        self.check_host(host, flavour)?;
        Ok(ResolvedPlacement { parent, index })
    }

    pub fn ensure_page(&mut self) -> BlockId {
        if let Some(root) = &self.root {
            return root.clone();
        }
        let mut page = Block::new(BlockProps::Page {
            title: RichText::new(),
        });
        page.parent = None;
        let id = page.id.clone();
        self.blocks.insert(id.clone(), page);
        self.root = Some(id.clone());
        self.record(BlockChange::Created(id.clone()));
        id
    }

    pub fn ensure_surface(&mut self) -> BlockId {
        let page = self.ensure_page();
        if let Some(surface) = self
            .children(&page)
            .into_iter()
            .find(|b| b.flavour() == Some(Flavour::Surface))
        {
            return surface.id.clone();
        }
        let surface = Block::new(BlockProps::Surface);
        let id = surface.id.clone();
        self.attach(&page, 0, surface);
        id
    }

    /// First note under the page, created when the document has none.
    pub fn ensure_note(&mut self) -> Result<BlockId> {
        let page = self.ensure_page();
        if let Some(note) = self.notes().first() {
            return Ok(note.id.clone());
        }
        let index = index_between(None, None)?;
        let note = Block::new(BlockProps::note(index));
        let id = note.id.clone();
        let at = self.blocks.get(&page).map_or(0, |b| b.children.len());
        self.attach(&page, at, note);
        debug!(note = %id, "auto-created note");
        Ok(id)
    }

    fn attach(&mut self, parent: &BlockId, index: usize, mut block: Block) {
        block.parent = Some(parent.clone());
        block.children.clear();
        let id = block.id.clone();
        self.blocks.insert(id.clone(), block);
        if let Some(host) = self.blocks.get_mut(parent) {
            let at = index.min(host.children.len());
            host.children.insert(at, id.clone());
        }
        self.record(BlockChange::Created(id));
        self.record(BlockChange::ChildrenChanged(parent.clone()));
    }

    /// Insert a childless block at an explicit position.
    pub fn insert_at(&mut self, parent: &BlockId, index: usize, block: Block) -> Result<BlockId> {
        let flavour = block.flavour().ok_or_else(|| {
            CoreError::validation(format!(
                "cannot insert block of unknown flavour {}",
                block.props.flavour_name()
            ))
        })?;
        if self.blocks.contains_key(&block.id) {
            return Err(CoreError::validation(format!(
                "block {} already exists",
                block.id
            )));
        }
        let host = self
            .blocks
            .get(parent)
            .ok_or_else(|| CoreError::not_found("parent block", parent.as_str()))?;
        self.check_host(host, flavour)?;

        let id = block.id.clone();
        self.attach(parent, index, block);
        Ok(id)
    }

    pub fn insert(&mut self, block: Block, placement: &Placement) -> Result<BlockId> {
        let flavour = block.flavour().ok_or_else(|| {
            CoreError::validation(format!(
                "cannot insert block of unknown flavour {}",
                block.props.flavour_name()
            ))
        })?;
        let target = self.resolve_placement(flavour, placement)?;
        self.insert_at(&target.parent, target.index, block)
    }

    fn protect(&self, block: &Block, action: &'static str) -> Result<()> {
        match block.flavour() {
            Some(flavour) if flavour.is_structural() => Err(CoreError::StructuralProtection {
                id: block.id.to_string(),
                flavour: flavour.as_str(),
                action,
            }),
            _ => Ok(()),
        }
    }

    /// Delete a block with its whole subtree; returns removed ids, children
    /// before their parents.
    pub fn remove_subtree(&mut self, id: &BlockId) -> Result<Vec<BlockId>> {
        let block = self.require(id)?;
        self.protect(block, "deleted")?;

        let mut removed = self.descendants(id);
        removed.reverse();
        removed.push(id.clone());

        if let Some(parent) = block.parent.clone() {
            if let Some(host) = self.blocks.get_mut(&parent) {
                host.children.retain(|c| c != id);
            }
            self.record(BlockChange::ChildrenChanged(parent));
        }
        for gone in &removed {
            self.blocks.remove(gone);
            self.changes.retain(|c| c.block_id() != gone);
            self.record(BlockChange::Removed(gone.clone()));
        }
        Ok(removed)
    }

    /// Move a block (and its subtree) to a new position.
    ///
    /// The target is fully validated before the block is detached.
    pub fn reparent(&mut self, id: &BlockId, placement: &Placement) -> Result<()> {
        let block = self.require(id)?;
        self.protect(block, "moved")?;
        let flavour = block.flavour().ok_or_else(|| {
            CoreError::validation(format!(
                "cannot move block of unknown flavour {}",
                block.props.flavour_name()
            ))
        })?;
        let old_parent = block.parent.clone();

        let target = self.resolve_placement(flavour, placement)?;
        if target.parent == *id || self.descendants(id).contains(&target.parent) {
            return Err(CoreError::validation(format!(
                "cannot move block {id} into its own subtree"
            )));
        }

        let mut index = target.index;
        if let Some(old) = &old_parent {
            if let Some(position) = self.child_index(old, id) {
                if *old == target.parent && position < index {
                    index -= 1;
                }
            }
            if let Some(host) = self.blocks.get_mut(old) {
                host.children.retain(|c| c != id);
            }
            self.record(BlockChange::ChildrenChanged(old.clone()));
        }

        if let Some(host) = self.blocks.get_mut(&target.parent) {
            let at = index.min(host.children.len());
            host.children.insert(at, id.clone());
        }
        if let Some(block) = self.blocks.get_mut(id) {
            block.parent = Some(target.parent.clone());
        }
        self.record(BlockChange::ChildrenChanged(target.parent));
        Ok(())
    }

    /// Patch the props of a content block in place.
    pub fn update(&mut self, id: &BlockId, update: &BlockUpdate, strict: bool) -> Result<()> {
        let block = self.require(id)?;
        self.protect(block, "updated")?;
        let mut props = block.props.clone();
        props.apply_update(update, strict)?;
        if let Some(block) = self.blocks.get_mut(id) {
            if block.props != props {
                block.props = props;
                self.record(BlockChange::PropsChanged(id.clone()));
            }
        }
        Ok(())
    }

    /// Replace the page title, creating the page if needed.
    pub fn set_title(&mut self, title: &str) {
        let page = self.ensure_page();
        let next = RichText::plain(title);
        if let Some(block) = self.blocks.get_mut(&page) {
            if let BlockProps::Page { title } = &mut block.props {
                if *title != next {
                    *title = next;
                    self.record(BlockChange::PropsChanged(page));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::{create_block, BlockInput};
    use crate::flavour::{ListStyle, ParagraphType};

    fn paragraph(text: &str) -> Block {
        Block::new(BlockProps::paragraph(ParagraphType::Text, RichText::plain(text)))
    }

    fn scaffolded() -> (BlockTree, BlockId) {
        let mut tree = BlockTree::new();
        tree.ensure_surface();
        let note = tree.ensure_note().unwrap();
        tree.take_changes();
        (tree, note)
    }

    fn texts(tree: &BlockTree, parent: &BlockId) -> Vec<String> {
        tree.children(parent)
            .iter()
            .map(|b| b.text().map(RichText::to_plain).unwrap_or_default())
            .collect()
    }

    #[test]
    fn test_default_placement_creates_skeleton() {
        let mut tree = BlockTree::new();
        let input = BlockInput {
            level: Some(2),
            ..BlockInput::new("heading").with_text("Intro")
        };
        let id = tree
            .insert(create_block(&input, true).unwrap(), &Placement::Default)
            .unwrap();

        let page = tree.root().cloned().unwrap();
        let note = tree.parent_of(&id).cloned().unwrap();
        assert_eq!(tree.get(&note).unwrap().flavour(), Some(Flavour::Note));
        assert_eq!(tree.parent_of(&note), Some(&page));
        assert_eq!(tree.top_level_blocks().len(), 1);

        let changes = tree.take_changes();
        assert!(changes.contains(&BlockChange::Created(page)));
        assert!(changes.contains(&BlockChange::Created(id)));
    }

    #[test]
    fn test_edgeless_blocks_default_to_surface() {
        let (mut tree, _) = scaffolded();
        let frame = create_block(&BlockInput::new("frame"), true).unwrap();
        let id = tree.insert(frame, &Placement::Default).unwrap();
        let parent = tree.parent_of(&id).unwrap();
        assert_eq!(tree.get(parent).unwrap().flavour(), Some(Flavour::Surface));
    }

    #[test]
    fn test_sibling_placement() {
        let (mut tree, note) = scaffolded();
        let a = tree.insert(paragraph("a"), &Placement::Default).unwrap();
        let c = tree.insert(paragraph("c"), &Placement::Default).unwrap();
        tree.insert(paragraph("b"), &Placement::After(a.clone())).unwrap();
        tree.insert(paragraph("0"), &Placement::Before(a)).unwrap();
        tree.insert(paragraph("d"), &Placement::After(c)).unwrap();
        assert_eq!(texts(&tree, &note), ["0", "a", "b", "c", "d"]);
    }

    #[test]
    fn test_invalid_parent_rejected() {
        let (mut tree, _) = scaffolded();
        let divider = tree
            .insert(Block::new(BlockProps::Divider), &Placement::Default)
            .unwrap();
        let err = tree
            .insert(
                paragraph("x"),
                &Placement::Parent {
                    parent: divider,
                    index: None,
                },
            )
            .unwrap_err();
        assert!(matches!(err, CoreError::Validation(_)));

        let missing = tree
            .insert(paragraph("x"), &Placement::After(BlockId::new("nope")))
            .unwrap_err();
        assert!(matches!(missing, CoreError::NotFound { .. }));
    }

    #[test]
    fn test_deleting_note_is_structurally_protected() {
        let (mut tree, note) = scaffolded();
        tree.insert(paragraph("keep"), &Placement::Default).unwrap();
        tree.take_changes();

        let err = tree.remove_subtree(&note).unwrap_err();
        assert!(matches!(
            err,
            CoreError::StructuralProtection {
                flavour: "affine:note",
                ..
            }
        ));
        assert_eq!(texts(&tree, &note), ["keep"]);
        assert!(!tree.has_changes());
    }

    #[test]
    fn test_remove_subtree_removes_descendants() {
        let (mut tree, note) = scaffolded();
        let parent = tree
            .insert(
                Block::new(BlockProps::list(ListStyle::Bulleted, false, "p".into())),
                &Placement::Default,
            )
            .unwrap();
        let child = tree
            .insert(
                Block::new(BlockProps::list(ListStyle::Bulleted, false, "c".into())),
                &Placement::Parent {
                    parent: parent.clone(),
                    index: None,
                },
            )
            .unwrap();
        tree.take_changes();

        let removed = tree.remove_subtree(&parent).unwrap();
        assert_eq!(removed, vec![child.clone(), parent.clone()]);
        assert!(tree.get(&child).is_none());
        assert!(tree.children(&note).is_empty());

        let changes = tree.take_changes();
        assert!(changes.contains(&BlockChange::ChildrenChanged(note)));
        assert!(changes.contains(&BlockChange::Removed(child)));
    }

    #[test]
    fn test_reparent_rejects_cycles_without_mutating() {
        let (mut tree, note) = scaffolded();
        let outer = tree.insert(paragraph("outer"), &Placement::Default).unwrap();
        let inner = tree
            .insert(
                paragraph("inner"),
                &Placement::Parent {
                    parent: outer.clone(),
                    index: None,
                },
            )
            .unwrap();

        let err = tree
            .reparent(
                &outer,
                &Placement::Parent {
                    parent: inner.clone(),
                    index: None,
                },
            )
            .unwrap_err();
        assert!(matches!(err, CoreError::Validation(_)));
        assert_eq!(tree.parent_of(&outer), Some(&note));
        assert_eq!(tree.parent_of(&inner), Some(&outer));
    }

    #[test]
    fn test_reparent_within_same_parent() {
        let (mut tree, note) = scaffolded();
        let a = tree.insert(paragraph("a"), &Placement::Default).unwrap();
        tree.insert(paragraph("b"), &Placement::Default).unwrap();
        let c = tree.insert(paragraph("c"), &Placement::Default).unwrap();

        tree.reparent(&a, &Placement::After(c)).unwrap();
        assert_eq!(texts(&tree, &note), ["b", "c", "a"]);

        tree.reparent(&a, &Placement::After(a.clone())).unwrap();
        assert_eq!(texts(&tree, &note), ["b", "c", "a"]);
    }

    #[test]
    fn test_update_rejects_structural_blocks() {
        let (mut tree, note) = scaffolded();
        let update = BlockUpdate {
            text: Some("x".into()),
            ..Default::default()
        };
        assert!(matches!(
            tree.update(&note, &update, true),
            Err(CoreError::StructuralProtection { .. })
        ));

        let id = tree.insert(paragraph("old"), &Placement::Default).unwrap();
        tree.take_changes();
        tree.update(&id, &update, true).unwrap();
        assert_eq!(tree.take_changes(), vec![BlockChange::PropsChanged(id)]);
    }
}
