//! Arena representation of the folder forest.
//!
//! Nodes are stored flat, keyed by [`FolderId`], with a parent link and an
//! ordered child list. Lookups are O(1); the nested [`Folder`] shape is only
//! rebuilt on demand by [`FolderTree::to_folders`] and [`FolderTree::subtree`].
//!
//! Every mutating method validates its input before touching the arena, so a
//! returned error always leaves the tree exactly as it was.

use std::collections::{HashMap, HashSet};

use crate::folder::{Folder, FolderId};

#[derive(Debug, Clone, thiserror::Error, Eq, PartialEq)]
pub enum TreeError {
    #[error("folder not found: {0}")]
    NotFound(FolderId),
    #[error("parent folder not found: {0}")]
    ParentNotFound(FolderId),
    #[error("duplicate folder id: {0}")]
    DuplicateId(FolderId),
    #[error("cannot move folder {folder} into its own subtree at {target}")]
    Cycle { folder: FolderId, target: FolderId },
    #[error("folder name MUST be non-empty (id {0})")]
    EmptyName(FolderId),
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Node {
    folder: Folder,
    parent: Option<FolderId>,
    children: Vec<FolderId>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FolderTree {
    nodes: HashMap<FolderId, Node>,
    roots: Vec<FolderId>,
}

impl FolderTree {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build an arena from nested folders, keeping root and child order.
    ///
    /// # Errors
    /// Returns [`TreeError::DuplicateId`] when an id appears twice anywhere in the input.
    pub fn from_folders(folders: Vec<Folder>) -> Result<Self, TreeError> {
        let mut tree = Self::new();
        for folder in folders {
            tree.insert(folder, None, None)?;
        }
        Ok(tree)
    }

    /// Rebuild the nested shape of the whole forest.
    #[must_use]
    pub fn to_folders(&self) -> Vec<Folder> {
        self.roots.iter().filter_map(|id| self.subtree(id)).collect()
    }

    /// Nested copy of one node and all of its descendants.
    #[must_use]
    pub fn subtree(&self, id: &FolderId) -> Option<Folder> {
        let node = self.nodes.get(id)?;
        let mut folder = node.folder.clone();
        folder.sub_folders = node.children.iter().filter_map(|child| self.subtree(child)).collect();
        Some(folder)
    }

    /// The node itself, without children.
    #[must_use]
    pub fn get(&self, id: &FolderId) -> Option<&Folder> {
        self.nodes.get(id).map(|node| &node.folder)
    }

    #[must_use]
    pub fn contains(&self, id: &FolderId) -> bool {
        self.nodes.contains_key(id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    #[must_use]
    pub fn roots(&self) -> &[FolderId] {
        &self.roots
    }

    /// Ordered children of `parent`, or the roots when `parent` is `None`.
    #[must_use]
    pub fn children(&self, parent: Option<&FolderId>) -> Option<&[FolderId]> {
        match parent {
            None => Some(self.roots.as_slice()),
            Some(id) => self.nodes.get(id).map(|node| node.children.as_slice()),
        }
    }

    /// Parent id and sibling index of a node.
    #[must_use]
    pub fn position(&self, id: &FolderId) -> Option<(Option<FolderId>, usize)> {
        let node = self.nodes.get(id)?;
        let siblings = match &node.parent {
            None => &self.roots,
            Some(parent) => &self.nodes.get(parent)?.children,
        };
        let index = siblings.iter().position(|sibling| sibling == id)?;
        Some((node.parent.clone(), index))
    }

    /// Ancestors of a node, outermost first, excluding the node itself.
    #[must_use]
    pub fn ancestors(&self, id: &FolderId) -> Vec<&Folder> {
        let mut chain = Vec::new();
        let mut current = self.nodes.get(id).and_then(|node| node.parent.as_ref());
        while let Some(parent_id) = current {
            let Some(parent) = self.nodes.get(parent_id) else {
                break;
            };
            chain.push(&parent.folder);
            current = parent.parent.as_ref();
        }
        chain.reverse();
        chain
    }

    /// True when `node` is `ancestor` or sits anywhere below it.
    #[must_use]
    pub fn is_within(&self, ancestor: &FolderId, node: &FolderId) -> bool {
        let mut current = Some(node);
        while let Some(id) = current {
            if id == ancestor {
                return true;
            }
            current = self.nodes.get(id).and_then(|entry| entry.parent.as_ref());
        }
        false
    }

    /// Insert a nested folder under `parent` at `index` (appended when `None`).
    ///
    /// # Errors
    /// Returns an error when the parent is missing or any id of the subtree
    /// already exists in the tree or repeats inside the subtree.
    pub fn insert(
        &mut self,
        folder: Folder,
        parent: Option<&FolderId>,
        index: Option<usize>,
    ) -> Result<(), TreeError> {
        if let Some(parent_id) = parent {
            if !self.nodes.contains_key(parent_id) {
                return Err(TreeError::ParentNotFound(parent_id.clone()));
            }
        }

        let mut seen = HashSet::new();
        for id in folder.subtree_ids() {
            if self.nodes.contains_key(&id) || !seen.insert(id.clone()) {
                return Err(TreeError::DuplicateId(id));
            }
        }

        let id = folder.id.clone();
        self.attach_subtree(folder, parent.cloned());
        if let Some(siblings) = self.sibling_list_mut(parent) {
            let at = index.map_or(siblings.len(), |index| index.min(siblings.len()));
            siblings.insert(at, id);
        }
        Ok(())
    }

    /// Detach a node and its descendants.
    ///
    /// Returns the nested subtree plus the parent and sibling index it occupied.
    ///
    /// # Errors
    /// Returns [`TreeError::NotFound`] when the id is absent.
    pub fn remove(&mut self, id: &FolderId) -> Result<(Folder, Option<FolderId>, usize), TreeError> {
        let (parent, index) = self.position(id).ok_or_else(|| TreeError::NotFound(id.clone()))?;
        let subtree = self.subtree(id).ok_or_else(|| TreeError::NotFound(id.clone()))?;

        if let Some(siblings) = self.sibling_list_mut(parent.as_ref()) {
            siblings.remove(index);
        }
        for removed in subtree.subtree_ids() {
            self.nodes.remove(&removed);
        }
        Ok((subtree, parent, index))
    }

    /// Swap a node's own fields in place; position and children are kept.
    ///
    /// Returns the previous node (without children).
    ///
    /// # Errors
    /// Returns [`TreeError::NotFound`] when no node carries `updated.id`.
    pub fn replace(&mut self, updated: &Folder) -> Result<Folder, TreeError> {
        let node =
            self.nodes.get_mut(&updated.id).ok_or_else(|| TreeError::NotFound(updated.id.clone()))?;
        Ok(std::mem::replace(&mut node.folder, updated.detached()))
    }

    /// Re-parent a node (with its subtree) under `new_parent` at `index`.
    ///
    /// Returns the parent and index the node had before the move.
    ///
    /// # Errors
    /// Returns an error when the node or target parent is missing, or when the
    /// target lies inside the node's own subtree.
    pub fn move_to(
        &mut self,
        id: &FolderId,
        new_parent: Option<&FolderId>,
        index: Option<usize>,
    ) -> Result<(Option<FolderId>, usize), TreeError> {
        let (old_parent, old_index) =
            self.position(id).ok_or_else(|| TreeError::NotFound(id.clone()))?;

        if let Some(target) = new_parent {
            if !self.nodes.contains_key(target) {
                return Err(TreeError::ParentNotFound(target.clone()));
            }
            if self.is_within(id, target) {
                return Err(TreeError::Cycle { folder: id.clone(), target: target.clone() });
            }
        }

        if let Some(siblings) = self.sibling_list_mut(old_parent.as_ref()) {
            siblings.remove(old_index);
        }
        if let Some(node) = self.nodes.get_mut(id) {
            node.parent = new_parent.cloned();
        }
        if let Some(siblings) = self.sibling_list_mut(new_parent) {
            let at = index.map_or(siblings.len(), |index| index.min(siblings.len()));
            siblings.insert(at, id.clone());
        }

        Ok((old_parent, old_index))
    }

    fn attach_subtree(&mut self, mut folder: Folder, parent: Option<FolderId>) {
        let children = std::mem::take(&mut folder.sub_folders);
        let id = folder.id.clone();
        let child_ids = children.iter().map(|child| child.id.clone()).collect();
        self.nodes.insert(id.clone(), Node { folder, parent, children: child_ids });
        for child in children {
            self.attach_subtree(child, Some(id.clone()));
        }
    }

    fn sibling_list_mut(&mut self, parent: Option<&FolderId>) -> Option<&mut Vec<FolderId>> {
        match parent {
            None => Some(&mut self.roots),
            Some(id) => self.nodes.get_mut(id).map(|node| &mut node.children),
        }
    }
}
