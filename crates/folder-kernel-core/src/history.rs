//! Linear undo/redo history over a [`FolderTree`].
//!
//! Every structural edit is validated against the present tree, applied, and
//! recorded as a [`HistoryAction`] whose payload carries exactly what is
//! needed to reverse and replay it. A new edit discards the redo stack. The
//! past stack is bounded; the oldest action is evicted first.

use std::collections::{BTreeMap, VecDeque};
use std::fmt::{Debug, Display, Formatter};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::folder::{Folder, FolderId};
use crate::report::ErrorReporter;
use crate::tree::{FolderTree, TreeError};

pub const DEFAULT_HISTORY_LIMIT: usize = 50;

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq, Hash)]
#[serde(transparent)]
pub struct ActionId(pub String);

impl Display for ActionId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActionType {
    Create,
    Update,
    Delete,
    Move,
    Import,
    Batch,
}

impl ActionType {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Create => "CREATE",
            Self::Update => "UPDATE",
            Self::Delete => "DELETE",
            Self::Move => "MOVE",
            Self::Import => "IMPORT",
            Self::Batch => "BATCH",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "CREATE" => Some(Self::Create),
            "UPDATE" => Some(Self::Update),
            "DELETE" => Some(Self::Delete),
            "MOVE" => Some(Self::Move),
            "IMPORT" => Some(Self::Import),
            "BATCH" => Some(Self::Batch),
            _ => None,
        }
    }
}

/// What an action changed. Folders in `Create`, `Delete` and `Import` carry
/// their full nested subtree; `Update` snapshots are single nodes.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE", rename_all_fields = "camelCase")]
pub enum ActionPayload {
    Create { folder: Folder, parent_id: Option<FolderId> },
    Update { before: Folder, after: Folder },
    Delete { folder: Folder, parent_id: Option<FolderId>, index: usize },
    Move {
        folder_id: FolderId,
        from_parent_id: Option<FolderId>,
        from_index: usize,
        to_parent_id: Option<FolderId>,
    },
    Import { folders: Vec<Folder>, parent_id: Option<FolderId> },
    Batch { before: Vec<Folder>, after: Vec<Folder> },
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct HistoryAction {
    pub id: ActionId,
    pub timestamp: String,
    pub description: String,
    #[serde(flatten)]
    pub payload: ActionPayload,
}

impl HistoryAction {
    #[must_use]
    pub fn action_type(&self) -> ActionType {
        match self.payload {
            ActionPayload::Create { .. } => ActionType::Create,
            ActionPayload::Update { .. } => ActionType::Update,
            ActionPayload::Delete { .. } => ActionType::Delete,
            ActionPayload::Move { .. } => ActionType::Move,
            ActionPayload::Import { .. } => ActionType::Import,
            ActionPayload::Batch { .. } => ActionType::Batch,
        }
    }

    #[must_use]
    pub fn target_id(&self) -> Option<&FolderId> {
        match &self.payload {
            ActionPayload::Create { folder, .. } | ActionPayload::Delete { folder, .. } => {
                Some(&folder.id)
            }
            ActionPayload::Update { after, .. } => Some(&after.id),
            ActionPayload::Move { folder_id, .. } => Some(folder_id),
            ActionPayload::Import { .. } | ActionPayload::Batch { .. } => None,
        }
    }

    #[must_use]
    pub fn parent_id(&self) -> Option<&FolderId> {
        match &self.payload {
            ActionPayload::Create { parent_id, .. }
            | ActionPayload::Delete { parent_id, .. }
            | ActionPayload::Import { parent_id, .. } => parent_id.as_ref(),
            ActionPayload::Move { to_parent_id, .. } => to_parent_id.as_ref(),
            ActionPayload::Update { .. } | ActionPayload::Batch { .. } => None,
        }
    }
}

#[derive(Debug, Clone, thiserror::Error, Eq, PartialEq)]
pub enum HistoryError {
    #[error(transparent)]
    Tree(#[from] TreeError),
    #[error("{operation} of action {action_id} failed: {source}")]
    Replay {
        operation: &'static str,
        action_id: ActionId,
        #[source]
        source: TreeError,
    },
}

pub struct HistoryEngine {
    past: VecDeque<HistoryAction>,
    present: FolderTree,
    future: Vec<HistoryAction>,
    limit: usize,
    counter: u64,
    reporter: Arc<dyn ErrorReporter>,
}

impl Debug for HistoryEngine {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HistoryEngine")
            .field("past", &self.past.len())
            .field("future", &self.future.len())
            .field("folders", &self.present.len())
            .field("limit", &self.limit)
            .finish_non_exhaustive()
    }
}

impl HistoryEngine {
    #[must_use]
    pub fn new(reporter: Arc<dyn ErrorReporter>) -> Self {
        Self::with_limit(DEFAULT_HISTORY_LIMIT, reporter)
    }

    /// Engine keeping at most `limit` undoable actions (at least one).
    #[must_use]
    pub fn with_limit(limit: usize, reporter: Arc<dyn ErrorReporter>) -> Self {
        Self {
            past: VecDeque::new(),
            present: FolderTree::new(),
            future: Vec::new(),
            limit: limit.max(1),
            counter: 0,
            reporter,
        }
    }

    /// Rehydrate an engine from saved stacks. No consistency check is made
    /// between the stacks and the tree; a mismatch surfaces on undo/redo.
    #[must_use]
    pub fn from_parts(
        present: FolderTree,
        past: Vec<HistoryAction>,
        future: Vec<HistoryAction>,
        limit: usize,
        reporter: Arc<dyn ErrorReporter>,
    ) -> Self {
        let limit = limit.max(1);
        let mut past: VecDeque<HistoryAction> = past.into();
        while past.len() > limit {
            past.pop_front();
        }
        Self { past, present, future, limit, counter: 0, reporter }
    }

    /// Replace the present tree and drop both stacks.
    pub fn reset(&mut self, present: FolderTree) {
        self.present = present;
        self.clear();
    }

    #[must_use]
    pub fn present(&self) -> &FolderTree {
        &self.present
    }

    #[must_use]
    pub fn past(&self) -> &VecDeque<HistoryAction> {
        &self.past
    }

    /// Undone actions; the next one to redo is last.
    #[must_use]
    pub fn future(&self) -> &[HistoryAction] {
        &self.future
    }

    #[must_use]
    pub fn limit(&self) -> usize {
        self.limit
    }

    #[must_use]
    pub fn can_undo(&self) -> bool {
        !self.past.is_empty()
    }

    #[must_use]
    pub fn can_redo(&self) -> bool {
        !self.future.is_empty()
    }

    pub fn clear(&mut self) {
        self.past.clear();
        self.future.clear();
    }

    /// Add `folder` (with any nested children) under `parent`, or as a root.
    ///
    /// # Errors
    /// Returns an error when a name is empty, an id is already used, or the
    /// parent does not exist. Nothing is recorded in that case.
    pub fn create_folder(
        &mut self,
        folder: Folder,
        parent: Option<&FolderId>,
    ) -> Result<ActionId, HistoryError> {
        validate_names(&folder)?;
        self.present.insert(folder.clone(), parent, None)?;
        let description = format!("Created folder \"{}\"", folder.name);
        Ok(self.record(description, ActionPayload::Create { folder, parent_id: parent.cloned() }))
    }

    /// Overwrite a folder's own fields; its children and position are kept.
    ///
    /// # Errors
    /// Returns an error when the name is empty or the folder does not exist.
    pub fn update_folder(&mut self, folder: &Folder) -> Result<ActionId, HistoryError> {
        if folder.name.trim().is_empty() {
            return Err(TreeError::EmptyName(folder.id.clone()).into());
        }
        let mut after = folder.detached();
        after.updated_at = crate::now_rfc3339();
        let before = self.present.replace(&after)?;
        let description = format!("Updated folder \"{}\"", after.name);
        Ok(self.record(description, ActionPayload::Update { before, after }))
    }

    /// Remove a folder and its whole subtree.
    ///
    /// # Errors
    /// Returns an error when the folder does not exist.
    pub fn delete_folder(&mut self, id: &FolderId) -> Result<ActionId, HistoryError> {
        let (folder, parent_id, index) = self.present.remove(id)?;
        let description = format!("Deleted folder \"{}\"", folder.name);
        Ok(self.record(description, ActionPayload::Delete { folder, parent_id, index }))
    }

    /// Re-parent a folder, appending it to the new parent's children.
    ///
    /// # Errors
    /// Returns an error when either folder is missing or the target lies in
    /// the moved folder's own subtree.
    pub fn move_folder(
        &mut self,
        id: &FolderId,
        new_parent: Option<&FolderId>,
    ) -> Result<ActionId, HistoryError> {
        let (from_parent_id, from_index) = self.present.move_to(id, new_parent, None)?;
        let name = self.present.get(id).map(|folder| folder.name.clone()).unwrap_or_default();
        let description = format!("Moved folder \"{name}\"");
        Ok(self.record(
            description,
            ActionPayload::Move {
                folder_id: id.clone(),
                from_parent_id,
                from_index,
                to_parent_id: new_parent.cloned(),
            },
        ))
    }

    /// Append several folder subtrees under `parent` as one undoable step.
    ///
    /// # Errors
    /// Returns an error when any folder is invalid; none of them is added then.
    pub fn import_folders(
        &mut self,
        folders: Vec<Folder>,
        parent: Option<&FolderId>,
    ) -> Result<ActionId, HistoryError> {
        let mut next = self.present.clone();
        for folder in &folders {
            validate_names(folder)?;
            next.insert(folder.clone(), parent, None)?;
        }
        self.present = next;
        let description = format!("Imported {} folder(s)", folders.len());
        Ok(self.record(description, ActionPayload::Import { folders, parent_id: parent.cloned() }))
    }

    /// Replace the whole tree as a single undoable step.
    ///
    /// # Errors
    /// Returns an error when the new forest has an empty name or duplicate ids.
    pub fn batch(
        &mut self,
        description: impl Into<String>,
        folders: Vec<Folder>,
    ) -> Result<ActionId, HistoryError> {
        for folder in &folders {
            validate_names(folder)?;
        }
        let next = FolderTree::from_folders(folders)?;
        let before = self.present.to_folders();
        let after = next.to_folders();
        self.present = next;
        Ok(self.record(description.into(), ActionPayload::Batch { before, after }))
    }

    /// Revert the most recent action. Returns `false` when there is nothing to
    /// undo or the revert failed; a failure is reported and changes nothing.
    pub fn undo(&mut self) -> bool {
        let Some(action) = self.past.back() else {
            return false;
        };
        let mut next = self.present.clone();
        if let Err(source) = revert(&mut next, &action.payload) {
            self.report_failure("undo", action, source);
            return false;
        }
        self.present = next;
        if let Some(action) = self.past.pop_back() {
            self.future.push(action);
        }
        true
    }

    /// Re-apply the most recently undone action, with the same failure rules as [`Self::undo`].
    pub fn redo(&mut self) -> bool {
        let Some(action) = self.future.last() else {
            return false;
        };
        let mut next = self.present.clone();
        if let Err(source) = apply(&mut next, &action.payload) {
            self.report_failure("redo", action, source);
            return false;
        }
        self.present = next;
        if let Some(action) = self.future.pop() {
            self.push_past(action);
        }
        true
    }

    fn record(&mut self, description: String, payload: ActionPayload) -> ActionId {
        let id = self.next_id();
        let action = HistoryAction {
            id: id.clone(),
            timestamp: crate::now_rfc3339(),
            description,
            payload,
        };
        tracing::debug!(action_id = %id, action_type = action.action_type().as_str(), "history action recorded");
        self.push_past(action);
        self.future.clear();
        id
    }

    fn push_past(&mut self, action: HistoryAction) {
        while self.past.len() >= self.limit {
            self.past.pop_front();
        }
        self.past.push_back(action);
    }

    fn next_id(&mut self) -> ActionId {
        self.counter += 1;
        let millis = OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000;
        ActionId(format!("{millis}-{}", self.counter))
    }

    fn report_failure(&self, operation: &'static str, action: &HistoryAction, source: TreeError) {
        let error = HistoryError::Replay { operation, action_id: action.id.clone(), source };
        tracing::error!(error = %error, "history replay failed; tree left unchanged");
        let mut context = BTreeMap::new();
        context.insert("action_id".to_string(), action.id.to_string());
        context.insert("action_type".to_string(), action.action_type().as_str().to_string());
        context.insert("operation".to_string(), operation.to_string());
        self.reporter.report_exception(&error, &context);
    }
}

fn validate_names(folder: &Folder) -> Result<(), TreeError> {
    if folder.name.trim().is_empty() {
        return Err(TreeError::EmptyName(folder.id.clone()));
    }
    folder.sub_folders.iter().try_for_each(validate_names)
}

fn revert(tree: &mut FolderTree, payload: &ActionPayload) -> Result<(), TreeError> {
    match payload {
        ActionPayload::Create { folder, .. } => {
            tree.remove(&folder.id)?;
        }
        ActionPayload::Update { before, .. } => {
            tree.replace(before)?;
        }
        ActionPayload::Delete { folder, parent_id, index } => {
            tree.insert(folder.clone(), parent_id.as_ref(), Some(*index))?;
        }
        ActionPayload::Move { folder_id, from_parent_id, from_index, .. } => {
            tree.move_to(folder_id, from_parent_id.as_ref(), Some(*from_index))?;
        }
        ActionPayload::Import { folders, .. } => {
            for folder in folders.iter().rev() {
                tree.remove(&folder.id)?;
            }
        }
        ActionPayload::Batch { before, .. } => {
            *tree = FolderTree::from_folders(before.clone())?;
        }
    }
    Ok(())
}

fn apply(tree: &mut FolderTree, payload: &ActionPayload) -> Result<(), TreeError> {
    match payload {
        ActionPayload::Create { folder, parent_id } => {
            tree.insert(folder.clone(), parent_id.as_ref(), None)?;
        }
        ActionPayload::Update { after, .. } => {
            tree.replace(after)?;
        }
        ActionPayload::Delete { folder, .. } => {
            tree.remove(&folder.id)?;
        }
        ActionPayload::Move { folder_id, to_parent_id, .. } => {
            tree.move_to(folder_id, to_parent_id.as_ref(), None)?;
        }
        ActionPayload::Import { folders, parent_id } => {
            for folder in folders {
                tree.insert(folder.clone(), parent_id.as_ref(), None)?;
            }
        }
        ActionPayload::Batch { after, .. } => {
            *tree = FolderTree::from_folders(after.clone())?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;
    use crate::report::MemoryReporter;

    fn id(value: &str) -> FolderId {
        FolderId::from(value)
    }

    fn engine() -> HistoryEngine {
        HistoryEngine::new(Arc::new(MemoryReporter::new()))
    }

    #[test]
    fn create_then_undo_restores_single_root() -> Result<(), HistoryError> {
        let mut history = engine();
        history.batch("seed", vec![Folder::new("A", "Root")])?;
        history.clear();
        let initial = history.present().clone();

        history.create_folder(Folder::new("B", "Child"), Some(&id("A")))?;
        let tree = history.present().to_folders();
        assert_eq!(tree.len(), 1);
        assert_eq!(tree[0].sub_folders.len(), 1);
        assert_eq!(tree[0].sub_folders[0].id, id("B"));
        assert_eq!(tree[0].sub_folders[0].name, "Child");
        assert!(tree[0].sub_folders[0].sub_folders.is_empty());
        assert!(history.can_undo());

        assert!(history.undo());
        assert_eq!(history.present(), &initial);
        assert!(history.can_redo());
        assert!(!history.can_undo());
        Ok(())
    }

    #[test]
    fn rejected_mutation_records_nothing() -> Result<(), HistoryError> {
        let mut history = engine();
        history.create_folder(Folder::new("A", "Root"), None)?;

        let empty = history.create_folder(Folder::new("X", "  "), None);
        assert_eq!(empty, Err(HistoryError::Tree(TreeError::EmptyName(id("X")))));
        let duplicate = history.create_folder(Folder::new("A", "Again"), None);
        assert_eq!(duplicate, Err(HistoryError::Tree(TreeError::DuplicateId(id("A")))));
        let orphan = history.create_folder(Folder::new("Y", "Orphan"), Some(&id("missing")));
        assert!(orphan.is_err());

        assert_eq!(history.past().len(), 1);
        assert_eq!(history.present().len(), 1);
        Ok(())
    }

    #[test]
    fn new_action_clears_redo_stack() -> Result<(), HistoryError> {
        let mut history = engine();
        history.create_folder(Folder::new("A", "A"), None)?;
        assert!(history.undo());
        assert!(history.can_redo());
        history.create_folder(Folder::new("B", "B"), None)?;
        assert!(!history.can_redo());
        Ok(())
    }

    #[test]
    fn delete_undo_restores_former_sibling_position() -> Result<(), HistoryError> {
        let mut history = engine();
        history.batch(
            "seed",
            vec![Folder::new("A", "A"), Folder::new("B", "B"), Folder::new("C", "C")],
        )?;
        let seeded = history.present().clone();

        history.delete_folder(&id("B"))?;
        assert!(history.undo());
        assert_eq!(history.present(), &seeded);
        assert_eq!(history.present().roots(), [id("A"), id("B"), id("C")].as_slice());
        Ok(())
    }

    #[test]
    fn update_keeps_children_and_undo_restores_fields() -> Result<(), HistoryError> {
        let mut history = engine();
        history.create_folder(
            Folder::new("A", "Finance").with_children(vec![Folder::new("B", "Tax")]),
            None,
        )?;
        let mut edited = Folder::new("A", "Accounting");
        edited.responsible = "Dana".to_string();
        history.update_folder(&edited)?;

        let tree = history.present().to_folders();
        assert_eq!(tree[0].name, "Accounting");
        assert_eq!(tree[0].sub_folders.len(), 1);

        assert!(history.undo());
        assert_eq!(history.present().get(&id("A")).map(|f| f.name.as_str()), Some("Finance"));
        assert!(history.redo());
        assert_eq!(history.present().get(&id("A")).map(|f| f.responsible.as_str()), Some("Dana"));
        Ok(())
    }

    #[test]
    fn move_into_descendant_is_rejected() -> Result<(), HistoryError> {
        let mut history = engine();
        history.create_folder(
            Folder::new("A", "A").with_children(vec![Folder::new("B", "B")]),
            None,
        )?;
        let result = history.move_folder(&id("A"), Some(&id("B")));
        assert!(matches!(result, Err(HistoryError::Tree(TreeError::Cycle { .. }))));
        assert_eq!(history.past().len(), 1);
        Ok(())
    }

    #[test]
    fn failed_undo_is_reported_and_leaves_state_untouched() -> Result<(), TreeError> {
        let reporter = Arc::new(MemoryReporter::new());
        let bogus = HistoryAction {
            id: ActionId("1-1".to_string()),
            timestamp: crate::now_rfc3339(),
            description: "delete under a parent that no longer exists".to_string(),
            payload: ActionPayload::Delete {
                folder: Folder::new("X", "Lost"),
                parent_id: Some(id("gone")),
                index: 0,
            },
        };
        let tree = FolderTree::from_folders(vec![Folder::new("A", "A")])?;
        let mut history = HistoryEngine::from_parts(
            tree.clone(),
            vec![bogus],
            Vec::new(),
            DEFAULT_HISTORY_LIMIT,
            reporter.clone(),
        );

        assert!(!history.undo());
        assert_eq!(history.present(), &tree);
        assert_eq!(history.past().len(), 1);
        assert!(history.future().is_empty());

        let events = reporter.events();
        assert_eq!(events.len(), 1);
        let crate::ReportedEvent::Exception { context, .. } = &events[0] else {
            panic!("expected an exception event, got {events:?}");
        };
        assert_eq!(context.get("action_id").map(String::as_str), Some("1-1"));
        assert_eq!(context.get("action_type").map(String::as_str), Some("DELETE"));
        assert_eq!(context.get("operation").map(String::as_str), Some("undo"));
        Ok(())
    }

    #[test]
    fn action_serializes_with_type_tag() -> Result<(), Box<dyn std::error::Error>> {
        let mut history = engine();
        history.create_folder(Folder::new("A", "A"), None)?;
        let action = history.past().back().cloned().ok_or("no action recorded")?;
        let json = serde_json::to_value(&action)?;
        assert_eq!(json["type"], "CREATE");
        assert_eq!(json["folder"]["id"], "A");
        assert!(json["parentId"].is_null());
        let decoded: HistoryAction = serde_json::from_value(json)?;
        assert_eq!(decoded, action);
        Ok(())
    }

    #[test]
    fn action_ids_are_unique_and_counter_suffixed() -> Result<(), HistoryError> {
        let mut history = engine();
        let first = history.create_folder(Folder::new("A", "A"), None)?;
        let second = history.create_folder(Folder::new("B", "B"), None)?;
        assert_ne!(first, second);
        assert!(first.0.ends_with("-1"));
        assert!(second.0.ends_with("-2"));
        Ok(())
    }

    #[derive(Debug, Clone)]
    enum Op {
        Create { parent: Option<usize> },
        Update { target: usize },
        Delete { target: usize },
        Move { target: usize, parent: Option<usize> },
        Import { parent: Option<usize>, count: usize },
        Batch,
    }

    fn op_strategy() -> impl Strategy<Value = Op> {
        prop_oneof![
            3 => proptest::option::of(0_usize..16).prop_map(|parent| Op::Create { parent }),
            1 => (0_usize..16).prop_map(|target| Op::Update { target }),
            1 => (0_usize..16).prop_map(|target| Op::Delete { target }),
            2 => ((0_usize..16), proptest::option::of(0_usize..16))
                .prop_map(|(target, parent)| Op::Move { target, parent }),
            1 => (proptest::option::of(0_usize..16), 1_usize..3)
                .prop_map(|(parent, count)| Op::Import { parent, count }),
            1 => Just(Op::Batch),
        ]
    }

    fn pick(ids: &[FolderId], index: usize) -> Option<FolderId> {
        if ids.is_empty() {
            None
        } else {
            Some(ids[index % ids.len()].clone())
        }
    }

    fn run(history: &mut HistoryEngine, op: &Op, serial: &mut usize) -> bool {
        let ids: Vec<FolderId> = history
            .present()
            .to_folders()
            .iter()
            .flat_map(Folder::subtree_ids)
            .collect();
        let mut fresh = |label: &str| {
            *serial += 1;
            Folder::new(format!("n{serial}"), format!("{label} {serial}"))
        };
        let result = match op {
            Op::Create { parent } => {
                let parent = parent.and_then(|index| pick(&ids, index));
                history.create_folder(fresh("created"), parent.as_ref())
            }
            Op::Update { target } => match pick(&ids, *target) {
                Some(target) => {
                    let mut folder = Folder::new(target, "renamed");
                    folder.color = "#123456".to_string();
                    history.update_folder(&folder)
                }
                None => return false,
            },
            Op::Delete { target } => match pick(&ids, *target) {
                Some(target) => history.delete_folder(&target),
                None => return false,
            },
            Op::Move { target, parent } => match pick(&ids, *target) {
                Some(target) => {
                    let parent = parent.and_then(|index| pick(&ids, index));
                    history.move_folder(&target, parent.as_ref())
                }
                None => return false,
            },
            Op::Import { parent, count } => {
                let parent = parent.and_then(|index| pick(&ids, index));
                let folders = (0..*count).map(|_| fresh("imported")).collect();
                history.import_folders(folders, parent.as_ref())
            }
            Op::Batch => {
                let mut folders = history.present().to_folders();
                folders.reverse();
                folders.push(fresh("batched"));
                history.batch("reorder", folders)
            }
        };
        result.is_ok()
    }

    proptest! {
        #[test]
        fn undo_then_redo_is_an_inverse(ops in proptest::collection::vec(op_strategy(), 1..30)) {
            let mut history = engine();
            let initial = history.present().clone();
            let mut serial = 0;
            let applied = ops.iter().filter(|op| run(&mut history, op, &mut serial)).count();
            let after = history.present().clone();

            for _ in 0..applied {
                prop_assert!(history.undo());
            }
            prop_assert_eq!(history.present(), &initial);
            prop_assert!(!history.can_undo());

            for _ in 0..applied {
                prop_assert!(history.redo());
            }
            prop_assert_eq!(history.present(), &after);
            prop_assert!(!history.can_redo());
        }

        #[test]
        fn past_is_bounded_and_evicts_oldest_first(count in 51_usize..120) {
            let mut history = engine();
            for index in 0..count {
                let created = history.create_folder(Folder::new(format!("f{index}"), "F"), None);
                prop_assert!(created.is_ok());
            }
            prop_assert_eq!(history.past().len(), DEFAULT_HISTORY_LIMIT);
            let oldest = history.past().front().and_then(HistoryAction::target_id).cloned();
            prop_assert_eq!(oldest, Some(FolderId::new(format!("f{}", count - DEFAULT_HISTORY_LIMIT))));
        }
    }
}
