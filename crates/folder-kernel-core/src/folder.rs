use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};
use ulid::Ulid;

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(transparent)]
pub struct FolderId(pub String);

impl FolderId {
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Fresh identifier for folders created by import.
    #[must_use]
    pub fn generate() -> Self {
        Self(Ulid::new().to_string())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for FolderId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for FolderId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// One node of the corporate folder taxonomy.
///
/// `sub_folders` is the nested wire shape used by import/export and by the
/// folders table. Inside a [`crate::FolderTree`] the children live in the
/// arena instead and this field is kept empty.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Folder {
    pub id: FolderId,
    pub name: String,
    #[serde(default)]
    pub color: String,
    #[serde(default)]
    pub text_color: String,
    #[serde(default)]
    pub responsible: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub created_at: String,
    #[serde(default)]
    pub updated_at: String,
    #[serde(default)]
    pub sub_folders: Vec<Folder>,
}

impl Folder {
    #[must_use]
    pub fn new(id: impl Into<FolderId>, name: impl Into<String>) -> Self {
        let now = crate::now_rfc3339();
        Self {
            id: id.into(),
            name: name.into(),
            color: String::new(),
            text_color: String::new(),
            responsible: String::new(),
            tags: Vec::new(),
            created_at: now.clone(),
            updated_at: now,
            sub_folders: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_children(mut self, children: Vec<Folder>) -> Self {
        self.sub_folders = children;
        self
    }

    /// Replace tags, dropping blanks and duplicates while keeping first-seen order.
    pub fn set_tags<I, S>(&mut self, tags: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut normalized: Vec<String> = Vec::new();
        for tag in tags {
            let tag = tag.as_ref().trim();
            if tag.is_empty() || normalized.iter().any(|existing| existing == tag) {
                continue;
            }
            normalized.push(tag.to_string());
        }
        self.tags = normalized;
    }

    /// Copy of this node without its children.
    #[must_use]
    pub fn detached(&self) -> Self {
        Self { sub_folders: Vec::new(), ..self.clone() }
    }

    /// Ids of this folder and every nested descendant, depth-first.
    #[must_use]
    pub fn subtree_ids(&self) -> Vec<FolderId> {
        let mut ids = Vec::new();
        collect_ids(self, &mut ids);
        ids
    }

    /// Number of nodes in this subtree including the root.
    #[must_use]
    pub fn subtree_len(&self) -> usize {
        1 + self.sub_folders.iter().map(Folder::subtree_len).sum::<usize>()
    }
}

impl From<String> for FolderId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

fn collect_ids(folder: &Folder, out: &mut Vec<FolderId>) {
    out.push(folder.id.clone());
    for child in &folder.sub_folders {
        collect_ids(child, out);
    }
}
