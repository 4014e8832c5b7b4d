//! Naive scored text search over the folders table.
//!
//! Nested `subFolders` inside a stored folder are searched as well, so a
//! whole-tree record and per-node records behave the same.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::schema::Table;
use crate::store::RecordStore;

const NAME_WEIGHT: u32 = 10;
const RESPONSIBLE_WEIGHT: u32 = 5;
const TAG_WEIGHT: u32 = 3;
const CATEGORY_WEIGHT: u32 = 2;
const SUBSTRING_WEIGHT: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SearchHit {
    pub folder: Value,
    pub relevance: u32,
}

impl RecordStore {
    /// Score every folder against each whitespace-separated term and return
    /// the positive matches, most relevant first. Ties keep storage order.
    ///
    /// # Errors
    /// Returns an error when the folders table cannot be read.
    pub fn full_text_search(&self, term: &str) -> Result<Vec<SearchHit>> {
        let terms: Vec<String> = term.split_whitespace().map(str::to_lowercase).collect();
        if terms.is_empty() {
            return Ok(Vec::new());
        }

        let mut nodes = Vec::new();
        for record in self.get_all(Table::Folders)? {
            flatten(record, &mut nodes);
        }

        let mut hits: Vec<SearchHit> = nodes
            .into_iter()
            .filter_map(|folder| {
                let relevance = terms.iter().map(|term| score(&folder, term)).sum::<u32>();
                (relevance > 0).then_some(SearchHit { folder, relevance })
            })
            .collect();
        hits.sort_by(|left, right| right.relevance.cmp(&left.relevance));
        Ok(hits)
    }
}

fn flatten(mut folder: Value, out: &mut Vec<Value>) {
    let children = folder
        .as_object_mut()
        .and_then(|object| object.remove("subFolders"))
        .and_then(|children| match children {
            Value::Array(children) => Some(children),
            _ => None,
        })
        .unwrap_or_default();
    out.push(folder);
    for child in children {
        flatten(child, out);
    }
}

fn score(folder: &Value, term: &str) -> u32 {
    let field_matches = |field: &str| {
        folder.get(field).and_then(Value::as_str).is_some_and(|value| value.to_lowercase().contains(term))
    };

    let mut relevance = 0;
    if field_matches("name") {
        relevance += NAME_WEIGHT;
    }
    if field_matches("responsible") {
        relevance += RESPONSIBLE_WEIGHT;
    }
    let tag_match = folder.get("tags").and_then(Value::as_array).is_some_and(|tags| {
        tags.iter().filter_map(Value::as_str).any(|tag| tag.to_lowercase().contains(term))
    });
    if tag_match {
        relevance += TAG_WEIGHT;
    }
    if field_matches("category") {
        relevance += CATEGORY_WEIGHT;
    }
    if any_value_contains(folder, term) {
        relevance += SUBSTRING_WEIGHT;
    }
    relevance
}

/// Substring match over field values only; object keys never match.
fn any_value_contains(value: &Value, term: &str) -> bool {
    match value {
        Value::Object(fields) => fields.values().any(|field| any_value_contains(field, term)),
        Value::Array(items) => items.iter().any(|item| any_value_contains(item, term)),
        Value::String(text) => text.to_lowercase().contains(term),
        Value::Number(number) => number.to_string().contains(term),
        Value::Bool(_) | Value::Null => false,
    }
}

#[cfg(test)]
mod tests {
    use anyhow::anyhow;
    use serde_json::json;

    use super::*;

    #[test]
    fn ranks_name_above_responsible_above_tags() -> Result<()> {
        let mut store = RecordStore::open_in_memory()?;
        store.initialize()?;
        store.create(Table::Folders, json!({"id": "t", "name": "Archive", "tags": ["tax"]}))?;
        store.create(Table::Folders, json!({"id": "r", "name": "Ops", "responsible": "Max Taxman"}))?;
        store.create(Table::Folders, json!({"id": "n", "name": "Tax returns"}))?;
        store.create(Table::Folders, json!({"id": "x", "name": "Unrelated"}))?;

        let hits = store.full_text_search("TAX")?;
        let ids: Vec<&str> = hits.iter().filter_map(|hit| hit.folder["id"].as_str()).collect();
        assert_eq!(ids, vec!["n", "r", "t"]);
        assert_eq!(hits[0].relevance, NAME_WEIGHT + SUBSTRING_WEIGHT);
        Ok(())
    }

    #[test]
    fn field_names_do_not_match() -> Result<()> {
        let mut store = RecordStore::open_in_memory()?;
        store.initialize()?;
        store.create(Table::Folders, json!({"id": "a", "name": "Finance", "parentId": null, "position": 0}))?;
        store.create(Table::Folders, json!({"id": "b", "name": "Ops", "description": "positions budget"}))?;

        assert!(store.full_text_search("name")?.is_empty());
        assert!(store.full_text_search("parentid")?.is_empty());
        let hits = store.full_text_search("position")?;
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].folder["id"], "b");
        assert_eq!(hits[0].relevance, SUBSTRING_WEIGHT);
        Ok(())
    }

    #[test]
    fn sums_across_terms_and_searches_nested_folders() -> Result<()> {
        let mut store = RecordStore::open_in_memory()?;
        store.initialize()?;
        store.create(
            Table::Folders,
            json!({
                "id": "root",
                "name": "Legal",
                "subFolders": [{"id": "child", "name": "Contracts", "responsible": "Legal team"}]
            }),
        )?;

        let hits = store.full_text_search("contracts legal")?;
        let child = hits
            .iter()
            .find(|hit| hit.folder["id"] == "child")
            .ok_or_else(|| anyhow!("nested folder not found"))?;
        assert_eq!(child.relevance, (NAME_WEIGHT + SUBSTRING_WEIGHT) + (RESPONSIBLE_WEIGHT + SUBSTRING_WEIGHT));
        assert_eq!(hits[0].folder["id"], "child");
        assert!(store.full_text_search("   ")?.is_empty());
        Ok(())
    }
}
