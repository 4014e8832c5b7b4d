//! Folder import/export formats.
//!
//! JSON: an array of folder-like objects, validated recursively; errors name
//! the offending path such as `[0].subFolders[2].name`. CSV: a header row then
//! `name,color,path,responsible,tags` rows, where `path` is the `/`-separated
//! chain of ancestor names and tags are `;`-separated. Imported folders always
//! receive fresh ids.

use std::collections::{HashMap, HashSet};

use serde_json::{Map, Value};

use crate::folder::{Folder, FolderId};
use crate::tree::FolderTree;

pub const CSV_HEADER: [&str; 5] = ["name", "color", "path", "responsible", "tags"];

#[derive(Debug, thiserror::Error)]
pub enum ImportError {
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid CSV: {0}")]
    Csv(#[from] csv::Error),
    #[error("{path}: {reason}")]
    Invalid { path: String, reason: String },
}

impl ImportError {
    fn invalid(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Invalid { path: path.into(), reason: reason.into() }
    }
}

/// Parse and validate a JSON folder array.
///
/// # Errors
/// Returns an error when the text is not JSON, the top level is not an array,
/// or any folder object (at any depth) is malformed.
pub fn parse_folder_json(input: &str) -> Result<Vec<Folder>, ImportError> {
    let value: Value = serde_json::from_str(input)?;
    let Value::Array(items) = value else {
        return Err(ImportError::invalid("$", "expected an array of folders"));
    };
    items
        .iter()
        .enumerate()
        .map(|(index, item)| folder_from_value(item, &format!("[{index}]")))
        .collect()
}

fn folder_from_value(value: &Value, path: &str) -> Result<Folder, ImportError> {
    let Value::Object(object) = value else {
        return Err(ImportError::invalid(path, "expected an object"));
    };

    let name = match object.get("name") {
        Some(Value::String(name)) if !name.trim().is_empty() => name.clone(),
        Some(Value::String(_)) => {
            return Err(ImportError::invalid(format!("{path}.name"), "name must not be empty"))
        }
        Some(_) => return Err(ImportError::invalid(format!("{path}.name"), "name must be a string")),
        None => return Err(ImportError::invalid(format!("{path}.name"), "name is required")),
    };

    let mut folder = Folder::new(FolderId::generate(), name);
    folder.color = optional_string(object, "color", path)?;
    folder.text_color = optional_string(object, "textColor", path)?;
    folder.responsible = optional_string(object, "responsible", path)?;

    match object.get("tags") {
        None | Some(Value::Null) => {}
        Some(Value::Array(tags)) => {
            let mut names = Vec::with_capacity(tags.len());
            for (index, tag) in tags.iter().enumerate() {
                let Value::String(tag) = tag else {
                    return Err(ImportError::invalid(
                        format!("{path}.tags[{index}]"),
                        "tag must be a string",
                    ));
                };
                names.push(tag.as_str());
            }
            folder.set_tags(names);
        }
        Some(_) => return Err(ImportError::invalid(format!("{path}.tags"), "tags must be an array")),
    }

    match object.get("subFolders") {
        None | Some(Value::Null) => {}
        Some(Value::Array(children)) => {
            folder.sub_folders = children
                .iter()
                .enumerate()
                .map(|(index, child)| {
                    folder_from_value(child, &format!("{path}.subFolders[{index}]"))
                })
                .collect::<Result<_, _>>()?;
        }
        Some(_) => {
            return Err(ImportError::invalid(
                format!("{path}.subFolders"),
                "subFolders must be an array",
            ))
        }
    }

    Ok(folder)
}

fn optional_string(object: &Map<String, Value>, field: &str, path: &str) -> Result<String, ImportError> {
    match object.get(field) {
        None | Some(Value::Null) => Ok(String::new()),
        Some(Value::String(value)) => Ok(value.clone()),
        Some(_) => Err(ImportError::invalid(format!("{path}.{field}"), format!("{field} must be a string"))),
    }
}

/// Parse CSV rows into a folder forest, creating any ancestor named in a path
/// that no row defines.
///
/// # Errors
/// Returns an error on malformed CSV or a row with an empty name.
pub fn parse_folder_csv(input: &str) -> Result<Vec<Folder>, ImportError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(input.as_bytes());

    let mut tree = FolderTree::new();
    let mut by_path: HashMap<String, FolderId> = HashMap::new();
    let mut placeholders: HashSet<FolderId> = HashSet::new();

    for (index, record) in reader.records().enumerate() {
        let record = record?;
        let row = format!("row {}", index + 2);
        let field = |column: usize| record.get(column).unwrap_or_default().to_string();

        let name = field(0);
        if name.is_empty() {
            return Err(ImportError::invalid(format!("{row}.name"), "name must not be empty"));
        }

        let mut parent: Option<FolderId> = None;
        let mut full_path = String::new();
        for segment in field(2).split('/').map(str::trim).filter(|segment| !segment.is_empty()) {
            push_segment(&mut full_path, segment);
            if let Some(existing) = by_path.get(&full_path) {
                parent = Some(existing.clone());
                continue;
            }
            let ancestor = Folder::new(FolderId::generate(), segment);
            let ancestor_id = ancestor.id.clone();
            tree.insert(ancestor, parent.as_ref(), None)
                .map_err(|err| ImportError::invalid(format!("{row}.path"), err.to_string()))?;
            by_path.insert(full_path.clone(), ancestor_id.clone());
            placeholders.insert(ancestor_id.clone());
            parent = Some(ancestor_id);
        }
        push_segment(&mut full_path, &name);

        let mut folder = Folder::new(FolderId::generate(), name);
        folder.color = field(1);
        folder.responsible = field(3);
        folder.set_tags(field(4).split(';'));

        let placeholder =
            by_path.get(&full_path).filter(|id| placeholders.contains(*id)).cloned();
        if let Some(existing) = placeholder {
            placeholders.remove(&existing);
            folder.id = existing;
            tree.replace(&folder).map_err(|err| ImportError::invalid(&row, err.to_string()))?;
        } else {
            let id = folder.id.clone();
            tree.insert(folder, parent.as_ref(), None)
                .map_err(|err| ImportError::invalid(&row, err.to_string()))?;
            by_path.entry(full_path).or_insert(id);
        }
    }

    Ok(tree.to_folders())
}

fn push_segment(path: &mut String, segment: &str) {
    if !path.is_empty() {
        path.push('/');
    }
    path.push_str(segment);
}

/// Render folders as a pretty JSON array accepted by [`parse_folder_json`].
///
/// # Errors
/// Returns an error if serialization fails.
pub fn folders_to_json(folders: &[Folder]) -> Result<String, ImportError> {
    Ok(serde_json::to_string_pretty(folders)?)
}

/// Render one CSV row per folder, depth-first, with its ancestor path.
///
/// # Errors
/// Returns an error if the CSV writer fails.
pub fn folders_to_csv(folders: &[Folder]) -> Result<String, ImportError> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record(CSV_HEADER)?;
    let mut ancestors = Vec::new();
    for folder in folders {
        write_csv_rows(&mut writer, folder, &mut ancestors)?;
    }
    let bytes = writer.into_inner().map_err(|err| ImportError::Csv(err.into_error().into()))?;
    String::from_utf8(bytes).map_err(|err| ImportError::invalid("csv", err.to_string()))
}

fn write_csv_rows<'a>(
    writer: &mut csv::Writer<Vec<u8>>,
    folder: &'a Folder,
    ancestors: &mut Vec<&'a str>,
) -> Result<(), ImportError> {
    writer.write_record([
        folder.name.as_str(),
        folder.color.as_str(),
        ancestors.join("/").as_str(),
        folder.responsible.as_str(),
        folder.tags.join(";").as_str(),
    ])?;
    ancestors.push(&folder.name);
    for child in &folder.sub_folders {
        write_csv_rows(writer, child, ancestors)?;
    }
    ancestors.pop();
    Ok(())
}
