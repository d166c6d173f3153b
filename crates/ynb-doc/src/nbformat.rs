//! Serde types for nbformat-4 notebook files.

use crate::cell::{CellSeed, CellType};
use crate::error::Result;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value as JsonValue};

/// Major version written when a notebook has none recorded.
pub const NBFORMAT_MAJOR: i64 = 4;
/// Minor version written when a notebook has none recorded.
pub const NBFORMAT_MINOR: i64 = 5;

fn empty_object() -> JsonValue {
    json!({})
}

/// A whole notebook. Cells are kept as raw JSON and parsed one by one.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NotebookJson {
    #[serde(default = "empty_object")]
    pub metadata: JsonValue,
    pub nbformat: i64,
    pub nbformat_minor: i64,
    #[serde(default)]
    pub cells: Vec<JsonValue>,
}

/// Cell text, stored either whole or as a list of lines.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MultilineString {
    Single(String),
    Lines(Vec<String>),
}

impl MultilineString {
    pub fn joined(&self) -> String {
        match self {
            MultilineString::Single(s) => s.clone(),
            MultilineString::Lines(lines) => lines.concat(),
        }
    }
}

impl Default for MultilineString {
    fn default() -> Self {
        MultilineString::Single(String::new())
    }
}

/// One cell of a notebook file.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CellJson {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub cell_type: String,
    #[serde(default)]
    pub source: MultilineString,
    #[serde(default = "empty_object")]
    pub metadata: JsonValue,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outputs: Option<Vec<JsonValue>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_count: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attachments: Option<JsonValue>,
}

impl CellJson {
    /// Content for a new cell; fails on an unknown `cell_type`.
    pub(crate) fn into_seed(self) -> Result<CellSeed> {
        let cell_type: CellType = self.cell_type.parse()?;
        let mut seed = CellSeed::new(cell_type, self.id);
        seed.source = self.source.joined();
        seed.metadata = self.metadata;
        if cell_type == CellType::Code {
            seed.execution_count = self.execution_count;
            seed.outputs = self.outputs.unwrap_or_default();
        } else {
            seed.attachments = self.attachments;
        }
        Ok(seed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DocError;

    #[test]
    fn test_multiline_source() {
        let cell: CellJson = serde_json::from_value(json!({
            "cell_type": "code",
            "source": ["import os\n", "print(os.name)"],
            "metadata": {},
            "outputs": [],
            "execution_count": 2
        }))
        .unwrap();

        assert_eq!(cell.source.joined(), "import os\nprint(os.name)");
        let seed = cell.into_seed().unwrap();
        assert_eq!(seed.execution_count, Some(2));
        assert_eq!(seed.source, "import os\nprint(os.name)");
    }

    #[test]
    fn test_defaults() {
        let cell: CellJson = serde_json::from_value(json!({"cell_type": "markdown"})).unwrap();
        assert_eq!(cell.metadata, json!({}));
        assert_eq!(cell.source, MultilineString::default());

        let notebook: NotebookJson =
            serde_json::from_value(json!({"nbformat": 4, "nbformat_minor": 2})).unwrap();
        assert!(notebook.cells.is_empty());
        assert_eq!(notebook.metadata, json!({}));
    }

    #[test]
    fn test_unknown_cell_type() {
        let cell: CellJson = serde_json::from_value(json!({"cell_type": "heading"})).unwrap();
        assert_eq!(
            cell.into_seed().unwrap_err(),
            DocError::UnknownCellType("heading".to_string())
        );
    }
}
