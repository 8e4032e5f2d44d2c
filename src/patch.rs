use crate::model::CheckboxState;
use crate::values;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A number given either as a JSON number or as text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ScalarInput {
    Number(f64),
    Text(String),
}

impl ScalarInput {
    pub fn to_text(&self) -> String {
        match self {
            ScalarInput::Number(n) => values::format_number(*n),
            ScalarInput::Text(s) => s.clone(),
        }
    }
}

impl From<&str> for ScalarInput {
    fn from(text: &str) -> Self {
        ScalarInput::Text(text.to_string())
    }
}

impl From<f64> for ScalarInput {
    fn from(n: f64) -> Self {
        ScalarInput::Number(n)
    }
}

/// One table row as written by a caller: column id to cell text. `null` is an empty cell.
pub type RowInput = BTreeMap<String, Option<ScalarInput>>;

/// A single mutation request. Encoded as a JSON object tagged by `op`.
///
/// On `set_*` operations a `null` value is an explicit empty answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Patch {
    SetString {
        field_id: String,
        value: Option<String>,
    },
    SetNumber {
        field_id: String,
        value: Option<ScalarInput>,
    },
    SetStringList {
        field_id: String,
        value: Option<Vec<String>>,
    },
    /// Merged into the current states; options not named keep theirs.
    SetCheckboxes {
        field_id: String,
        value: Option<BTreeMap<String, CheckboxState>>,
    },
    SetSingleSelect {
        field_id: String,
        value: Option<String>,
    },
    SetMultiSelect {
        field_id: String,
        value: Option<Vec<String>>,
    },
    SetUrl {
        field_id: String,
        value: Option<String>,
    },
    SetUrlList {
        field_id: String,
        value: Option<Vec<String>>,
    },
    SetDate {
        field_id: String,
        value: Option<String>,
    },
    SetYear {
        field_id: String,
        value: Option<ScalarInput>,
    },
    SetTable {
        field_id: String,
        value: Option<Vec<RowInput>>,
    },
    AppendItem {
        field_id: String,
        value: String,
    },
    DeleteItem {
        field_id: String,
        index: usize,
    },
    AppendRow {
        field_id: String,
        value: RowInput,
    },
    DeleteRow {
        field_id: String,
        index: usize,
    },
    ClearField {
        field_id: String,
    },
    SkipField {
        field_id: String,
        role: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
    AbortField {
        field_id: String,
        role: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
}

impl Patch {
    pub fn field_id(&self) -> &str {
        match self {
            Patch::SetString { field_id, .. }
            | Patch::SetNumber { field_id, .. }
            | Patch::SetStringList { field_id, .. }
            | Patch::SetCheckboxes { field_id, .. }
            | Patch::SetSingleSelect { field_id, .. }
            | Patch::SetMultiSelect { field_id, .. }
            | Patch::SetUrl { field_id, .. }
            | Patch::SetUrlList { field_id, .. }
            | Patch::SetDate { field_id, .. }
            | Patch::SetYear { field_id, .. }
            | Patch::SetTable { field_id, .. }
            | Patch::AppendItem { field_id, .. }
            | Patch::DeleteItem { field_id, .. }
            | Patch::AppendRow { field_id, .. }
            | Patch::DeleteRow { field_id, .. }
            | Patch::ClearField { field_id }
            | Patch::SkipField { field_id, .. }
            | Patch::AbortField { field_id, .. } => field_id,
        }
    }

    pub fn op_name(&self) -> &'static str {
        match self {
            Patch::SetString { .. } => "set_string",
            Patch::SetNumber { .. } => "set_number",
            Patch::SetStringList { .. } => "set_string_list",
            Patch::SetCheckboxes { .. } => "set_checkboxes",
            Patch::SetSingleSelect { .. } => "set_single_select",
            Patch::SetMultiSelect { .. } => "set_multi_select",
            Patch::SetUrl { .. } => "set_url",
            Patch::SetUrlList { .. } => "set_url_list",
            Patch::SetDate { .. } => "set_date",
            Patch::SetYear { .. } => "set_year",
            Patch::SetTable { .. } => "set_table",
            Patch::AppendItem { .. } => "append_item",
            Patch::DeleteItem { .. } => "delete_item",
            Patch::AppendRow { .. } => "append_row",
            Patch::DeleteRow { .. } => "delete_row",
            Patch::ClearField { .. } => "clear_field",
            Patch::SkipField { .. } => "skip_field",
            Patch::AbortField { .. } => "abort_field",
        }
    }
}
