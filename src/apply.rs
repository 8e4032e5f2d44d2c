//! Applies patch batches to a working copy of the response store.
//!
//! Every patch is checked on its own against the store as left by the patches before
//! it. A rejected patch changes nothing and never stops the rest of the batch.

use crate::frontmatter::FormMetadata;
use crate::model::*;
use crate::patch::{Patch, RowInput, ScalarInput};
use crate::summary::{ProgressSummary, StructureSummary};
use crate::table;
use crate::validator::{check_value, Bounds, Issue};
use crate::values;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApplyStatus {
    Applied,
    Partial,
    Rejected,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RejectedPatch {
    /// Position of the patch in the batch.
    pub index: usize,
    /// The patch as submitted.
    pub patch: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field_id: Option<String>,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplyResult {
    pub apply_status: ApplyStatus,
    pub rejected_patches: Vec<RejectedPatch>,
    pub structure_summary: StructureSummary,
    pub progress_summary: ProgressSummary,
    pub issues: Vec<Issue>,
}

/// The committed store plus the bookkeeping of one batch.
#[derive(Debug, Clone, PartialEq)]
pub struct PatchOutcome {
    pub responses: ResponseStore,
    /// Fields changed by at least one applied patch.
    pub touched: BTreeSet<String>,
    pub rejected: Vec<RejectedPatch>,
    pub applied: usize,
}

impl PatchOutcome {
    pub fn status(&self) -> ApplyStatus {
        if self.rejected.is_empty() {
            ApplyStatus::Applied
        } else if self.applied == 0 {
            ApplyStatus::Rejected
        } else {
            ApplyStatus::Partial
        }
    }
}

/// One entry of a batch: the raw JSON as submitted and, if it decoded, the patch.
pub type BatchEntry = (serde_json::Value, Result<Patch, String>);

/// Decodes a JSON array of patches. Entries that are not valid patches stay in the batch
/// as per-entry rejections; anything that is not a JSON array fails the whole batch.
pub fn decode_batch(json: &str) -> Result<Vec<BatchEntry>, String> {
    let raw: Vec<serde_json::Value> =
        serde_json::from_str(json).map_err(|e| format!("patch batch is not a JSON array: {e}"))?;
    Ok(raw
        .into_iter()
        .map(|value| {
            let patch = serde_json::from_value::<Patch>(value.clone())
                .map_err(|e| format!("malformed patch: {e}"));
            (value, patch)
        })
        .collect())
}

pub fn encode_batch(patches: Vec<Patch>) -> Vec<BatchEntry> {
    patches
        .into_iter()
        .map(|patch| {
            let raw = serde_json::to_value(&patch).unwrap_or(serde_json::Value::Null);
            (raw, Ok(patch))
        })
        .collect()
}

pub fn apply_patches(
    schema: &FormSchema,
    metadata: &FormMetadata,
    responses: &ResponseStore,
    batch: Vec<BatchEntry>,
) -> PatchOutcome {
    let mut outcome = PatchOutcome {
        responses: responses.clone(),
        touched: BTreeSet::new(),
        rejected: Vec::new(),
        applied: 0,
    };

    for (index, (raw, decoded)) in batch.into_iter().enumerate() {
        let result = decoded.and_then(|patch| {
            let applier = Applier {
                schema,
                metadata,
                responses: &outcome.responses,
            };
            applier
                .apply(&patch)
                .map(|response| (patch.field_id().to_string(), response))
        });
        match result {
            Ok((field_id, response)) => {
                log::debug!("patch {index} applied to `{field_id}`");
                outcome.responses.set(&field_id, response);
                outcome.touched.insert(field_id);
                outcome.applied += 1;
            }
            Err(message) => {
                log::debug!("patch {index} rejected: {message}");
                let field_id = raw
                    .get("field_id")
                    .and_then(|v| v.as_str())
                    .map(str::to_string);
                outcome.rejected.push(RejectedPatch {
                    index,
                    patch: raw,
                    field_id,
                    message,
                });
            }
        }
    }
    outcome
}

/// The outcome of a batch that could not be decoded at all.
pub fn rejected_batch(responses: &ResponseStore, message: String) -> PatchOutcome {
    PatchOutcome {
        responses: responses.clone(),
        touched: BTreeSet::new(),
        rejected: vec![RejectedPatch {
            index: 0,
            patch: serde_json::Value::Null,
            field_id: None,
            message,
        }],
        applied: 0,
    }
}

struct Applier<'a> {
    schema: &'a FormSchema,
    metadata: &'a FormMetadata,
    responses: &'a ResponseStore,
}

impl<'a> Applier<'a> {
    /// Computes the field's new response, or a rejection message.
    fn apply(&self, patch: &Patch) -> Result<FieldResponse, String> {
        let field_id = patch.field_id();
        let field = self
            .schema
            .field(field_id)
            .ok_or_else(|| format!("unknown field `{field_id}`"))?;
        let current = self.responses.get(field_id);

        match patch {
            Patch::SetString { value, .. } => {
                self.expect_kind(patch, field, Kind::String)?;
                let Some(text) = non_empty(value.as_deref()) else {
                    return Ok(FieldResponse::null());
                };
                reject_sentinel(text)?;
                self.commit(field, FieldValue::String(text.to_string()), Bounds::Both)
            }
            Patch::SetNumber { value, .. } => {
                self.expect_kind(patch, field, Kind::Number)?;
                let Some(input) = value else {
                    return Ok(FieldResponse::null());
                };
                let n = match input {
                    ScalarInput::Number(n) if n.is_finite() => *n,
                    other => {
                        let text = other.to_text();
                        if text.trim().is_empty() {
                            return Ok(FieldResponse::null());
                        }
                        values::parse_number(&text).map_err(|e| e.to_string())?
                    }
                };
                self.commit(field, FieldValue::Number(n), Bounds::Both)
            }
            Patch::SetStringList { value, .. } => {
                self.expect_kind(patch, field, Kind::StringList)?;
                let items = clean_items(value.as_deref().unwrap_or_default())?;
                if items.is_empty() {
                    return Ok(FieldResponse::null());
                }
                self.commit(field, FieldValue::StringList(items), Bounds::Both)
            }
            Patch::SetCheckboxes { value, .. } => {
                self.expect_kind(patch, field, Kind::Checkboxes)?;
                let FieldKind::Checkboxes(spec) = &field.kind else {
                    return Err(wrong_kind(patch, field));
                };
                let Some(updates) = value else {
                    return Ok(FieldResponse::null());
                };
                let mut states: BTreeMap<String, CheckboxState> = match current.value() {
                    Some(FieldValue::Checkboxes(states)) => states.clone(),
                    _ => spec
                        .options
                        .iter()
                        .map(|o| (o.id.clone(), spec.mode.default_state()))
                        .collect(),
                };
                for (option_id, state) in updates {
                    states.insert(option_id.clone(), *state);
                }
                let default = spec.mode.default_state();
                let untouched = states.values().all(|s| *s == default);
                let value = FieldValue::Checkboxes(states);
                self.check(field, &value, Bounds::Both)?;
                if untouched {
                    Ok(FieldResponse::Unanswered)
                } else {
                    Ok(FieldResponse::answered(value))
                }
            }
            Patch::SetSingleSelect { value, .. } => {
                self.expect_kind(patch, field, Kind::SingleSelect)?;
                let Some(option) = non_empty(value.as_deref()) else {
                    return Ok(FieldResponse::null());
                };
                self.commit(field, FieldValue::SingleSelect(option.to_string()), Bounds::Both)
            }
            Patch::SetMultiSelect { value, .. } => {
                self.expect_kind(patch, field, Kind::MultiSelect)?;
                let mut selected = clean_items(value.as_deref().unwrap_or_default())?;
                if selected.is_empty() {
                    return Ok(FieldResponse::null());
                }
                // Option order, so the stored answer matches what a re-parse yields.
                let options = field.kind.options();
                selected.sort_by_key(|id| {
                    options
                        .iter()
                        .position(|o| &o.id == id)
                        .unwrap_or(usize::MAX)
                });
                self.commit(field, FieldValue::MultiSelect(selected), Bounds::Both)
            }
            Patch::SetUrl { value, .. } => {
                self.expect_kind(patch, field, Kind::Url)?;
                let Some(text) = non_empty(value.as_deref()) else {
                    return Ok(FieldResponse::null());
                };
                let url = values::parse_url(text).map_err(|e| e.to_string())?;
                self.commit(field, FieldValue::Url(url), Bounds::Both)
            }
            Patch::SetUrlList { value, .. } => {
                self.expect_kind(patch, field, Kind::UrlList)?;
                let items = clean_items(value.as_deref().unwrap_or_default())?;
                if items.is_empty() {
                    return Ok(FieldResponse::null());
                }
                let urls = items
                    .iter()
                    .map(|item| values::parse_url(item))
                    .collect::<Result<Vec<_>, _>>()
                    .map_err(|e| e.to_string())?;
                self.commit(field, FieldValue::UrlList(urls), Bounds::Both)
            }
            Patch::SetDate { value, .. } => {
                self.expect_kind(patch, field, Kind::Date)?;
                let Some(text) = non_empty(value.as_deref()) else {
                    return Ok(FieldResponse::null());
                };
                let date = values::parse_date(text).map_err(|e| e.to_string())?;
                self.commit(field, FieldValue::Date(date), Bounds::Both)
            }
            Patch::SetYear { value, .. } => {
                self.expect_kind(patch, field, Kind::Year)?;
                let Some(input) = value else {
                    return Ok(FieldResponse::null());
                };
                let year = match input {
                    ScalarInput::Number(n) => values::year_from_number(*n),
                    ScalarInput::Text(text) if text.trim().is_empty() => {
                        return Ok(FieldResponse::null());
                    }
                    ScalarInput::Text(text) => values::parse_year(text),
                }
                .map_err(|e| e.to_string())?;
                self.commit(field, FieldValue::Year(year), Bounds::Both)
            }
            Patch::SetTable { value, .. } => {
                let spec = self.table_spec(patch, field)?;
                let Some(rows) = value else {
                    return Ok(FieldResponse::null());
                };
                let rows = rows
                    .iter()
                    .enumerate()
                    .map(|(i, row)| build_row(spec, row, i))
                    .collect::<Result<Vec<_>, _>>()?;
                self.commit(field, FieldValue::Table(rows), Bounds::Both)
            }
            Patch::AppendItem { value, .. } => {
                let mut items = self.current_items(patch, field, current)?;
                let item = clean_items(std::slice::from_ref(value))?;
                let Some(item) = item.into_iter().next() else {
                    return Err("cannot append an empty item".to_string());
                };
                let value = match field.kind.kind() {
                    Kind::UrlList => {
                        items.push(values::parse_url(&item).map_err(|e| e.to_string())?);
                        FieldValue::UrlList(items)
                    }
                    _ => {
                        items.push(item);
                        FieldValue::StringList(items)
                    }
                };
                self.commit(field, value, Bounds::Upper)
            }
            Patch::DeleteItem { index, .. } => {
                let mut items = self.current_items(patch, field, current)?;
                check_index(*index, items.len(), "items")?;
                items.remove(*index);
                let value = match field.kind.kind() {
                    Kind::UrlList => FieldValue::UrlList(items),
                    _ => FieldValue::StringList(items),
                };
                self.check(field, &value, Bounds::Lower)?;
                match value {
                    FieldValue::StringList(ref items) | FieldValue::UrlList(ref items)
                        if items.is_empty() =>
                    {
                        Ok(FieldResponse::null())
                    }
                    value => Ok(FieldResponse::answered(value)),
                }
            }
            Patch::AppendRow { value, .. } => {
                let spec = self.table_spec(patch, field)?;
                let mut rows = current_rows(current);
                rows.push(build_row(spec, value, rows.len())?);
                self.commit(field, FieldValue::Table(rows), Bounds::Upper)
            }
            Patch::DeleteRow { index, .. } => {
                self.table_spec(patch, field)?;
                let mut rows = current_rows(current);
                check_index(*index, rows.len(), "rows")?;
                rows.remove(*index);
                self.commit(field, FieldValue::Table(rows), Bounds::Lower)
            }
            Patch::ClearField { .. } => Ok(FieldResponse::Unanswered),
            Patch::SkipField { role, reason, .. } => {
                let reason = self.check_skip(role, reason.as_deref())?;
                Ok(FieldResponse::Skipped { reason })
            }
            Patch::AbortField { role, reason, .. } => {
                let reason = self.check_skip(role, reason.as_deref())?;
                Ok(FieldResponse::Aborted { reason })
            }
        }
    }

    fn commit(&self, field: &Field, value: FieldValue, bounds: Bounds) -> Result<FieldResponse, String> {
        self.check(field, &value, bounds)?;
        Ok(FieldResponse::answered(value))
    }

    fn check(&self, field: &Field, value: &FieldValue, bounds: Bounds) -> Result<(), String> {
        match check_value(field, value, bounds).into_iter().next() {
            Some(violation) => Err(violation.message),
            None => Ok(()),
        }
    }

    fn expect_kind(&self, patch: &Patch, field: &Field, kind: Kind) -> Result<(), String> {
        if field.kind.kind() == kind {
            Ok(())
        } else {
            Err(wrong_kind(patch, field))
        }
    }

    fn table_spec<'f>(&self, patch: &Patch, field: &'f Field) -> Result<&'f TableSpec, String> {
        match &field.kind {
            FieldKind::Table(spec) => Ok(spec),
            _ => Err(wrong_kind(patch, field)),
        }
    }

    fn current_items(
        &self,
        patch: &Patch,
        field: &Field,
        current: &FieldResponse,
    ) -> Result<Vec<String>, String> {
        if !matches!(field.kind.kind(), Kind::StringList | Kind::UrlList) {
            return Err(wrong_kind(patch, field));
        }
        Ok(match current.value() {
            Some(FieldValue::StringList(items) | FieldValue::UrlList(items)) => items.clone(),
            _ => Vec::new(),
        })
    }

    fn check_skip(&self, role: &str, reason: Option<&str>) -> Result<Option<String>, String> {
        if !self.metadata.has_role(role) {
            return Err(format!("role `{role}` is not declared in the frontmatter"));
        }
        match reason.map(str::trim) {
            Some(reason) if reason.contains(['\n', '\r']) => {
                Err("a reason must fit on one line".to_string())
            }
            Some("") | None => Ok(None),
            Some(reason) => Ok(Some(reason.to_string())),
        }
    }
}

fn wrong_kind(patch: &Patch, field: &Field) -> String {
    format!(
        "`{}` is not valid for {} field `{}`",
        patch.op_name(),
        field.kind.kind(),
        field.id
    )
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|text| !text.is_empty())
}

fn reject_sentinel(text: &str) -> Result<(), String> {
    if values::is_sentinel(text) {
        Err(format!(
            "`{}` is a reserved marker; use skip_field or abort_field",
            text.trim()
        ))
    } else {
        Ok(())
    }
}

/// Trims list items and drops blank ones. Items must be single-line plain values.
fn clean_items(items: &[String]) -> Result<Vec<String>, String> {
    let mut out = Vec::with_capacity(items.len());
    for item in items {
        let item = item.trim();
        if item.is_empty() {
            continue;
        }
        if item.contains(['\n', '\r']) {
            return Err(format!("list item {item:?} spans more than one line"));
        }
        reject_sentinel(item)?;
        out.push(item.to_string());
    }
    Ok(out)
}

fn check_index(index: usize, len: usize, noun: &str) -> Result<(), String> {
    if index < len {
        Ok(())
    } else {
        Err(format!("index {index} is out of range ({len} {noun})"))
    }
}

fn current_rows(current: &FieldResponse) -> Vec<TableRowResponse> {
    match current.value() {
        Some(FieldValue::Table(rows)) => rows.clone(),
        _ => Vec::new(),
    }
}

/// Decodes one row of cell text into typed cells. Sentinels are allowed in cells.
fn build_row(spec: &TableSpec, input: &RowInput, row: usize) -> Result<TableRowResponse, String> {
    if let Some(unknown) = input.keys().find(|id| spec.column(id).is_none()) {
        return Err(format!("row {}: no column `{unknown}`", row + 1));
    }
    let mut out = TableRowResponse::new();
    for column in &spec.columns {
        let text = input
            .get(&column.id)
            .and_then(Option::as_ref)
            .map(ScalarInput::to_text)
            .unwrap_or_default();
        table::escape_cell(&text).map_err(|e| format!("row {}: {e}", row + 1))?;
        let cell = table::parse_cell(&text, column.cell_type)
            .map_err(|e| format!("row {}, column `{}`: {e}", row + 1, column.id))?;
        out.insert(column.id.clone(), cell);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn schema() -> FormSchema {
        let field = |id: &str, kind: FieldKind| {
            GroupItem::Field(Field {
                id: id.to_string(),
                label: id.to_string(),
                role: DEFAULT_ROLE.to_string(),
                priority: Priority::Medium,
                required: false,
                kind,
            })
        };
        FormSchema {
            id: "f".to_string(),
            title: None,
            groups: vec![FieldGroup {
                id: "g".to_string(),
                title: None,
                children: vec![
                    field("name", FieldKind::String(StringSpec::default())),
                    field(
                        "tags",
                        FieldKind::StringList(ListSpec {
                            max_items: Some(2),
                            ..ListSpec::default()
                        }),
                    ),
                    field(
                        "tasks",
                        FieldKind::Checkboxes(CheckboxesSpec {
                            options: vec![
                                ChoiceOption {
                                    id: "a".to_string(),
                                    label: "A".to_string(),
                                },
                                ChoiceOption {
                                    id: "b".to_string(),
                                    label: "B".to_string(),
                                },
                            ],
                            mode: CheckboxMode::Multi,
                            min_done: None,
                        }),
                    ),
                ],
            }],
            docs: Vec::new(),
        }
    }

    fn run(patches: serde_json::Value) -> PatchOutcome {
        let batch = decode_batch(&patches.to_string()).unwrap();
        apply_patches(&schema(), &FormMetadata::default(), &ResponseStore::new(), batch)
    }

    #[test]
    fn test_wrong_kind_is_rejected() {
        let outcome = run(json!([{"op": "set_number", "field_id": "name", "value": 3}]));
        assert_eq!(outcome.status(), ApplyStatus::Rejected);
        assert!(outcome.rejected[0].message.contains("not valid for string field"));
    }

    #[test]
    fn test_sentinel_text_is_rejected() {
        let outcome = run(json!([{"op": "set_string", "field_id": "name", "value": "%SKIP%"}]));
        assert_eq!(outcome.status(), ApplyStatus::Rejected);
    }

    #[test]
    fn test_empty_string_is_null() {
        let outcome = run(json!([{"op": "set_string", "field_id": "name", "value": "  "}]));
        assert_eq!(outcome.responses.get("name"), &FieldResponse::null());
        assert!(outcome.touched.contains("name"));
    }

    #[test]
    fn test_append_respects_upper_bound() {
        let outcome = run(json!([
            {"op": "append_item", "field_id": "tags", "value": "x"},
            {"op": "append_item", "field_id": "tags", "value": "y"},
            {"op": "append_item", "field_id": "tags", "value": "z"},
        ]));
        assert_eq!(outcome.status(), ApplyStatus::Partial);
        assert_eq!(outcome.rejected.len(), 1);
        assert_eq!(outcome.rejected[0].index, 2);
        assert_eq!(
            outcome.responses.get("tags"),
            &FieldResponse::answered(FieldValue::StringList(vec![
                "x".to_string(),
                "y".to_string()
            ]))
        );
    }

    #[test]
    fn test_checkboxes_merge_and_normalise() {
        let outcome = run(json!([
            {"op": "set_checkboxes", "field_id": "tasks", "value": {"a": "done"}},
            {"op": "set_checkboxes", "field_id": "tasks", "value": {"b": "na"}},
        ]));
        let Some(FieldValue::Checkboxes(states)) = outcome.responses.get("tasks").value() else {
            panic!("tasks should be answered");
        };
        assert_eq!(states["a"], CheckboxState::Done);
        assert_eq!(states["b"], CheckboxState::Na);

        let outcome = run(json!([
            {"op": "set_checkboxes", "field_id": "tasks", "value": {"a": "todo"}},
        ]));
        assert_eq!(outcome.responses.get("tasks"), &FieldResponse::Unanswered);
    }

    #[test]
    fn test_checkbox_state_must_fit_mode() {
        let outcome = run(json!([
            {"op": "set_checkboxes", "field_id": "tasks", "value": {"a": "yes"}},
        ]));
        assert_eq!(outcome.status(), ApplyStatus::Rejected);
    }

    #[test]
    fn test_skip_requires_declared_role() {
        let outcome = run(json!([
            {"op": "skip_field", "field_id": "name", "role": "robot"},
            {"op": "skip_field", "field_id": "tags", "role": "user", "reason": "n/a"},
        ]));
        assert_eq!(outcome.status(), ApplyStatus::Partial);
        assert_eq!(
            outcome.responses.get("tags"),
            &FieldResponse::Skipped {
                reason: Some("n/a".to_string())
            }
        );
    }

    #[test]
    fn test_malformed_entry_does_not_sink_batch() {
        let outcome = run(json!([
            {"op": "set_string", "field_id": "name", "value": "Ada"},
            {"op": "explode"},
        ]));
        assert_eq!(outcome.status(), ApplyStatus::Partial);
        assert!(outcome.rejected[0].message.starts_with("malformed patch"));
    }

    #[test]
    fn test_non_array_batch() {
        assert!(decode_batch("{\"op\": \"clear_field\"}").is_err());
        assert!(decode_batch("not json").is_err());
    }

    #[test]
    fn test_unknown_field() {
        let outcome = run(json!([{"op": "clear_field", "field_id": "ghost"}]));
        assert_eq!(outcome.rejected[0].field_id.as_deref(), Some("ghost"));
        assert!(outcome.rejected[0].message.contains("unknown field"));
    }
}
