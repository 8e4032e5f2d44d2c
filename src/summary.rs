use crate::model::*;
use crate::validator::{Issue, Severity};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Counts over the schema alone.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StructureSummary {
    pub group_count: usize,
    pub field_count: usize,
    pub required_count: usize,
    pub option_count: usize,
    pub column_count: usize,
    pub fields_by_kind: BTreeMap<Kind, usize>,
    pub fields_by_role: BTreeMap<String, usize>,
}

impl StructureSummary {
    pub fn compute(schema: &FormSchema) -> Self {
        let mut summary = StructureSummary {
            group_count: schema.all_groups().len(),
            ..Default::default()
        };
        for field in schema.fields() {
            summary.field_count += 1;
            if field.required {
                summary.required_count += 1;
            }
            summary.option_count += field.kind.options().len();
            if let FieldKind::Table(spec) = &field.kind {
                summary.column_count += spec.columns.len();
            }
            *summary.fields_by_kind.entry(field.kind.kind()).or_default() += 1;
            *summary.fields_by_role.entry(field.role.clone()).or_default() += 1;
        }
        summary
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FormState {
    /// Nothing has been answered, skipped or aborted.
    Empty,
    Incomplete,
    /// No required-severity issues remain.
    Complete,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldProgress {
    pub state: String,
    pub required: bool,
    pub issue_count: usize,
}

/// Counts over the response store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressSummary {
    pub form_state: FormState,
    pub total: usize,
    /// Answered with a non-null value.
    pub filled: usize,
    /// Unanswered or answered null.
    pub empty: usize,
    pub empty_required: usize,
    pub answered_null: usize,
    pub unanswered: usize,
    pub skipped: usize,
    pub aborted: usize,
    pub fields: BTreeMap<String, FieldProgress>,
}

impl ProgressSummary {
    pub fn compute(schema: &FormSchema, responses: &ResponseStore, issues: &[Issue]) -> Self {
        let mut summary = ProgressSummary {
            form_state: FormState::Empty,
            total: 0,
            filled: 0,
            empty: 0,
            empty_required: 0,
            answered_null: 0,
            unanswered: 0,
            skipped: 0,
            aborted: 0,
            fields: BTreeMap::new(),
        };

        for field in schema.fields() {
            let response = responses.get(&field.id);
            summary.total += 1;
            match response {
                FieldResponse::Answered { value: Some(_) } => summary.filled += 1,
                FieldResponse::Answered { value: None } => summary.answered_null += 1,
                FieldResponse::Unanswered => summary.unanswered += 1,
                FieldResponse::Skipped { .. } => summary.skipped += 1,
                FieldResponse::Aborted { .. } => summary.aborted += 1,
            }
            let is_empty = matches!(
                response,
                FieldResponse::Unanswered | FieldResponse::Answered { value: None }
            );
            if is_empty {
                summary.empty += 1;
                if field.required {
                    summary.empty_required += 1;
                }
            }

            let prefix = field.id.as_str();
            let issue_count = issues
                .iter()
                .filter(|issue| issue_targets(&issue.reference, prefix))
                .count();
            summary.fields.insert(
                field.id.clone(),
                FieldProgress {
                    state: response.state_name().to_string(),
                    required: field.required,
                    issue_count,
                },
            );
        }

        let touched = summary.total - summary.unanswered;
        let blocking = issues.iter().any(|i| i.severity == Severity::Required);
        summary.form_state = if touched == 0 && summary.total > 0 {
            FormState::Empty
        } else if blocking {
            FormState::Incomplete
        } else {
            FormState::Complete
        };
        summary
    }
}

/// Whether an issue reference (`id`, `id.option`, `id[row]...`) belongs to field `id`.
fn issue_targets(reference: &str, id: &str) -> bool {
    match reference.strip_prefix(id) {
        Some(rest) => rest.is_empty() || rest.starts_with('.') || rest.starts_with('['),
        None => false,
    }
}

/// Everything an agent harness needs to decide what to ask about next.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InspectResult {
    pub structure_summary: StructureSummary,
    pub progress_summary: ProgressSummary,
    /// Required issues and recommendations, in document order.
    pub issues: Vec<Issue>,
}

impl InspectResult {
    pub fn is_complete(&self) -> bool {
        self.progress_summary.form_state == FormState::Complete
    }

    pub fn required_issues(&self) -> impl Iterator<Item = &Issue> {
        self.issues
            .iter()
            .filter(|i| i.severity == Severity::Required)
    }
}
