//! Findings about a parsed form's current answers. Issues are data, never errors.

use crate::model::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IssueScope {
    Form,
    Group,
    Field,
    Option,
    Cell,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueReason {
    MissingRequired,
    OutOfRange,
    LengthViolation,
    PatternMismatch,
    InvalidOption,
    ItemCountViolation,
    DuplicateItem,
    RowCountViolation,
    InvalidCell,
    MissingRequiredCell,
    InvalidValue,
    CheckboxIncomplete,
    OptionalUnanswered,
}

impl IssueReason {
    fn weight(self) -> u8 {
        match self {
            IssueReason::MissingRequired => 3,
            IssueReason::OptionalUnanswered => 1,
            _ => 2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Required,
    Recommended,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Issue {
    /// A field id, `field.option`, or `field[row].column`.
    #[serde(rename = "ref")]
    pub reference: String,
    pub scope: IssueScope,
    pub reason: IssueReason,
    pub severity: Severity,
    /// 1 is the most urgent, 5 the least.
    pub priority: u8,
    pub message: String,
}

impl fmt::Display for Issue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[P{}] {}: {}", self.priority, self.reference, self.message)
    }
}

/// A constraint violation before priority and severity are attached.
#[derive(Debug, Clone, PartialEq)]
pub struct Violation {
    pub reference: String,
    pub scope: IssueScope,
    pub reason: IssueReason,
    pub message: String,
}

impl Violation {
    fn field(field: &Field, reason: IssueReason, message: String) -> Self {
        Self {
            reference: field.id.clone(),
            scope: IssueScope::Field,
            reason,
            message,
        }
    }
}

/// Which count bounds (items, selections, rows) a check enforces. Value-level
/// constraints such as ranges and patterns are always enforced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bounds {
    Both,
    /// Growing a list or table can only break its maximum.
    Upper,
    /// Shrinking can only break its minimum.
    Lower,
}

impl Bounds {
    fn lower(self) -> bool {
        matches!(self, Bounds::Both | Bounds::Lower)
    }

    fn upper(self) -> bool {
        matches!(self, Bounds::Both | Bounds::Upper)
    }
}

pub fn priority_tier(field_priority: Priority, reason: IssueReason) -> u8 {
    match field_priority.weight() + reason.weight() {
        score if score >= 5 => 1,
        4 => 2,
        3 => 3,
        2 => 4,
        _ => 5,
    }
}

/// Required-severity issues in document order.
pub fn validate(schema: &FormSchema, responses: &ResponseStore) -> Vec<Issue> {
    collect_issues(schema, responses, false)
}

/// `validate` plus an `optional_unanswered` recommendation for every optional field
/// nobody has touched yet.
pub fn inspect_issues(schema: &FormSchema, responses: &ResponseStore) -> Vec<Issue> {
    collect_issues(schema, responses, true)
}

fn collect_issues(
    schema: &FormSchema,
    responses: &ResponseStore,
    recommendations: bool,
) -> Vec<Issue> {
    let mut issues = Vec::new();
    for field in schema.fields() {
        let response = responses.get(&field.id);
        let mut push = |violation: Violation, severity: Severity| {
            issues.push(Issue {
                priority: priority_tier(field.priority, violation.reason),
                reference: violation.reference,
                scope: violation.scope,
                reason: violation.reason,
                severity,
                message: violation.message,
            });
        };

        match response {
            FieldResponse::Skipped { .. } | FieldResponse::Aborted { .. } => {}
            FieldResponse::Unanswered | FieldResponse::Answered { value: None } => {
                if field.required {
                    push(
                        Violation::field(
                            field,
                            IssueReason::MissingRequired,
                            format!("\"{}\" is required", field.label),
                        ),
                        Severity::Required,
                    );
                } else if recommendations && *response == FieldResponse::Unanswered {
                    push(
                        Violation::field(
                            field,
                            IssueReason::OptionalUnanswered,
                            format!("\"{}\" has not been answered", field.label),
                        ),
                        Severity::Recommended,
                    );
                }
            }
            FieldResponse::Answered { value: Some(value) } => {
                for violation in check_answer(field, value, Bounds::Both, true) {
                    push(violation, Severity::Required);
                }
                for violation in check_completeness(field, value) {
                    push(violation, Severity::Required);
                }
            }
        }
    }
    log::debug!("validation produced {} issues", issues.len());
    issues
}

/// Static constraint checks shared by the validator and the patch applier.
/// Required-ness is not checked here, neither for the field nor for its table cells.
pub fn check_value(field: &Field, value: &FieldValue, bounds: Bounds) -> Vec<Violation> {
    check_answer(field, value, bounds, false)
}

fn check_answer(
    field: &Field,
    value: &FieldValue,
    bounds: Bounds,
    required_cells: bool,
) -> Vec<Violation> {
    let mut out = Vec::new();
    if value.kind() != field.kind.kind() {
        out.push(Violation::field(
            field,
            IssueReason::InvalidValue,
            format!(
                "\"{}\" holds a {} value but is a {} field",
                field.label,
                value.kind(),
                field.kind.kind()
            ),
        ));
        return out;
    }

    match (&field.kind, value) {
        (FieldKind::String(spec), FieldValue::String(text)) => {
            check_length(field, &field.id, text, spec.min_length, spec.max_length, &mut out);
            if let Some(pattern) = &spec.pattern {
                if !pattern.is_match(text) {
                    out.push(Violation::field(
                        field,
                        IssueReason::PatternMismatch,
                        format!(
                            "\"{}\" does not match the pattern `{}`",
                            field.label,
                            pattern.as_str()
                        ),
                    ));
                }
            }
        }
        (FieldKind::Number(spec), FieldValue::Number(n)) => {
            if spec.integer && n.fract() != 0.0 {
                out.push(Violation::field(
                    field,
                    IssueReason::InvalidValue,
                    format!("\"{}\" must be a whole number (got {n})", field.label),
                ));
            }
            check_range(field, *n, spec.min, spec.max, &mut out);
        }
        (FieldKind::StringList(spec), FieldValue::StringList(items))
        | (FieldKind::UrlList(spec), FieldValue::UrlList(items)) => {
            check_count(
                field,
                IssueReason::ItemCountViolation,
                "items",
                items.len(),
                spec.min_items,
                spec.max_items,
                bounds,
                &mut out,
            );
            for (i, item) in items.iter().enumerate() {
                let reference = format!("{}[{i}]", field.id);
                check_length(
                    field,
                    &reference,
                    item,
                    spec.item_min_length,
                    spec.item_max_length,
                    &mut out,
                );
            }
            if spec.unique_items {
                check_unique(field, items, &mut out);
            }
        }
        (FieldKind::Checkboxes(spec), FieldValue::Checkboxes(states)) => {
            for (option_id, state) in states {
                if !spec.options.iter().any(|o| &o.id == option_id) {
                    out.push(unknown_option(field, option_id));
                } else if !spec.mode.allows(*state) {
                    out.push(Violation {
                        reference: format!("{}.{option_id}", field.id),
                        scope: IssueScope::Option,
                        reason: IssueReason::InvalidOption,
                        message: format!(
                            "`{}` is not a valid state in {} mode",
                            state.as_str(),
                            spec.mode.as_str()
                        ),
                    });
                }
            }
        }
        (FieldKind::SingleSelect(spec), FieldValue::SingleSelect(selected)) => {
            if !spec.options.iter().any(|o| &o.id == selected) {
                out.push(unknown_option(field, selected));
            }
        }
        (FieldKind::MultiSelect(spec), FieldValue::MultiSelect(selected)) => {
            for option_id in selected {
                if !spec.options.iter().any(|o| &o.id == option_id) {
                    out.push(unknown_option(field, option_id));
                }
            }
            check_unique(field, selected, &mut out);
            check_count(
                field,
                IssueReason::ItemCountViolation,
                "selections",
                selected.len(),
                spec.min_selections,
                spec.max_selections,
                bounds,
                &mut out,
            );
        }
        (FieldKind::Url, FieldValue::Url(_)) => {}
        (FieldKind::Date(spec), FieldValue::Date(date)) => {
            // YYYY-MM-DD compares correctly as text.
            if let Some(min) = &spec.min {
                if date < min {
                    out.push(Violation::field(
                        field,
                        IssueReason::OutOfRange,
                        format!("\"{}\" must be on or after {min} (got {date})", field.label),
                    ));
                }
            }
            if let Some(max) = &spec.max {
                if date > max {
                    out.push(Violation::field(
                        field,
                        IssueReason::OutOfRange,
                        format!("\"{}\" must be on or before {max} (got {date})", field.label),
                    ));
                }
            }
        }
        (FieldKind::Year(spec), FieldValue::Year(year)) => {
            check_range(
                field,
                f64::from(*year),
                spec.min.map(f64::from),
                spec.max.map(f64::from),
                &mut out,
            );
        }
        (FieldKind::Table(spec), FieldValue::Table(rows)) => {
            check_count(
                field,
                IssueReason::RowCountViolation,
                "rows",
                rows.len(),
                spec.min_rows,
                spec.max_rows,
                bounds,
                &mut out,
            );
            check_rows(field, spec, rows, required_cells, &mut out);
        }
        _ => {}
    }
    out
}

/// Completion rules that only make sense for a committed answer, never for a single patch.
fn check_completeness(field: &Field, value: &FieldValue) -> Vec<Violation> {
    let mut out = Vec::new();
    let (FieldKind::Checkboxes(spec), FieldValue::Checkboxes(states)) = (&field.kind, value) else {
        return out;
    };

    if let Some(min_done) = spec.min_done {
        let done = states
            .values()
            .filter(|s| matches!(s, CheckboxState::Done | CheckboxState::Yes))
            .count();
        if done < min_done {
            out.push(Violation::field(
                field,
                IssueReason::CheckboxIncomplete,
                format!(
                    "\"{}\" needs at least {min_done} checked options (got {done})",
                    field.label
                ),
            ));
        }
    } else if field.required {
        for option in &spec.options {
            let state = states
                .get(&option.id)
                .copied()
                .unwrap_or_else(|| spec.mode.default_state());
            if !spec.mode.is_resolved(state) {
                out.push(Violation {
                    reference: format!("{}.{}", field.id, option.id),
                    scope: IssueScope::Option,
                    reason: IssueReason::CheckboxIncomplete,
                    message: format!("\"{}\" is still {}", option.label, state.as_str()),
                });
            }
        }
    }
    out
}

fn check_rows(
    field: &Field,
    spec: &TableSpec,
    rows: &[TableRowResponse],
    required_cells: bool,
    out: &mut Vec<Violation>,
) {
    for (i, row) in rows.iter().enumerate() {
        for column_id in row.keys() {
            if spec.column(column_id).is_none() {
                out.push(Violation {
                    reference: format!("{}[{i}].{column_id}", field.id),
                    scope: IssueScope::Cell,
                    reason: IssueReason::InvalidCell,
                    message: format!("\"{}\" has no column `{column_id}`", field.label),
                });
            }
        }
        for column in &spec.columns {
            let reference = format!("{}[{i}].{}", field.id, column.id);
            match row.get(&column.id) {
                None | Some(CellResponse::Answered { value: None }) => {
                    if required_cells && column.required {
                        out.push(Violation {
                            reference,
                            scope: IssueScope::Cell,
                            reason: IssueReason::MissingRequiredCell,
                            message: format!("row {} is missing \"{}\"", i + 1, column.label),
                        });
                    }
                }
                Some(CellResponse::Answered { value: Some(cell) }) => {
                    if cell.cell_type() != column.cell_type {
                        out.push(Violation {
                            reference,
                            scope: IssueScope::Cell,
                            reason: IssueReason::InvalidCell,
                            message: format!(
                                "row {} \"{}\" must be a {} cell",
                                i + 1,
                                column.label,
                                column.cell_type.as_str()
                            ),
                        });
                    }
                }
                Some(CellResponse::Skipped { .. } | CellResponse::Aborted { .. }) => {}
            }
        }
    }
}

fn unknown_option(field: &Field, option_id: &str) -> Violation {
    Violation {
        reference: format!("{}.{option_id}", field.id),
        scope: IssueScope::Option,
        reason: IssueReason::InvalidOption,
        message: format!("\"{}\" has no option `{option_id}`", field.label),
    }
}

fn check_length(
    field: &Field,
    reference: &str,
    text: &str,
    min: Option<usize>,
    max: Option<usize>,
    out: &mut Vec<Violation>,
) {
    let length = text.chars().count();
    let message = match (min, max) {
        (Some(min), _) if length < min => {
            format!("\"{}\" must be at least {min} characters (got {length})", field.label)
        }
        (_, Some(max)) if length > max => {
            format!("\"{}\" must be at most {max} characters (got {length})", field.label)
        }
        _ => return,
    };
    out.push(Violation {
        reference: reference.to_string(),
        scope: IssueScope::Field,
        reason: IssueReason::LengthViolation,
        message,
    });
}

fn check_range(field: &Field, n: f64, min: Option<f64>, max: Option<f64>, out: &mut Vec<Violation>) {
    let message = match (min, max) {
        (Some(min), _) if n < min => format!("\"{}\" must be at least {min} (got {n})", field.label),
        (_, Some(max)) if n > max => format!("\"{}\" must be at most {max} (got {n})", field.label),
        _ => return,
    };
    out.push(Violation::field(field, IssueReason::OutOfRange, message));
}

#[allow(clippy::too_many_arguments)]
fn check_count(
    field: &Field,
    reason: IssueReason,
    noun: &str,
    count: usize,
    min: Option<usize>,
    max: Option<usize>,
    bounds: Bounds,
    out: &mut Vec<Violation>,
) {
    let message = match (min, max) {
        (Some(min), _) if bounds.lower() && count < min => {
            format!("\"{}\" needs at least {min} {noun} (got {count})", field.label)
        }
        (_, Some(max)) if bounds.upper() && count > max => {
            format!("\"{}\" allows at most {max} {noun} (got {count})", field.label)
        }
        _ => return,
    };
    out.push(Violation::field(field, reason, message));
}

fn check_unique(field: &Field, items: &[String], out: &mut Vec<Violation>) {
    let mut seen = BTreeSet::new();
    for item in items {
        if !seen.insert(item.as_str()) {
            out.push(Violation::field(
                field,
                IssueReason::DuplicateItem,
                format!("\"{}\" lists `{item}` more than once", field.label),
            ));
        }
    }
}
