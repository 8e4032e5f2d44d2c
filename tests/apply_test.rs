use formdoc_core::model::{CellResponse, CellValue, FieldResponse, FieldValue};
use formdoc_core::patch::{RowInput, ScalarInput};
use formdoc_core::{apply, apply_json, parse, ApplyStatus, IssueReason, ParsedForm, Patch};
use pretty_assertions::assert_eq;

const FORM: &str = r#"---
form:
  roles: [user, agent]
---
{% form id="signup" %}
{% group id="person" %}

{% string-field id="name" label="Name" required=true %}
{% /string-field %}

{% number-field id="age" label="Age" min=0 max=120 %}
{% /number-field %}

{% string-list id="hobbies" maxItems=2 %}
{% /string-list %}

{% multi-select id="langs" %}
- [ ] Rust {% #rust %}
- [ ] Go {% #go %}
- [ ] Zig {% #zig %}
{% /multi-select %}

{% table-field id="refs" label="References" minRows=1 maxRows=3 columnIds=["who", "years"] columnTypes=["string", "number"] requiredColumns=["who"] %}
{% /table-field %}

{% /group %}
{% /form %}
"#;

fn form() -> ParsedForm {
    parse(FORM, "signup.form.md").unwrap()
}

fn row(who: &str, years: f64) -> RowInput {
    let mut row = RowInput::new();
    row.insert("who".to_string(), Some(ScalarInput::from(who)));
    row.insert("years".to_string(), Some(ScalarInput::from(years)));
    row
}

fn has_issue(issues: &[formdoc_core::Issue], reference: &str) -> bool {
    issues.iter().any(|i| i.reference == reference)
}

#[test]
fn test_number_out_of_range_then_fixed() {
    let form = form();
    let (form, result) = apply(
        &form,
        vec![Patch::SetNumber {
            field_id: "age".to_string(),
            value: Some(ScalarInput::from("150")),
        }],
    );
    assert_eq!(result.apply_status, ApplyStatus::Rejected);
    assert_eq!(result.rejected_patches.len(), 1);
    assert!(result.rejected_patches[0].message.contains("at most 120"));
    assert_eq!(form.responses().get("age"), &FieldResponse::Unanswered);

    let (form, result) = apply(
        &form,
        vec![Patch::SetNumber {
            field_id: "age".to_string(),
            value: Some(ScalarInput::from("42")),
        }],
    );
    assert_eq!(result.apply_status, ApplyStatus::Applied);
    assert_eq!(
        form.responses().get("age"),
        &FieldResponse::answered(FieldValue::Number(42.0))
    );
    assert!(!has_issue(&result.issues, "age"));
}

#[test]
fn test_partial_batch_keeps_good_patches() {
    let json = r#"[
        {"op": "set_string", "field_id": "name", "value": "Ada"},
        {"op": "set_number", "field_id": "name", "value": 3},
        {"op": "set_multi_select", "field_id": "langs", "value": ["zig", "rust"]}
    ]"#;
    let (next, result) = apply_json(&form(), json);

    assert_eq!(result.apply_status, ApplyStatus::Partial);
    assert_eq!(result.rejected_patches.len(), 1);
    assert_eq!(result.rejected_patches[0].index, 1);
    assert_eq!(result.rejected_patches[0].field_id.as_deref(), Some("name"));
    assert_eq!(
        next.responses().get("name"),
        &FieldResponse::answered(FieldValue::String("Ada".to_string()))
    );
    // Selections come back in option order.
    assert_eq!(
        next.responses().get("langs"),
        &FieldResponse::answered(FieldValue::MultiSelect(vec![
            "rust".to_string(),
            "zig".to_string()
        ]))
    );
    let touched: Vec<&str> = next.touched().iter().map(String::as_str).collect();
    assert_eq!(touched, vec!["langs", "name"]);
}

#[test]
fn test_table_rows_respect_bounds() {
    let mut form = form();
    for (i, who) in ["Ann", "Bo", "Cy"].iter().enumerate() {
        let (next, result) = apply(
            &form,
            vec![Patch::AppendRow {
                field_id: "refs".to_string(),
                value: row(who, i as f64),
            }],
        );
        assert_eq!(result.apply_status, ApplyStatus::Applied, "row {who}");
        form = next;
    }

    let (form, result) = apply(
        &form,
        vec![Patch::AppendRow {
            field_id: "refs".to_string(),
            value: row("Di", 4.0),
        }],
    );
    assert_eq!(result.apply_status, ApplyStatus::Rejected);
    assert!(result.rejected_patches[0].message.contains("at most 3 rows"));

    let (form, result) = apply(
        &form,
        vec![Patch::DeleteRow {
            field_id: "refs".to_string(),
            index: 0,
        }],
    );
    assert_eq!(result.apply_status, ApplyStatus::Applied);
    let Some(FieldValue::Table(rows)) = form.responses().get("refs").value() else {
        panic!("refs should hold rows");
    };
    assert_eq!(rows.len(), 2);
    assert_eq!(
        rows[0]["who"],
        CellResponse::Answered {
            value: Some(CellValue::String("Bo".to_string()))
        }
    );
}

#[test]
fn test_delete_out_of_range_and_below_minimum() {
    let (form, _) = apply(
        &form(),
        vec![Patch::AppendRow {
            field_id: "refs".to_string(),
            value: row("Ann", 2.0),
        }],
    );
    let (_, result) = apply(
        &form,
        vec![Patch::DeleteRow {
            field_id: "refs".to_string(),
            index: 5,
        }],
    );
    assert!(result.rejected_patches[0].message.contains("out of range"));

    let (_, result) = apply(
        &form,
        vec![Patch::DeleteRow {
            field_id: "refs".to_string(),
            index: 0,
        }],
    );
    assert!(result.rejected_patches[0].message.contains("at least 1 rows"));
}

#[test]
fn test_cell_sentinels_and_missing_required_cells() {
    let mut skipped = RowInput::new();
    skipped.insert("who".to_string(), Some(ScalarInput::from("Ann")));
    skipped.insert("years".to_string(), Some(ScalarInput::from("%SKIP% (unsure)")));
    let mut missing = RowInput::new();
    missing.insert("years".to_string(), Some(ScalarInput::from(3.0)));

    let (form, result) = apply(
        &form(),
        vec![
            Patch::AppendRow {
                field_id: "refs".to_string(),
                value: skipped,
            },
            Patch::AppendRow {
                field_id: "refs".to_string(),
                value: missing,
            },
        ],
    );
    // A gap in a required column is left for validation to report.
    assert_eq!(result.apply_status, ApplyStatus::Applied);
    assert!(result
        .issues
        .iter()
        .any(|i| i.reference == "refs[1].who" && i.reason == IssueReason::MissingRequiredCell));
    let Some(FieldValue::Table(rows)) = form.responses().get("refs").value() else {
        panic!("refs should hold rows");
    };
    assert_eq!(
        rows[0]["years"],
        CellResponse::Skipped {
            reason: Some("unsure".to_string())
        }
    );
    assert_eq!(rows[1]["who"], CellResponse::null());
}

const GAPPY: &str = r#"{% form id="team" %}
{% group id="people" %}
{% table-field id="members" columnIds=["who", "years"] columnTypes=["string", "number"] requiredColumns=["who"] %}
| Who | Years |
|-----|-------|
|  | 3 |
{% /table-field %}
{% /group %}
{% /form %}
"#;

#[test]
fn test_existing_gap_does_not_block_table_edits() {
    let form = parse(GAPPY, "team.form.md").unwrap();
    let (next, result) = apply(
        &form,
        vec![Patch::AppendRow {
            field_id: "members".to_string(),
            value: row("Ann", 1.0),
        }],
    );
    assert_eq!(result.apply_status, ApplyStatus::Applied, "{:?}", result.rejected_patches);

    let (_, result) = apply(
        &next,
        vec![Patch::DeleteRow {
            field_id: "members".to_string(),
            index: 1,
        }],
    );
    assert_eq!(result.apply_status, ApplyStatus::Applied, "{:?}", result.rejected_patches);

    let mut years_only = RowInput::new();
    years_only.insert("years".to_string(), Some(ScalarInput::from(2.0)));
    let (_, result) = apply(
        &form,
        vec![Patch::SetTable {
            field_id: "members".to_string(),
            value: Some(vec![years_only]),
        }],
    );
    assert_eq!(result.apply_status, ApplyStatus::Applied, "{:?}", result.rejected_patches);
}

fn set_table(field_id: &str, rows: Option<Vec<RowInput>>) -> Patch {
    Patch::SetTable {
        field_id: field_id.to_string(),
        value: rows,
    }
}

#[test]
fn test_set_table_replaces_rows() {
    let (form, result) = apply(
        &form(),
        vec![set_table("refs", Some(vec![row("Ann", 2.0), row("Bo", 5.0)]))],
    );
    assert_eq!(result.apply_status, ApplyStatus::Applied);

    let (form, result) = apply(&form, vec![set_table("refs", Some(vec![row("Cy", 1.0)]))]);
    assert_eq!(result.apply_status, ApplyStatus::Applied);
    let Some(FieldValue::Table(rows)) = form.responses().get("refs").value() else {
        panic!("refs should hold rows");
    };
    assert_eq!(rows.len(), 1);
    assert_eq!(
        rows[0]["years"],
        CellResponse::Answered {
            value: Some(CellValue::Number(1.0))
        }
    );
}

#[test]
fn test_set_table_checks_both_row_bounds() {
    let too_many = (0..4).map(|i| row("Ann", f64::from(i))).collect();
    let (form, result) = apply(&form(), vec![set_table("refs", Some(too_many))]);
    assert_eq!(result.apply_status, ApplyStatus::Rejected);
    assert!(result.rejected_patches[0].message.contains("at most 3 rows"));
    assert_eq!(form.responses().get("refs"), &FieldResponse::Unanswered);

    let (_, result) = apply(&form, vec![set_table("refs", Some(Vec::new()))]);
    assert_eq!(result.apply_status, ApplyStatus::Rejected);
    assert!(result.rejected_patches[0].message.contains("at least 1 rows"));
}

#[test]
fn test_empty_set_table_without_minimum() {
    let form = parse(GAPPY, "team.form.md").unwrap();
    let (form, result) = apply(&form, vec![set_table("members", Some(Vec::new()))]);
    assert_eq!(result.apply_status, ApplyStatus::Applied);
    assert_eq!(
        form.responses().get("members"),
        &FieldResponse::answered(FieldValue::Table(Vec::new()))
    );
}

#[test]
fn test_set_table_null_is_explicit_null() {
    let (form, result) = apply(&form(), vec![set_table("refs", None)]);
    assert_eq!(result.apply_status, ApplyStatus::Applied);
    assert_eq!(form.responses().get("refs"), &FieldResponse::null());
    assert!(form.touched().contains("refs"));
}

#[test]
fn test_set_table_checks_cell_types() {
    let mut bad = RowInput::new();
    bad.insert("who".to_string(), Some(ScalarInput::from("Bo")));
    bad.insert("years".to_string(), Some(ScalarInput::from("lots")));
    let (form, result) = apply(
        &form(),
        vec![set_table("refs", Some(vec![row("Ann", 1.0), bad]))],
    );
    assert_eq!(result.apply_status, ApplyStatus::Rejected);
    assert!(result.rejected_patches[0].message.contains("row 2, column `years`"));
    assert_eq!(form.responses().get("refs"), &FieldResponse::Unanswered);

    let mut stray = RowInput::new();
    stray.insert("age".to_string(), Some(ScalarInput::from(4.0)));
    let (_, result) = apply(&form, vec![set_table("refs", Some(vec![stray]))]);
    assert!(result.rejected_patches[0].message.contains("no column `age`"));
}

#[test]
fn test_list_append_delete_and_null() {
    let append = |value: &str| Patch::AppendItem {
        field_id: "hobbies".to_string(),
        value: value.to_string(),
    };
    let (form, result) = apply(&form(), vec![append("chess"), append("go"), append("golf")]);
    assert_eq!(result.apply_status, ApplyStatus::Partial);
    assert_eq!(
        result.issues.iter().filter(|i| i.reason == IssueReason::ItemCountViolation).count(),
        0
    );

    let delete = || Patch::DeleteItem {
        field_id: "hobbies".to_string(),
        index: 0,
    };
    let (form, result) = apply(&form, vec![delete(), delete()]);
    assert_eq!(result.apply_status, ApplyStatus::Applied);
    assert_eq!(form.responses().get("hobbies"), &FieldResponse::null());
}

#[test]
fn test_skip_abort_and_clear() {
    let (form, result) = apply(
        &form(),
        vec![
            Patch::SkipField {
                field_id: "age".to_string(),
                role: "user".to_string(),
                reason: Some("prefer not to say".to_string()),
            },
            Patch::AbortField {
                field_id: "name".to_string(),
                role: "nobody".to_string(),
                reason: None,
            },
        ],
    );
    assert_eq!(result.apply_status, ApplyStatus::Partial);
    assert!(result.rejected_patches[0].message.contains("not declared"));
    assert_eq!(
        form.responses().get("age"),
        &FieldResponse::Skipped {
            reason: Some("prefer not to say".to_string())
        }
    );

    let (form, _) = apply(
        &form,
        vec![Patch::ClearField {
            field_id: "age".to_string(),
        }],
    );
    assert_eq!(form.responses().get("age"), &FieldResponse::Unanswered);
}

#[test]
fn test_empty_batch_is_applied() {
    let (next, result) = apply_json(&form(), "[]");
    assert_eq!(result.apply_status, ApplyStatus::Applied);
    assert!(next.touched().is_empty());
}

#[test]
fn test_apply_result_json_shape() {
    let (_, result) = apply_json(&form(), r#"[{"op": "set_url", "field_id": "nope", "value": "x"}]"#);
    let json = serde_json::to_value(&result).unwrap();
    assert_eq!(json["applyStatus"], "rejected");
    assert_eq!(json["rejectedPatches"][0]["fieldId"], "nope");
    assert_eq!(json["progressSummary"]["formState"], "empty");
    assert_eq!(json["structureSummary"]["fieldCount"], 5);
}
