use formdoc_core::summary::FormState;
use formdoc_core::{inspect, parse, validate, IssueReason, IssueScope, Severity};
use pretty_assertions::assert_eq;

const FORM: &str = r#"{% form id="audit" %}
{% group id="main" %}

{% string-field id="code" required=true priority="high" pattern="^[A-Z]{3}$" %}
```value
abc
```
{% /string-field %}

{% string-field id="comment" priority="low" %}
{% /string-field %}

{% string-list id="owners" uniqueItems=true itemMaxLength=5 %}
```value
amy
bartholomew
amy
```
{% /string-list %}

{% checkboxes id="steps" required=true %}
- [x] Plan {% #plan %}
- [*] Build {% #build %}
{% /checkboxes %}

{% checkboxes id="signoff" minDone=2 %}
- [x] Lead {% #lead %}
- [ ] Legal {% #legal %}
```value
```
{% /checkboxes %}

{% table-field id="findings" required=true minRows=2 columnIds=["id", "sev"] requiredColumns=["sev"] %}
| Id | Severity |
|---|---|
| F1 | |
{% /table-field %}

{% number-field id="skipped_score" required=true %}
```value
%SKIP% (not scored yet)
```
{% /number-field %}

{% /group %}
{% /form %}
"#;

#[test]
fn test_validate_reports_required_issues_in_document_order() {
    let form = parse(FORM, "audit.form.md").unwrap();
    let issues = validate(form.schema(), form.responses());

    let found: Vec<(&str, IssueReason)> = issues
        .iter()
        .map(|i| (i.reference.as_str(), i.reason))
        .collect();
    assert_eq!(
        found,
        vec![
            ("code", IssueReason::PatternMismatch),
            ("owners[1]", IssueReason::LengthViolation),
            ("owners", IssueReason::DuplicateItem),
            ("steps.build", IssueReason::CheckboxIncomplete),
            ("findings", IssueReason::RowCountViolation),
            ("findings[0].sev", IssueReason::MissingRequiredCell),
        ]
    );
    assert!(issues.iter().all(|i| i.severity == Severity::Required));
    assert_eq!(issues[3].scope, IssueScope::Option);
    assert_eq!(issues[5].scope, IssueScope::Cell);
}

#[test]
fn test_priority_tiers() {
    let form = parse(FORM, "audit.form.md").unwrap();
    let issues = inspect(&form).issues;

    // high (3) + violation (2) => tier 1
    assert_eq!(issues[0].reference, "code");
    assert_eq!(issues[0].priority, 1);
    // low (1) + recommendation (1) => tier 4
    let comment = issues.iter().find(|i| i.reference == "comment").unwrap();
    assert_eq!(comment.reason, IssueReason::OptionalUnanswered);
    assert_eq!(comment.severity, Severity::Recommended);
    assert_eq!(comment.priority, 4);
}

#[test]
fn test_null_optional_field_gets_no_recommendation() {
    let form = parse(FORM, "audit.form.md").unwrap();
    let issues = inspect(&form).issues;
    assert!(issues.iter().all(|i| i.reference != "signoff"));
    assert!(issues.iter().all(|i| i.reference != "skipped_score"));
}

#[test]
fn test_inspect_summaries() {
    let form = parse(FORM, "audit.form.md").unwrap();
    let result = inspect(&form);

    let structure = &result.structure_summary;
    assert_eq!(structure.group_count, 1);
    assert_eq!(structure.field_count, 7);
    assert_eq!(structure.required_count, 4);
    assert_eq!(structure.option_count, 4);
    assert_eq!(structure.column_count, 2);

    let progress = &result.progress_summary;
    assert_eq!(progress.form_state, FormState::Incomplete);
    assert_eq!(progress.filled, 4);
    assert_eq!(progress.answered_null, 1);
    assert_eq!(progress.unanswered, 1);
    assert_eq!(progress.skipped, 1);
    assert_eq!(progress.fields["findings"].issue_count, 2);
    assert!(!result.is_complete());
    assert_eq!(result.required_issues().count(), 6);
}

#[test]
fn test_issue_json_shape() {
    let form = parse(FORM, "audit.form.md").unwrap();
    let issues = validate(form.schema(), form.responses());
    let json = serde_json::to_value(&issues[5]).unwrap();
    assert_eq!(json["ref"], "findings[0].sev");
    assert_eq!(json["scope"], "cell");
    assert_eq!(json["reason"], "missing_required_cell");
    assert_eq!(json["severity"], "required");
}
