//! Turns a form model back into document text.
//!
//! Regenerate mode writes a canonical document: one block per tag, blank lines
//! between blocks, documentation next to its target. Preserve mode splices freshly
//! rendered field bodies into the original text and leaves everything else alone.

use crate::ast::{AttrValue, Span};
use crate::config::{SerializeMode, SerializeOptions};
use crate::error::{CellError, FormError};
use crate::frontmatter::{render_frontmatter, FormMetadata};
use crate::model::*;
use crate::parser::SourceIndex;
use crate::table;
use crate::tags;
use crate::utils::longest_run;
use crate::values::{self, Sentinel};
use std::cmp::Reverse;
use std::collections::BTreeSet;

type Attrs = Vec<(&'static str, AttrValue)>;

pub struct Serializer<'a> {
    schema: &'a FormSchema,
    metadata: &'a FormMetadata,
    responses: &'a ResponseStore,
}

/// What preserve mode needs to know about the document it is rewriting.
pub struct Original<'a> {
    pub source: &'a str,
    pub index: &'a SourceIndex,
    pub touched: &'a BTreeSet<String>,
}

impl<'a> Serializer<'a> {
    pub fn new(schema: &'a FormSchema, metadata: &'a FormMetadata, responses: &'a ResponseStore) -> Self {
        Self {
            schema,
            metadata,
            responses,
        }
    }

    pub fn serialize(&self, original: &Original<'_>, options: &SerializeOptions) -> Result<String, FormError> {
        let spec_version = options.spec_version.as_deref();
        match options.mode {
            SerializeMode::Regenerate => self.regenerate(spec_version),
            SerializeMode::Preserve => self.preserve(original, spec_version),
        }
    }

    pub fn regenerate(&self, spec_version: Option<&str>) -> Result<String, FormError> {
        let mut out = String::new();
        if let Some(frontmatter) = render_frontmatter(self.metadata, spec_version)? {
            out.push_str(&frontmatter);
            out.push('\n');
        }

        let schema = self.schema;
        let mut attrs: Attrs = vec![("id", AttrValue::String(schema.id.clone()))];
        if let Some(title) = &schema.title {
            attrs.push(("title", AttrValue::String(title.clone())));
        }
        let mut blocks = vec![open_tag(tags::FORM_TAG, &attrs)];
        self.push_docs(&schema.id, &mut blocks);
        for group in &schema.groups {
            self.write_group(group, &mut blocks)?;
        }
        blocks.push(close_tag(tags::FORM_TAG));

        out.push_str(&blocks.join("\n\n"));
        out.push('\n');
        log::debug!("regenerated form `{}` ({} bytes)", schema.id, out.len());
        Ok(out)
    }

    pub fn preserve(&self, original: &Original<'_>, spec_version: Option<&str>) -> Result<String, FormError> {
        let source = original.source;
        let mut edits: Vec<(Span, String)> = Vec::new();

        for field_id in original.touched {
            let (Some(field), Some(node)) = (self.schema.field(field_id), original.index.fields.get(field_id))
            else {
                continue;
            };
            let response = self.responses.get(field_id);
            let text = if node.open_tag.end < node.span.end {
                let whole = &source[node.span.start..node.span.end];
                let close = whole.rfind("{%").map_or("", |at| &whole[at..]);
                let open = &source[node.open_tag.start..node.open_tag.end];
                format!("{open}\n{}{close}", self.render_body(field, response)?)
            } else {
                // Self-closing tags have nowhere to put a body.
                self.render_field(field, response)?
            };
            edits.push((node.span, text));
        }

        if spec_version.is_some() {
            if let Some(frontmatter) = render_frontmatter(self.metadata, spec_version)? {
                match original.index.frontmatter {
                    Some(span) => edits.push((span, frontmatter.trim_end_matches('\n').to_string())),
                    None => edits.push((Span::new(0, 0), frontmatter)),
                }
            }
        }

        edits.sort_by_key(|(span, _)| Reverse(span.start));
        let mut out = source.to_string();
        for (span, text) in edits {
            out.replace_range(span.start..span.end, &text);
        }
        log::debug!("preserved form `{}`: {} fields rewritten", self.schema.id, original.touched.len());
        Ok(out)
    }

    fn write_group(&self, group: &FieldGroup, blocks: &mut Vec<String>) -> Result<(), FormError> {
        let mut attrs: Attrs = vec![("id", AttrValue::String(group.id.clone()))];
        if let Some(title) = &group.title {
            attrs.push(("title", AttrValue::String(title.clone())));
        }
        blocks.push(open_tag(tags::GROUP_TAG, &attrs));
        self.push_docs(&group.id, blocks);
        for child in &group.children {
            match child {
                GroupItem::Field(field) => {
                    blocks.push(self.render_field(field, self.responses.get(&field.id))?);
                    self.push_docs(&field.id, blocks);
                }
                GroupItem::Group(inner) => self.write_group(inner, blocks)?,
            }
        }
        blocks.push(close_tag(tags::GROUP_TAG));
        Ok(())
    }

    fn push_docs(&self, reference: &str, blocks: &mut Vec<String>) {
        for doc in self.schema.docs_for(reference) {
            let tag = doc.kind.tag_name();
            let attrs: Attrs = vec![("ref", AttrValue::String(doc.reference.clone()))];
            blocks.push(format!(
                "{}\n{}\n{}",
                open_tag(tag, &attrs),
                doc.content,
                close_tag(tag)
            ));
        }
    }

    /// A whole canonical `{% field %}` block, without a trailing newline.
    pub fn render_field(&self, field: &Field, response: &FieldResponse) -> Result<String, CellError> {
        Ok(format!(
            "{}\n{}{}",
            open_tag(tags::FIELD_TAG, &field_attributes(field)),
            self.render_body(field, response)?,
            close_tag(tags::FIELD_TAG)
        ))
    }

    /// Everything between the opening and closing tag. Each line ends with a newline.
    fn render_body(&self, field: &Field, response: &FieldResponse) -> Result<String, CellError> {
        let mut body = String::new();
        match &field.kind {
            FieldKind::Checkboxes(spec) => {
                let states = match response.value() {
                    Some(FieldValue::Checkboxes(states)) => Some(states),
                    _ => None,
                };
                for option in &spec.options {
                    let state = states
                        .and_then(|s| s.get(&option.id))
                        .copied()
                        .unwrap_or_else(|| spec.mode.default_state());
                    body.push_str(&option_line(state.mark(), option));
                }
                body.push_str(&override_fence(response));
            }
            FieldKind::SingleSelect(spec) | FieldKind::MultiSelect(spec) => {
                let selected: Vec<&str> = match response.value() {
                    Some(FieldValue::SingleSelect(id)) => vec![id.as_str()],
                    Some(FieldValue::MultiSelect(ids)) => ids.iter().map(String::as_str).collect(),
                    _ => Vec::new(),
                };
                for option in &spec.options {
                    let mark = if selected.contains(&option.id.as_str()) { 'x' } else { ' ' };
                    body.push_str(&option_line(mark, option));
                }
                body.push_str(&override_fence(response));
            }
            FieldKind::Table(spec) => match response.value() {
                Some(FieldValue::Table(rows)) => {
                    body.push_str(&table::render_table(&spec.columns, rows)?);
                    body.push('\n');
                }
                _ => body.push_str(&override_fence(response)),
            },
            _ => match response {
                FieldResponse::Unanswered => {}
                FieldResponse::Answered { value: Some(value) } => {
                    body.push_str(&value_fence(&format_value(value)));
                }
                other => body.push_str(&override_fence(other)),
            },
        }
        Ok(body)
    }
}

/// The value block a null or sentinel answer needs; empty for anything else.
fn override_fence(response: &FieldResponse) -> String {
    match response {
        FieldResponse::Answered { value: None } => value_fence(""),
        FieldResponse::Skipped { reason } => {
            value_fence(&values::format_sentinel(&Sentinel::Skip(reason.clone())))
        }
        FieldResponse::Aborted { reason } => {
            value_fence(&values::format_sentinel(&Sentinel::Abort(reason.clone())))
        }
        _ => String::new(),
    }
}

/// A ```` ```value ```` block long enough that no backtick run in `content` can close it.
pub fn value_fence(content: &str) -> String {
    let ticks = "`".repeat(longest_run(content, '`').max(2) + 1);
    if content.is_empty() {
        format!("{ticks}{}\n{ticks}\n", tags::VALUE_FENCE)
    } else {
        format!("{ticks}{}\n{content}\n{ticks}\n", tags::VALUE_FENCE)
    }
}

/// Value-block text of a scalar or list value.
fn format_value(value: &FieldValue) -> String {
    match value {
        FieldValue::String(s) | FieldValue::Url(s) | FieldValue::Date(s) => s.clone(),
        FieldValue::Number(n) => values::format_number(*n),
        FieldValue::Year(y) => y.to_string(),
        FieldValue::StringList(items) | FieldValue::UrlList(items) => items.join("\n"),
        FieldValue::Checkboxes(_)
        | FieldValue::SingleSelect(_)
        | FieldValue::MultiSelect(_)
        | FieldValue::Table(_) => String::new(),
    }
}

fn option_line(mark: char, option: &ChoiceOption) -> String {
    format!("- [{mark}] {} {{% #{} %}}\n", option.label, option.id)
}

fn open_tag(name: &str, attrs: &[(&str, AttrValue)]) -> String {
    let mut tag = format!("{{% {name}");
    for (key, value) in attrs {
        tag.push_str(&format!(" {key}={value}"));
    }
    tag.push_str(" %}");
    tag
}

fn close_tag(name: &str) -> String {
    format!("{{% /{name} %}}")
}

fn push_count(attrs: &mut Attrs, name: &'static str, count: Option<usize>) {
    if let Some(count) = count {
        attrs.push((name, AttrValue::Number(count as f64)));
    }
}

fn push_flag(attrs: &mut Attrs, name: &'static str, flag: bool) {
    if flag {
        attrs.push((name, AttrValue::Bool(true)));
    }
}

fn string_list<'s>(items: impl Iterator<Item = &'s str>) -> AttrValue {
    AttrValue::List(items.map(|s| AttrValue::String(s.to_string())).collect())
}

/// Attributes of a canonical field tag. Defaults are left out.
fn field_attributes(field: &Field) -> Attrs {
    let mut attrs: Attrs = vec![
        ("kind", AttrValue::String(field.kind.kind().as_str().to_string())),
        ("id", AttrValue::String(field.id.clone())),
    ];
    if field.label != field.id {
        attrs.push(("label", AttrValue::String(field.label.clone())));
    }
    if field.role != DEFAULT_ROLE {
        attrs.push(("role", AttrValue::String(field.role.clone())));
    }
    if field.priority != Priority::default() {
        attrs.push(("priority", AttrValue::String(field.priority.as_str().to_string())));
    }
    push_flag(&mut attrs, "required", field.required);

    match &field.kind {
        FieldKind::String(spec) => {
            push_count(&mut attrs, "minLength", spec.min_length);
            push_count(&mut attrs, "maxLength", spec.max_length);
            if let Some(pattern) = &spec.pattern {
                attrs.push(("pattern", AttrValue::String(pattern.as_str().to_string())));
            }
        }
        FieldKind::Number(spec) => {
            if let Some(min) = spec.min {
                attrs.push(("min", AttrValue::Number(min)));
            }
            if let Some(max) = spec.max {
                attrs.push(("max", AttrValue::Number(max)));
            }
            push_flag(&mut attrs, "integer", spec.integer);
        }
        FieldKind::StringList(spec) => {
            push_count(&mut attrs, "minItems", spec.min_items);
            push_count(&mut attrs, "maxItems", spec.max_items);
            push_count(&mut attrs, "itemMinLength", spec.item_min_length);
            push_count(&mut attrs, "itemMaxLength", spec.item_max_length);
            push_flag(&mut attrs, "uniqueItems", spec.unique_items);
        }
        FieldKind::UrlList(spec) => {
            push_count(&mut attrs, "minItems", spec.min_items);
            push_count(&mut attrs, "maxItems", spec.max_items);
            push_flag(&mut attrs, "uniqueItems", spec.unique_items);
        }
        FieldKind::Checkboxes(spec) => {
            if spec.mode != CheckboxMode::default() {
                attrs.push(("checkboxMode", AttrValue::String(spec.mode.as_str().to_string())));
            }
            push_count(&mut attrs, "minDone", spec.min_done);
        }
        FieldKind::MultiSelect(spec) => {
            push_count(&mut attrs, "minSelections", spec.min_selections);
            push_count(&mut attrs, "maxSelections", spec.max_selections);
        }
        FieldKind::SingleSelect(_) | FieldKind::Url => {}
        FieldKind::Date(spec) => {
            if let Some(min) = &spec.min {
                attrs.push(("min", AttrValue::String(min.clone())));
            }
            if let Some(max) = &spec.max {
                attrs.push(("max", AttrValue::String(max.clone())));
            }
        }
        FieldKind::Year(spec) => {
            if let Some(min) = spec.min {
                attrs.push(("min", AttrValue::Number(f64::from(min))));
            }
            if let Some(max) = spec.max {
                attrs.push(("max", AttrValue::Number(f64::from(max))));
            }
        }
        FieldKind::Table(spec) => {
            let columns = &spec.columns;
            attrs.push(("columnIds", string_list(columns.iter().map(|c| c.id.as_str()))));
            attrs.push(("columnLabels", string_list(columns.iter().map(|c| c.label.as_str()))));
            if columns.iter().any(|c| c.cell_type != CellType::String) {
                attrs.push((
                    "columnTypes",
                    string_list(columns.iter().map(|c| c.cell_type.as_str())),
                ));
            }
            if columns.iter().any(|c| c.required) {
                attrs.push((
                    "requiredColumns",
                    string_list(columns.iter().filter(|c| c.required).map(|c| c.id.as_str())),
                ));
            }
            push_count(&mut attrs, "minRows", spec.min_rows);
            push_count(&mut attrs, "maxRows", spec.max_rows);
        }
    }
    attrs
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::FormParser;

    const SOURCE: &str = r#"---
title: Intake
---
Some prose that regenerate mode drops.

{% form id="intake" title="Intake" %}
{% group id="about" %}
{% description ref="about" %}
Tell us about yourself.
{% /description %}
{% string-field id="name" label="Name" required=true %}
```value
Ada
```
{% /string-field %}
{% checkboxes id="steps" checkboxMode="simple" %}
- [x] Read {% #read %}
- [ ] Sign {% #sign %}
{% /checkboxes %}
{% table-field id="people" columnIds=["who", "age"] columnTypes=["string", "number"] %}
| Who | Age |
|---|---|
| Ann | 30 |
| Bo \| Jr | %SKIP% (unknown) |
{% /table-field %}
{% /group %}
{% /form %}
"#;

    fn regenerate(source: &str) -> String {
        let doc = FormParser::new(source).parse_document().unwrap();
        Serializer::new(&doc.schema, &doc.metadata, &doc.responses)
            .regenerate(None)
            .unwrap()
    }

    #[test]
    fn test_value_fence_outgrows_content() {
        assert_eq!(value_fence("plain"), "```value\nplain\n```\n");
        assert_eq!(value_fence(""), "```value\n```\n");
        assert!(value_fence("a ```` b").starts_with("`````value\n"));
    }

    #[test]
    fn test_regenerate_is_canonical() {
        let text = regenerate(SOURCE);
        assert!(!text.contains("Some prose"));
        assert!(text.contains("{% field kind=\"string\" id=\"name\" label=\"Name\" required=true %}"));
        assert!(text.contains("checkboxMode=\"simple\""));
        assert!(text.contains("columnLabels=[\"Who\", \"Age\"]"));
        assert!(text.contains("| Bo \\| Jr | %SKIP% (unknown) |"));
        assert!(text.contains("{% description ref=\"about\" %}\nTell us about yourself.\n{% /description %}"));
        assert!(text.ends_with("{% /form %}\n"));
    }

    #[test]
    fn test_regenerate_round_trips() {
        let first = FormParser::new(SOURCE).parse_document().unwrap();
        let text = regenerate(SOURCE);
        let second = FormParser::new(&text).parse_document().unwrap();
        assert_eq!(first.schema, second.schema);
        assert_eq!(first.responses, second.responses);
        assert_eq!(first.metadata, second.metadata);
        assert_eq!(regenerate(&text), text);
    }

    #[test]
    fn test_null_and_sentinel_bodies() {
        let field = Field {
            id: "age".to_string(),
            label: "age".to_string(),
            role: USER_ROLE.to_string(),
            priority: Priority::High,
            required: false,
            kind: FieldKind::Number(NumberSpec::default()),
        };
        let schema = FormSchema {
            id: "f".to_string(),
            title: None,
            groups: Vec::new(),
            docs: Vec::new(),
        };
        let metadata = FormMetadata::default();
        let responses = ResponseStore::new();
        let serializer = Serializer::new(&schema, &metadata, &responses);

        let text = serializer.render_field(&field, &FieldResponse::null()).unwrap();
        assert_eq!(
            text,
            "{% field kind=\"number\" id=\"age\" role=\"user\" priority=\"high\" %}\n```value\n```\n{% /field %}"
        );
        let skipped = FieldResponse::Skipped {
            reason: Some("unknown".to_string()),
        };
        let text = serializer.render_field(&field, &skipped).unwrap();
        assert!(text.contains("```value\n%SKIP% (unknown)\n```\n"));
        let text = serializer
            .render_field(&field, &FieldResponse::Unanswered)
            .unwrap();
        assert!(text.ends_with("%}\n{% /field %}"));
    }

    #[test]
    fn test_preserve_rewrites_only_touched_fields() {
        let doc = FormParser::new(SOURCE).parse_document().unwrap();
        let mut responses = doc.responses.clone();
        responses.set("name", FieldResponse::answered(FieldValue::String("Grace".to_string())));
        let touched: BTreeSet<String> = ["name".to_string()].into_iter().collect();
        let original = Original {
            source: SOURCE,
            index: &doc.index,
            touched: &touched,
        };
        let text = Serializer::new(&doc.schema, &doc.metadata, &responses)
            .preserve(&original, None)
            .unwrap();
        assert_eq!(text, SOURCE.replace("Ada", "Grace"));
    }
}
