//! Projects a form schema into JSON Schema (draft 2020-12) for external tooling.

use crate::model::*;
use serde_json::{json, Map, Value};

pub const DRAFT: &str = "https://json-schema.org/draft/2020-12/schema";

/// Extension keyword carrying what JSON Schema itself cannot express.
pub const EXTENSION_KEY: &str = "x-form";

pub fn to_json_schema(schema: &FormSchema) -> Value {
    let mut properties = Map::new();
    let mut required = Vec::new();
    for field in schema.fields() {
        if field.required {
            required.push(Value::String(field.id.clone()));
        }
        properties.insert(field.id.clone(), field_schema(schema, field));
    }

    let mut root = Map::new();
    root.insert("$schema".to_string(), json!(DRAFT));
    root.insert("$id".to_string(), json!(schema.id));
    if let Some(title) = &schema.title {
        root.insert("title".to_string(), json!(title));
    }
    if let Some(description) = description_of(schema, &schema.id) {
        root.insert("description".to_string(), json!(description));
    }
    root.insert("type".to_string(), json!("object"));
    root.insert("properties".to_string(), Value::Object(properties));
    root.insert("required".to_string(), Value::Array(required));
    Value::Object(root)
}

fn description_of<'a>(schema: &'a FormSchema, reference: &str) -> Option<&'a str> {
    schema
        .docs
        .iter()
        .find(|d| d.kind == DocKind::Description && d.reference == reference)
        .map(|d| d.content.as_str())
}

fn field_schema(schema: &FormSchema, field: &Field) -> Value {
    let mut out = Map::new();
    out.insert("title".to_string(), json!(field.label));
    if let Some(description) = description_of(schema, &field.id) {
        out.insert("description".to_string(), json!(description));
    }

    let mut extension = Map::new();
    extension.insert("kind".to_string(), json!(field.kind.kind()));
    extension.insert("role".to_string(), json!(field.role));
    extension.insert("priority".to_string(), json!(field.priority));

    match &field.kind {
        FieldKind::String(spec) => {
            out.insert("type".to_string(), json!("string"));
            insert_opt(&mut out, "minLength", spec.min_length);
            insert_opt(&mut out, "maxLength", spec.max_length);
            if let Some(pattern) = &spec.pattern {
                out.insert("pattern".to_string(), json!(pattern.as_str()));
            }
        }
        FieldKind::Number(spec) => {
            let ty = if spec.integer { "integer" } else { "number" };
            out.insert("type".to_string(), json!(ty));
            insert_opt(&mut out, "minimum", spec.min);
            insert_opt(&mut out, "maximum", spec.max);
        }
        FieldKind::StringList(spec) => {
            let mut items = Map::new();
            items.insert("type".to_string(), json!("string"));
            insert_opt(&mut items, "minLength", spec.item_min_length);
            insert_opt(&mut items, "maxLength", spec.item_max_length);
            list_schema(&mut out, Value::Object(items), spec);
        }
        FieldKind::UrlList(spec) => {
            list_schema(&mut out, json!({"type": "string", "format": "uri"}), spec);
        }
        FieldKind::Checkboxes(spec) => {
            let states: Vec<&str> = spec.mode.states().iter().map(|s| s.as_str()).collect();
            let properties: Map<String, Value> = spec
                .options
                .iter()
                .map(|o| (o.id.clone(), json!({"title": o.label, "enum": states})))
                .collect();
            out.insert("type".to_string(), json!("object"));
            out.insert("properties".to_string(), Value::Object(properties));
            out.insert("additionalProperties".to_string(), json!(false));
            extension.insert("checkboxMode".to_string(), json!(spec.mode));
            insert_opt(&mut extension, "minDone", spec.min_done);
        }
        FieldKind::SingleSelect(spec) => {
            out.insert("type".to_string(), json!("string"));
            out.insert("enum".to_string(), option_ids(&spec.options));
        }
        FieldKind::MultiSelect(spec) => {
            out.insert("type".to_string(), json!("array"));
            out.insert("items".to_string(), json!({"enum": option_ids(&spec.options)}));
            out.insert("uniqueItems".to_string(), json!(true));
            insert_opt(&mut out, "minItems", spec.min_selections);
            insert_opt(&mut out, "maxItems", spec.max_selections);
        }
        FieldKind::Url => {
            out.insert("type".to_string(), json!("string"));
            out.insert("format".to_string(), json!("uri"));
        }
        FieldKind::Date(spec) => {
            out.insert("type".to_string(), json!("string"));
            out.insert("format".to_string(), json!("date"));
            // JSON Schema has no date bounds.
            insert_opt(&mut extension, "min", spec.min.clone());
            insert_opt(&mut extension, "max", spec.max.clone());
        }
        FieldKind::Year(spec) => {
            out.insert("type".to_string(), json!("integer"));
            out.insert("minimum".to_string(), json!(spec.min.unwrap_or(1000)));
            out.insert("maximum".to_string(), json!(spec.max.unwrap_or(9999)));
        }
        FieldKind::Table(spec) => {
            let mut columns = Map::new();
            let mut required = Vec::new();
            for column in &spec.columns {
                columns.insert(column.id.clone(), column_schema(column));
                if column.required {
                    required.push(json!(column.id));
                }
            }
            out.insert("type".to_string(), json!("array"));
            out.insert(
                "items".to_string(),
                json!({
                    "type": "object",
                    "properties": columns,
                    "required": required,
                    "additionalProperties": false,
                }),
            );
            insert_opt(&mut out, "minItems", spec.min_rows);
            insert_opt(&mut out, "maxItems", spec.max_rows);
            let ids: Vec<&str> = spec.columns.iter().map(|c| c.id.as_str()).collect();
            extension.insert("columns".to_string(), json!(ids));
        }
    }

    out.insert(EXTENSION_KEY.to_string(), Value::Object(extension));
    Value::Object(out)
}

fn list_schema(out: &mut Map<String, Value>, items: Value, spec: &ListSpec) {
    out.insert("type".to_string(), json!("array"));
    out.insert("items".to_string(), items);
    insert_opt(out, "minItems", spec.min_items);
    insert_opt(out, "maxItems", spec.max_items);
    if spec.unique_items {
        out.insert("uniqueItems".to_string(), json!(true));
    }
}

fn column_schema(column: &Column) -> Value {
    let mut out = json!({"title": column.label});
    let extra = match column.cell_type {
        CellType::String => json!({"type": "string"}),
        CellType::Number => json!({"type": "number"}),
        CellType::Url => json!({"type": "string", "format": "uri"}),
        CellType::Date => json!({"type": "string", "format": "date"}),
        CellType::Year => json!({"type": "integer", "minimum": 1000, "maximum": 9999}),
    };
    if let (Value::Object(out), Value::Object(extra)) = (&mut out, extra) {
        out.extend(extra);
    }
    out
}

fn option_ids(options: &[ChoiceOption]) -> Value {
    Value::Array(options.iter().map(|o| json!(o.id)).collect())
}

fn insert_opt<T: serde::Serialize>(map: &mut Map<String, Value>, key: &str, value: Option<T>) {
    if let Some(value) = value {
        map.insert(key.to_string(), json!(value));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::FormParser;

    const SOURCE: &str = r#"{% form id="trip" title="Trip" %}
{% group id="g" %}
{% number-field id="days" label="Days" required=true min=1 max=30 integer=true %}
{% /number-field %}
{% description ref="days" %}
How long you will be away.
{% /description %}
{% checkboxes id="prep" checkboxMode="explicit" %}
- [ ] Passport {% #passport %}
{% /checkboxes %}
{% table-field id="legs" columnIds=["from", "year"] columnTypes=["string", "year"] requiredColumns=["from"] maxRows=5 %}
{% /table-field %}
{% /group %}
{% /form %}
"#;

    #[test]
    fn test_json_schema_projection() {
        let doc = FormParser::new(SOURCE).parse_document().unwrap();
        let schema = to_json_schema(&doc.schema);

        assert_eq!(schema["$schema"], DRAFT);
        assert_eq!(schema["title"], "Trip");
        assert_eq!(schema["required"], json!(["days"]));

        let days = &schema["properties"]["days"];
        assert_eq!(days["type"], "integer");
        assert_eq!(days["minimum"], json!(1.0));
        assert_eq!(days["description"], "How long you will be away.");
        assert_eq!(days[EXTENSION_KEY]["kind"], "number");

        let prep = &schema["properties"]["prep"];
        assert_eq!(
            prep["properties"]["passport"]["enum"],
            json!(["unfilled", "yes", "no"])
        );
        assert_eq!(prep[EXTENSION_KEY]["checkboxMode"], "explicit");

        let legs = &schema["properties"]["legs"];
        assert_eq!(legs["maxItems"], 5);
        assert_eq!(legs["items"]["required"], json!(["from"]));
        assert_eq!(legs["items"]["properties"]["year"]["type"], "integer");
        assert_eq!(legs[EXTENSION_KEY]["columns"], json!(["from", "year"]));
    }
}
