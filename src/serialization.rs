use crate::model::*;
use serde::Serialize;
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Value {
    String(String),
    Number(f64),
    Integer(i64),
    Null,
    Array(Vec<Value>),
    Object(BTreeMap<String, Value>),
}

/// The answers of a form keyed by field id. Unanswered fields are left out.
pub(crate) fn values_to_value(schema: &FormSchema, responses: &ResponseStore) -> Value {
    let mut map = BTreeMap::new();
    for field in schema.fields() {
        let value = match responses.get(&field.id) {
            FieldResponse::Unanswered => continue,
            FieldResponse::Answered { value: None } => Value::Null,
            FieldResponse::Answered { value: Some(value) } => to_value(value),
            FieldResponse::Skipped { reason } => marker("skipped", reason),
            FieldResponse::Aborted { reason } => marker("aborted", reason),
        };
        map.insert(field.id.clone(), value);
    }
    Value::Object(map)
}

pub(crate) fn to_value(value: &FieldValue) -> Value {
    match value {
        FieldValue::String(s)
        | FieldValue::Url(s)
        | FieldValue::Date(s)
        | FieldValue::SingleSelect(s) => Value::String(s.clone()),
        FieldValue::Number(n) => Value::Number(*n),
        FieldValue::Year(y) => Value::Integer(i64::from(*y)),
        FieldValue::StringList(items) | FieldValue::UrlList(items) | FieldValue::MultiSelect(items) => {
            Value::Array(items.iter().cloned().map(Value::String).collect())
        }
        FieldValue::Checkboxes(states) => Value::Object(
            states
                .iter()
                .map(|(id, state)| (id.clone(), Value::String(state.as_str().to_string())))
                .collect(),
        ),
        FieldValue::Table(rows) => Value::Array(
            rows.iter()
                .map(|row| {
                    Value::Object(
                        row.iter()
                            .map(|(column, cell)| (column.clone(), cell_to_value(cell)))
                            .collect(),
                    )
                })
                .collect(),
        ),
    }
}

fn cell_to_value(cell: &CellResponse) -> Value {
    match cell {
        CellResponse::Answered { value: None } => Value::Null,
        CellResponse::Answered { value: Some(value) } => match value {
            CellValue::String(s) | CellValue::Url(s) | CellValue::Date(s) => Value::String(s.clone()),
            CellValue::Number(n) => Value::Number(*n),
            CellValue::Year(y) => Value::Integer(i64::from(*y)),
        },
        // A skipped cell is written like a skipped field.
        CellResponse::Skipped { reason } => marker("skipped", reason),
        CellResponse::Aborted { reason } => marker("aborted", reason),
    }
}

fn marker(state: &str, reason: &Option<String>) -> Value {
    let mut map = BTreeMap::new();
    map.insert("state".to_string(), Value::String(state.to_string()));
    if let Some(reason) = reason {
        map.insert("reason".to_string(), Value::String(reason.clone()));
    }
    Value::Object(map)
}
