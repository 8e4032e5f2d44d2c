//! Every tag name and attribute the form format recognises.

use crate::model::{DocKind, Kind};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TagKind {
    Form,
    Group,
    /// `field` carries its kind in an attribute; the aliases imply one.
    Field(Option<Kind>),
    Doc(DocKind),
}

const TAGS: &[(&str, TagKind)] = &[
    ("form", TagKind::Form),
    ("group", TagKind::Group),
    ("field-group", TagKind::Group),
    ("field", TagKind::Field(None)),
    ("string-field", TagKind::Field(Some(Kind::String))),
    ("number-field", TagKind::Field(Some(Kind::Number))),
    ("string-list", TagKind::Field(Some(Kind::StringList))),
    ("checkboxes", TagKind::Field(Some(Kind::Checkboxes))),
    ("single-select", TagKind::Field(Some(Kind::SingleSelect))),
    ("multi-select", TagKind::Field(Some(Kind::MultiSelect))),
    ("url-field", TagKind::Field(Some(Kind::Url))),
    ("url-list", TagKind::Field(Some(Kind::UrlList))),
    ("date-field", TagKind::Field(Some(Kind::Date))),
    ("year-field", TagKind::Field(Some(Kind::Year))),
    ("table-field", TagKind::Field(Some(Kind::Table))),
    ("description", TagKind::Doc(DocKind::Description)),
    ("instructions", TagKind::Doc(DocKind::Instructions)),
    ("documentation", TagKind::Doc(DocKind::Documentation)),
];

pub fn lookup(name: &str) -> Option<TagKind> {
    TAGS.iter()
        .find(|(tag, _)| *tag == name)
        .map(|(_, kind)| *kind)
}

/// Canonical tag names used when writing documents.
pub const FORM_TAG: &str = "form";
pub const GROUP_TAG: &str = "group";
pub const FIELD_TAG: &str = "field";

/// Info string of the fenced block that carries a field's value.
pub const VALUE_FENCE: &str = "value";

pub const FORM_ATTRIBUTES: &[&str] = &["id", "title"];
pub const GROUP_ATTRIBUTES: &[&str] = &["id", "title"];
pub const DOC_ATTRIBUTES: &[&str] = &["ref"];
pub const COMMON_FIELD_ATTRIBUTES: &[&str] = &["id", "kind", "label", "role", "priority", "required"];

pub fn kind_attributes(kind: Kind) -> &'static [&'static str] {
    match kind {
        Kind::String => &["minLength", "maxLength", "pattern"],
        Kind::Number => &["min", "max", "integer"],
        Kind::StringList => &["minItems", "maxItems", "itemMinLength", "itemMaxLength", "uniqueItems"],
        Kind::Checkboxes => &["checkboxMode", "minDone"],
        Kind::SingleSelect => &[],
        Kind::MultiSelect => &["minSelections", "maxSelections"],
        Kind::Url => &[],
        Kind::UrlList => &["minItems", "maxItems", "uniqueItems"],
        Kind::Date => &["min", "max"],
        Kind::Year => &["min", "max"],
        Kind::Table => &[
            "columnIds",
            "columnLabels",
            "columnTypes",
            "requiredColumns",
            "minRows",
            "maxRows",
        ],
    }
}

pub fn is_field_attribute(kind: Kind, name: &str) -> bool {
    COMMON_FIELD_ATTRIBUTES.contains(&name) || kind_attributes(kind).contains(&name)
}

/// Ids appear inside cell and option references, so they are kept to a plain alphabet.
pub fn is_valid_id(id: &str) -> bool {
    !id.is_empty()
        && id
            .chars()
            .all(|c| c.is_alphanumeric() || c == '_' || c == '-')
}
