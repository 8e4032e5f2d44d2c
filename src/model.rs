use regex::Regex;
use serde::{Deserialize, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;

pub const DEFAULT_ROLE: &str = "agent";
pub const USER_ROLE: &str = "user";

// --- Schema ---

#[derive(Debug, Clone, PartialEq)]
pub struct FormSchema {
    pub id: String,
    pub title: Option<String>,
    pub groups: Vec<FieldGroup>,
    pub docs: Vec<DocumentationBlock>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FieldGroup {
    pub id: String,
    pub title: Option<String>,
    pub children: Vec<GroupItem>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum GroupItem {
    Field(Field),
    Group(FieldGroup),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    pub id: String,
    pub label: String,
    pub role: String,
    pub priority: Priority,
    pub required: bool,
    pub kind: FieldKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    High,
    #[default]
    Medium,
    Low,
}

impl Priority {
    pub fn as_str(self) -> &'static str {
        match self {
            Priority::High => "high",
            Priority::Medium => "medium",
            Priority::Low => "low",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "high" => Some(Priority::High),
            "medium" => Some(Priority::Medium),
            "low" => Some(Priority::Low),
            _ => None,
        }
    }

    pub fn weight(self) -> u8 {
        match self {
            Priority::High => 3,
            Priority::Medium => 2,
            Priority::Low => 1,
        }
    }
}

/// Kind-specific constraints of a field. One variant per field kind.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldKind {
    String(StringSpec),
    Number(NumberSpec),
    StringList(ListSpec),
    Checkboxes(CheckboxesSpec),
    SingleSelect(SelectSpec),
    MultiSelect(SelectSpec),
    Url,
    UrlList(ListSpec),
    Date(DateSpec),
    Year(YearSpec),
    Table(TableSpec),
}

impl FieldKind {
    pub fn kind(&self) -> Kind {
        match self {
            FieldKind::String(_) => Kind::String,
            FieldKind::Number(_) => Kind::Number,
            FieldKind::StringList(_) => Kind::StringList,
            FieldKind::Checkboxes(_) => Kind::Checkboxes,
            FieldKind::SingleSelect(_) => Kind::SingleSelect,
            FieldKind::MultiSelect(_) => Kind::MultiSelect,
            FieldKind::Url => Kind::Url,
            FieldKind::UrlList(_) => Kind::UrlList,
            FieldKind::Date(_) => Kind::Date,
            FieldKind::Year(_) => Kind::Year,
            FieldKind::Table(_) => Kind::Table,
        }
    }

    pub fn options(&self) -> &[ChoiceOption] {
        match self {
            FieldKind::Checkboxes(spec) => &spec.options,
            FieldKind::SingleSelect(spec) | FieldKind::MultiSelect(spec) => &spec.options,
            _ => &[],
        }
    }
}

/// The bare field kind, without constraints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Kind {
    String,
    Number,
    StringList,
    Checkboxes,
    SingleSelect,
    MultiSelect,
    Url,
    UrlList,
    Date,
    Year,
    Table,
}

impl Kind {
    pub const ALL: [Kind; 11] = [
        Kind::String,
        Kind::Number,
        Kind::StringList,
        Kind::Checkboxes,
        Kind::SingleSelect,
        Kind::MultiSelect,
        Kind::Url,
        Kind::UrlList,
        Kind::Date,
        Kind::Year,
        Kind::Table,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Kind::String => "string",
            Kind::Number => "number",
            Kind::StringList => "string_list",
            Kind::Checkboxes => "checkboxes",
            Kind::SingleSelect => "single_select",
            Kind::MultiSelect => "multi_select",
            Kind::Url => "url",
            Kind::UrlList => "url_list",
            Kind::Date => "date",
            Kind::Year => "year",
            Kind::Table => "table",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Kind::ALL.into_iter().find(|k| k.as_str() == name)
    }

    pub fn is_choice(self) -> bool {
        matches!(self, Kind::Checkboxes | Kind::SingleSelect | Kind::MultiSelect)
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A compiled `pattern` constraint that still remembers its source text.
#[derive(Debug, Clone)]
pub struct Pattern {
    source: String,
    regex: Regex,
}

impl Pattern {
    pub fn new(source: &str) -> Result<Self, regex::Error> {
        Ok(Self {
            source: source.to_string(),
            regex: Regex::new(source)?,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    pub fn is_match(&self, text: &str) -> bool {
        self.regex.is_match(text)
    }
}

impl PartialEq for Pattern {
    fn eq(&self, other: &Self) -> bool {
        self.source == other.source
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct StringSpec {
    pub min_length: Option<usize>,
    pub max_length: Option<usize>,
    pub pattern: Option<Pattern>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct NumberSpec {
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub integer: bool,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ListSpec {
    pub min_items: Option<usize>,
    pub max_items: Option<usize>,
    pub item_min_length: Option<usize>,
    pub item_max_length: Option<usize>,
    pub unique_items: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChoiceOption {
    pub id: String,
    pub label: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckboxMode {
    #[default]
    Multi,
    Simple,
    Explicit,
}

impl CheckboxMode {
    pub fn as_str(self) -> &'static str {
        match self {
            CheckboxMode::Multi => "multi",
            CheckboxMode::Simple => "simple",
            CheckboxMode::Explicit => "explicit",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "multi" => Some(CheckboxMode::Multi),
            "simple" => Some(CheckboxMode::Simple),
            "explicit" => Some(CheckboxMode::Explicit),
            _ => None,
        }
    }

    /// The state of an option nobody has touched yet.
    pub fn default_state(self) -> CheckboxState {
        match self {
            CheckboxMode::Multi | CheckboxMode::Simple => CheckboxState::Todo,
            CheckboxMode::Explicit => CheckboxState::Unfilled,
        }
    }

    pub fn states(self) -> &'static [CheckboxState] {
        use CheckboxState::*;
        match self {
            CheckboxMode::Multi => &[Todo, Done, Incomplete, Active, Na],
            CheckboxMode::Simple => &[Todo, Done],
            CheckboxMode::Explicit => &[Unfilled, Yes, No],
        }
    }

    pub fn allows(self, state: CheckboxState) -> bool {
        self.states().contains(&state)
    }

    /// Whether `state` counts as finished for a required checkbox field.
    pub fn is_resolved(self, state: CheckboxState) -> bool {
        use CheckboxState::*;
        match self {
            CheckboxMode::Multi => matches!(state, Done | Na),
            CheckboxMode::Simple => state == Done,
            CheckboxMode::Explicit => matches!(state, Yes | No),
        }
    }

    pub fn state_for_mark(self, mark: char) -> Option<CheckboxState> {
        use CheckboxState::*;
        let state = match (self, mark) {
            (CheckboxMode::Explicit, ' ') => Unfilled,
            (CheckboxMode::Explicit, 'y' | 'Y') => Yes,
            (CheckboxMode::Explicit, 'n' | 'N') => No,
            (CheckboxMode::Explicit, _) => return None,
            (_, ' ') => Todo,
            (_, 'x' | 'X') => Done,
            (CheckboxMode::Multi, '/') => Incomplete,
            (CheckboxMode::Multi, '*') => Active,
            (CheckboxMode::Multi, '-') => Na,
            _ => return None,
        };
        Some(state)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckboxState {
    Todo,
    Done,
    Incomplete,
    Active,
    Na,
    Unfilled,
    Yes,
    No,
}

impl CheckboxState {
    pub fn mark(self) -> char {
        match self {
            CheckboxState::Todo | CheckboxState::Unfilled => ' ',
            CheckboxState::Done => 'x',
            CheckboxState::Incomplete => '/',
            CheckboxState::Active => '*',
            CheckboxState::Na => '-',
            CheckboxState::Yes => 'y',
            CheckboxState::No => 'n',
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            CheckboxState::Todo => "todo",
            CheckboxState::Done => "done",
            CheckboxState::Incomplete => "incomplete",
            CheckboxState::Active => "active",
            CheckboxState::Na => "na",
            CheckboxState::Unfilled => "unfilled",
            CheckboxState::Yes => "yes",
            CheckboxState::No => "no",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CheckboxesSpec {
    pub options: Vec<ChoiceOption>,
    pub mode: CheckboxMode,
    pub min_done: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct SelectSpec {
    pub options: Vec<ChoiceOption>,
    pub min_selections: Option<usize>,
    pub max_selections: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct DateSpec {
    pub min: Option<String>,
    pub max: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct YearSpec {
    pub min: Option<i32>,
    pub max: Option<i32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CellType {
    #[default]
    String,
    Number,
    Url,
    Date,
    Year,
}

impl CellType {
    pub fn as_str(self) -> &'static str {
        match self {
            CellType::String => "string",
            CellType::Number => "number",
            CellType::Url => "url",
            CellType::Date => "date",
            CellType::Year => "year",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "string" => Some(CellType::String),
            "number" => Some(CellType::Number),
            "url" => Some(CellType::Url),
            "date" => Some(CellType::Date),
            "year" => Some(CellType::Year),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    pub id: String,
    pub label: String,
    pub cell_type: CellType,
    pub required: bool,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct TableSpec {
    pub columns: Vec<Column>,
    pub min_rows: Option<usize>,
    pub max_rows: Option<usize>,
}

impl TableSpec {
    pub fn column(&self, id: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.id == id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocKind {
    Description,
    Instructions,
    Documentation,
}

impl DocKind {
    pub fn tag_name(self) -> &'static str {
        match self {
            DocKind::Description => "description",
            DocKind::Instructions => "instructions",
            DocKind::Documentation => "documentation",
        }
    }
}

/// Free-form Markdown attached to the form, a group, or a field.
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentationBlock {
    pub kind: DocKind,
    pub reference: String,
    pub content: String,
}

impl FormSchema {
    /// Every field in document order.
    pub fn fields(&self) -> Vec<&Field> {
        let mut out = Vec::new();
        for group in &self.groups {
            group.collect_fields(&mut out);
        }
        out
    }

    /// Every group (nested ones included) in document order.
    pub fn all_groups(&self) -> Vec<&FieldGroup> {
        let mut out = Vec::new();
        for group in &self.groups {
            group.collect_groups(&mut out);
        }
        out
    }

    pub fn field(&self, id: &str) -> Option<&Field> {
        self.fields().into_iter().find(|f| f.id == id)
    }

    pub fn docs_for<'a>(&'a self, reference: &'a str) -> impl Iterator<Item = &'a DocumentationBlock> {
        self.docs.iter().filter(move |d| d.reference == reference)
    }
}

impl FieldGroup {
    fn collect_fields<'a>(&'a self, out: &mut Vec<&'a Field>) {
        for child in &self.children {
            match child {
                GroupItem::Field(field) => out.push(field),
                GroupItem::Group(group) => group.collect_fields(out),
            }
        }
    }

    fn collect_groups<'a>(&'a self, out: &mut Vec<&'a FieldGroup>) {
        out.push(self);
        for child in &self.children {
            if let GroupItem::Group(group) = child {
                group.collect_groups(out);
            }
        }
    }
}

// --- Responses ---

/// A typed answer. The variant always matches the owning field's kind.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum FieldValue {
    String(String),
    Number(f64),
    StringList(Vec<String>),
    Checkboxes(BTreeMap<String, CheckboxState>),
    SingleSelect(String),
    MultiSelect(Vec<String>),
    Url(String),
    UrlList(Vec<String>),
    Date(String),
    Year(i32),
    Table(Vec<TableRowResponse>),
}

impl FieldValue {
    pub fn kind(&self) -> Kind {
        match self {
            FieldValue::String(_) => Kind::String,
            FieldValue::Number(_) => Kind::Number,
            FieldValue::StringList(_) => Kind::StringList,
            FieldValue::Checkboxes(_) => Kind::Checkboxes,
            FieldValue::SingleSelect(_) => Kind::SingleSelect,
            FieldValue::MultiSelect(_) => Kind::MultiSelect,
            FieldValue::Url(_) => Kind::Url,
            FieldValue::UrlList(_) => Kind::UrlList,
            FieldValue::Date(_) => Kind::Date,
            FieldValue::Year(_) => Kind::Year,
            FieldValue::Table(_) => Kind::Table,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum FieldResponse {
    #[default]
    Unanswered,
    /// `value: None` is an explicit, intentional empty answer.
    Answered { value: Option<FieldValue> },
    Skipped { reason: Option<String> },
    Aborted { reason: Option<String> },
}

impl FieldResponse {
    pub fn answered(value: FieldValue) -> Self {
        FieldResponse::Answered { value: Some(value) }
    }

    pub fn null() -> Self {
        FieldResponse::Answered { value: None }
    }

    pub fn value(&self) -> Option<&FieldValue> {
        match self {
            FieldResponse::Answered { value } => value.as_ref(),
            _ => None,
        }
    }

    pub fn state_name(&self) -> &'static str {
        match self {
            FieldResponse::Unanswered => "unanswered",
            FieldResponse::Answered { .. } => "answered",
            FieldResponse::Skipped { .. } => "skipped",
            FieldResponse::Aborted { .. } => "aborted",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum CellValue {
    String(String),
    Number(f64),
    Url(String),
    Date(String),
    Year(i32),
}

impl CellValue {
    pub fn cell_type(&self) -> CellType {
        match self {
            CellValue::String(_) => CellType::String,
            CellValue::Number(_) => CellType::Number,
            CellValue::Url(_) => CellType::Url,
            CellValue::Date(_) => CellType::Date,
            CellValue::Year(_) => CellType::Year,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum CellResponse {
    Answered { value: Option<CellValue> },
    Skipped { reason: Option<String> },
    Aborted { reason: Option<String> },
}

impl CellResponse {
    pub fn null() -> Self {
        CellResponse::Answered { value: None }
    }
}

/// One table row, keyed by column id.
pub type TableRowResponse = BTreeMap<String, CellResponse>;

/// Current answer state of every declared field, keyed by field id.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ResponseStore {
    responses: BTreeMap<String, FieldResponse>,
}

static UNANSWERED: FieldResponse = FieldResponse::Unanswered;

impl ResponseStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// The response for `field_id`; undeclared ids read as unanswered.
    pub fn get(&self, field_id: &str) -> &FieldResponse {
        self.responses.get(field_id).unwrap_or(&UNANSWERED)
    }

    pub fn contains(&self, field_id: &str) -> bool {
        self.responses.contains_key(field_id)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &FieldResponse)> {
        self.responses.iter()
    }

    pub fn len(&self) -> usize {
        self.responses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.responses.is_empty()
    }

    pub(crate) fn set(&mut self, field_id: &str, response: FieldResponse) {
        self.responses.insert(field_id.to_string(), response);
    }
}

impl Serialize for ResponseStore {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        self.responses.serialize(serializer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_names_round_trip() {
        for kind in Kind::ALL {
            assert_eq!(Kind::from_name(kind.as_str()), Some(kind));
        }
        assert_eq!(Kind::from_name("boolean"), None);
    }

    #[test]
    fn test_checkbox_marks_respect_mode() {
        assert_eq!(
            CheckboxMode::Multi.state_for_mark('/'),
            Some(CheckboxState::Incomplete)
        );
        assert_eq!(CheckboxMode::Simple.state_for_mark('/'), None);
        assert_eq!(
            CheckboxMode::Explicit.state_for_mark(' '),
            Some(CheckboxState::Unfilled)
        );
        assert_eq!(CheckboxMode::Explicit.state_for_mark('x'), None);
        for mode in [CheckboxMode::Multi, CheckboxMode::Simple, CheckboxMode::Explicit] {
            let default = mode.default_state();
            assert_eq!(mode.state_for_mark(default.mark()), Some(default));
        }
    }

    #[test]
    fn test_response_store_defaults_to_unanswered() {
        let store = ResponseStore::new();
        assert_eq!(store.get("missing"), &FieldResponse::Unanswered);
    }

    #[test]
    fn test_field_response_json_shape() {
        let skipped = FieldResponse::Skipped {
            reason: Some("No data".to_string()),
        };
        assert_eq!(
            serde_json::to_value(&skipped).unwrap(),
            serde_json::json!({"state": "skipped", "reason": "No data"})
        );
        let answered = FieldResponse::answered(FieldValue::Number(42.0));
        assert_eq!(
            serde_json::to_value(&answered).unwrap(),
            serde_json::json!({"state": "answered", "value": 42.0})
        );
    }

    #[test]
    fn test_pattern_equality_uses_source() {
        let a = Pattern::new("^[a-z]+$").unwrap();
        let b = Pattern::new("^[a-z]+$").unwrap();
        assert_eq!(a, b);
        assert!(a.is_match("abc"));
        assert!(!a.is_match("ABC"));
    }
}
