use miette::{Diagnostic, NamedSource, SourceSpan};
use thiserror::Error;

#[derive(Error, Debug, Diagnostic, Clone)]
pub enum FormError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Parse(#[from] ParseError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Cell(#[from] CellError),

    #[error("Could not write frontmatter: {0}")]
    #[diagnostic(code(serializer::frontmatter))]
    Frontmatter(String),

    #[error("Could not encode output: {0}")]
    #[diagnostic(code(api::encode))]
    Encode(String),
}

impl From<serde_yaml::Error> for FormError {
    fn from(err: serde_yaml::Error) -> Self {
        FormError::Frontmatter(err.to_string())
    }
}

impl From<serde_json::Error> for FormError {
    fn from(err: serde_json::Error) -> Self {
        FormError::Encode(err.to_string())
    }
}

/// Fatal problems found while turning document text into a form model.
/// No partial model is ever returned alongside one of these.
#[derive(Error, Debug, Diagnostic, Clone)]
pub enum ParseError {
    #[error("Unterminated frontmatter block")]
    #[diagnostic(
        code(parser::unterminated_frontmatter),
        help("The document opens a `---` metadata block but never closes it with a `---` line.")
    )]
    UnterminatedFrontmatter {
        #[source_code]
        src: NamedSource<String>,
        #[label("Frontmatter opened here")]
        span: SourceSpan,
    },

    #[error("Invalid frontmatter: {message}")]
    #[diagnostic(
        code(parser::invalid_frontmatter),
        help("The metadata block must be a YAML mapping.")
    )]
    InvalidFrontmatter {
        #[source_code]
        src: NamedSource<String>,
        #[label("In this block")]
        span: SourceSpan,
        message: String,
    },

    #[error("Unterminated tag")]
    #[diagnostic(
        code(parser::unterminated_tag),
        help("Every `{{%` must be closed by a matching `%}}`.")
    )]
    UnterminatedTag {
        #[source_code]
        src: NamedSource<String>,
        #[label("Tag starts here")]
        span: SourceSpan,
    },

    #[error("Unexpected token")]
    #[diagnostic(
        code(parser::unexpected_token),
        help("The tag parser found a token it did not expect in this position.")
    )]
    UnexpectedToken {
        #[source_code]
        src: NamedSource<String>,
        #[label("Expected {expected}, but found this")]
        span: SourceSpan,
        expected: String,
    },

    #[error("Unknown tag `{name}`")]
    #[diagnostic(code(parser::unknown_tag))]
    UnknownTag {
        #[source_code]
        src: NamedSource<String>,
        #[label("Not a recognised form tag")]
        span: SourceSpan,
        name: String,
    },

    #[error("Closing tag `{found}` does not match `{expected}`")]
    #[diagnostic(code(parser::mismatched_closing_tag))]
    MismatchedClosingTag {
        #[source_code]
        src: NamedSource<String>,
        #[label("This closes `{found}`")]
        span: SourceSpan,
        expected: String,
        found: String,
    },

    #[error("Tag `{name}` is never closed")]
    #[diagnostic(
        code(parser::unclosed_tag),
        help("Add `{{% /{name} %}}` after the tag's content.")
    )]
    UnclosedTag {
        #[source_code]
        src: NamedSource<String>,
        #[label("Opened here")]
        span: SourceSpan,
        name: String,
    },

    #[error("Tag `{name}` is not allowed here: {reason}")]
    #[diagnostic(code(parser::misplaced_tag))]
    MisplacedTag {
        #[source_code]
        src: NamedSource<String>,
        #[label("Misplaced tag")]
        span: SourceSpan,
        name: String,
        reason: String,
    },

    #[error("Document does not contain a form")]
    #[diagnostic(
        code(parser::missing_form),
        help("Wrap the fields in `{{% form id=\"...\" %}}` ... `{{% /form %}}`.")
    )]
    MissingForm {
        #[source_code]
        src: NamedSource<String>,
        #[label("Document body")]
        span: SourceSpan,
    },

    #[error("Missing required attribute `{attribute}` on `{tag}`")]
    #[diagnostic(code(parser::missing_attribute))]
    MissingAttribute {
        #[source_code]
        src: NamedSource<String>,
        #[label("Add `{attribute}` here")]
        span: SourceSpan,
        tag: String,
        attribute: String,
    },

    #[error("Malformed attribute `{attribute}`: {reason}")]
    #[diagnostic(code(parser::malformed_attribute))]
    MalformedAttribute {
        #[source_code]
        src: NamedSource<String>,
        #[label("In this tag")]
        span: SourceSpan,
        attribute: String,
        reason: String,
    },

    #[error("Duplicate id `{id}`")]
    #[diagnostic(
        code(parser::duplicate_id),
        help("Ids must be unique across the whole document.")
    )]
    DuplicateId {
        #[source_code]
        src: NamedSource<String>,
        #[label("Second declaration")]
        span: SourceSpan,
        id: String,
    },

    #[error("Reference to undeclared {what} `{name}`")]
    #[diagnostic(code(parser::undeclared_reference))]
    UndeclaredReference {
        #[source_code]
        src: NamedSource<String>,
        #[label("Referenced here")]
        span: SourceSpan,
        what: String,
        name: String,
    },

    #[error("Field `{field}` references undeclared column `{column}`")]
    #[diagnostic(
        code(parser::undeclared_column),
        help("Declare every column in the field's `columnIds` attribute.")
    )]
    UndeclaredColumn {
        #[source_code]
        src: NamedSource<String>,
        #[label("Here")]
        span: SourceSpan,
        field: String,
        column: String,
    },

    #[error("Invalid table in field `{field}`: {reason}")]
    #[diagnostic(code(parser::invalid_table))]
    InvalidTable {
        #[source_code]
        src: NamedSource<String>,
        #[label("In this table")]
        span: SourceSpan,
        field: String,
        reason: String,
    },

    #[error("Invalid value for field `{field}`: {reason}")]
    #[diagnostic(code(parser::invalid_value))]
    InvalidValue {
        #[source_code]
        src: NamedSource<String>,
        #[label("This value")]
        span: SourceSpan,
        field: String,
        reason: String,
    },

    #[error("Invalid option in field `{field}`: {reason}")]
    #[diagnostic(
        code(parser::invalid_option),
        help("Options are written `- [ ] Label {{% #option_id %}}`, one per line.")
    )]
    InvalidOption {
        #[source_code]
        src: NamedSource<String>,
        #[label("This option")]
        span: SourceSpan,
        field: String,
        reason: String,
    },
}

/// A value or cell could not be coerced to its declared type.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValueError {
    #[error("`{input}` is not a number")]
    NotANumber { input: String },

    #[error("`{input}` is not an absolute URL")]
    InvalidUrl { input: String },

    #[error("`{input}` is not a date in YYYY-MM-DD format")]
    InvalidDate { input: String },

    #[error("`{input}` is not a year between 1000 and 9999")]
    InvalidYear { input: String },

    #[error("{kind} values cannot be written as plain text")]
    Unsupported { kind: crate::model::Kind },

    #[error("cell `{column}`: {source}")]
    Cell {
        column: String,
        #[source]
        source: Box<ValueError>,
    },

    #[error(transparent)]
    Escape(#[from] CellError),
}

/// Cell text that cannot be written into a single-line table cell.
#[derive(Error, Debug, Diagnostic, Clone, PartialEq)]
pub enum CellError {
    #[error("cell text contains a line break: {text:?}")]
    #[diagnostic(
        code(table::newline_in_cell),
        help("Table cells are single-line; move multi-line text into a string field.")
    )]
    Newline { text: String },

    #[error("cell text contains control character U+{code:04X}: {text:?}")]
    #[diagnostic(code(table::control_character))]
    ControlCharacter { text: String, code: u32 },
}

/// Grid text that is not a well-formed table.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TableError {
    #[error("line {line} is not a table row: {text:?}")]
    NotARow { line: usize, text: String },

    #[error("row {row} has {found} cells, expected {expected}")]
    RaggedRow {
        row: usize,
        expected: usize,
        found: usize,
    },
}
