use miette::SourceSpan;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A half-open byte range into the original document text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

impl Span {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    pub fn len(&self) -> usize {
        self.end.saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl From<Span> for SourceSpan {
    fn from(span: Span) -> Self {
        (span.start, span.len()).into()
    }
}

/// A literal attribute value as written inside a tag.
#[derive(Debug, Clone, PartialEq)]
pub enum AttrValue {
    String(String),
    Number(f64),
    Bool(bool),
    Null,
    List(Vec<AttrValue>),
}

impl AttrValue {
    pub fn type_name(&self) -> &'static str {
        match self {
            AttrValue::String(_) => "string",
            AttrValue::Number(_) => "number",
            AttrValue::Bool(_) => "boolean",
            AttrValue::Null => "null",
            AttrValue::List(_) => "list",
        }
    }
}

impl fmt::Display for AttrValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttrValue::String(s) => {
                write!(f, "\"")?;
                for c in s.chars() {
                    match c {
                        '"' => write!(f, "\\\"")?,
                        '\\' => write!(f, "\\\\")?,
                        '\n' => write!(f, "\\n")?,
                        '\t' => write!(f, "\\t")?,
                        c => write!(f, "{c}")?,
                    }
                }
                write!(f, "\"")
            }
            AttrValue::Number(n) => write!(f, "{n}"),
            AttrValue::Bool(b) => write!(f, "{b}"),
            AttrValue::Null => write!(f, "null"),
            AttrValue::List(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, "]")
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Attribute {
    pub name: String,
    pub value: AttrValue,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub enum NodeType {
    /// The body of the document; the root of every tree.
    Document,
    /// A block tag such as `{% field ... %}` together with its content.
    Tag(String),
    /// An inline `{% #id %}` marker.
    Annotation(String),
    Text(String),
    /// A fenced code block. Tags are never recognised inside one.
    Fence { info: String, content: String },
}

/// The read-only view of a markup node the structural parser works against.
pub trait MarkupNode: Sized {
    fn node_type(&self) -> &NodeType;
    fn attributes(&self) -> &[Attribute];
    fn children(&self) -> &[Self];
    /// Whole node, from the start of the opening tag to the end of the closing tag.
    fn span(&self) -> Span;
    /// Just the opening tag (equal to `span()` for text, fences and self-closing tags).
    fn open_span(&self) -> Span;

    fn attribute(&self, name: &str) -> Option<&Attribute> {
        self.attributes().iter().find(|a| a.name == name)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub node_type: NodeType,
    pub attributes: Vec<Attribute>,
    pub children: Vec<Node>,
    pub pos_start: usize,
    pub pos_end: usize,
    pub open_end: usize,
}

impl Node {
    pub fn leaf(node_type: NodeType, pos_start: usize, pos_end: usize) -> Self {
        Self {
            node_type,
            attributes: Vec::new(),
            children: Vec::new(),
            pos_start,
            pos_end,
            open_end: pos_end,
        }
    }

    pub fn get_source_span(&self) -> SourceSpan {
        self.span().into()
    }
}

impl MarkupNode for Node {
    fn node_type(&self) -> &NodeType {
        &self.node_type
    }

    fn attributes(&self) -> &[Attribute] {
        &self.attributes
    }

    fn children(&self) -> &[Self] {
        &self.children
    }

    fn span(&self) -> Span {
        Span::new(self.pos_start, self.pos_end)
    }

    fn open_span(&self) -> Span {
        Span::new(self.pos_start, self.open_end)
    }
}
