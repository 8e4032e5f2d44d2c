pub mod api;
pub mod apply;
pub mod ast;
pub mod config;
pub mod error;
pub mod frontmatter;
pub mod lexer;
pub mod markup;
pub mod model;
pub mod parser;
pub mod patch;
pub mod schema_export;
mod serialization;
pub mod serializer;
pub mod summary;
pub mod table;
pub mod tags;
pub mod utils;
pub mod validator;
pub mod values;

pub use api::{apply, apply_json, inspect, parse, serialize, validate, ParsedForm};
pub use apply::{ApplyResult, ApplyStatus, RejectedPatch};
pub use config::{SerializeMode, SerializeOptions};
pub use error::{FormError, ParseError};
pub use patch::Patch;
pub use serialization::Value;
pub use summary::InspectResult;
pub use validator::{Issue, IssueReason, IssueScope, Severity};
