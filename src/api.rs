use crate::apply::{self, ApplyResult, BatchEntry, PatchOutcome};
use crate::config::SerializeOptions;
use crate::error::FormError;
use crate::frontmatter::FormMetadata;
use crate::model::{FormSchema, ResponseStore};
use crate::parser::{FormParser, SourceIndex};
use crate::patch::Patch;
use crate::schema_export;
use crate::serialization::{values_to_value, Value};
use crate::serializer::{Original, Serializer};
use crate::summary::{InspectResult, ProgressSummary, StructureSummary};
use crate::validator;
use serde::{Serialize, Serializer as SerdeSerializer};
use std::collections::BTreeSet;

/// A parsed form document together with its current answers.
///
/// Values are immutable: `apply` returns a new `ParsedForm` and leaves the input
/// untouched, so a caller can always keep the previous state around.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedForm {
    source: String,
    name: String,
    metadata: FormMetadata,
    schema: FormSchema,
    responses: ResponseStore,
    index: SourceIndex,
    touched: BTreeSet<String>,
}

impl Serialize for ParsedForm {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: SerdeSerializer,
    {
        let value = self.to_value();
        value.serialize(serializer)
    }
}

impl ParsedForm {
    /// The text the form was parsed from. Patches never change it.
    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn metadata(&self) -> &FormMetadata {
        &self.metadata
    }

    pub fn schema(&self) -> &FormSchema {
        &self.schema
    }

    pub fn responses(&self) -> &ResponseStore {
        &self.responses
    }

    pub fn index(&self) -> &SourceIndex {
        &self.index
    }

    /// Fields changed by a patch since the form was parsed.
    pub fn touched(&self) -> &BTreeSet<String> {
        &self.touched
    }

    /// The answers as a plain value tree. Unanswered fields are omitted.
    #[must_use]
    pub fn to_value(&self) -> Value {
        values_to_value(&self.schema, &self.responses)
    }

    /// Serializes the answers into a pretty-printed JSON string.
    ///
    /// # Errors
    /// Returns a `serde_json::Error` if serialization fails.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(&self)
    }

    /// Serializes the answers into a YAML string.
    ///
    /// # Errors
    /// Returns a `serde_yaml::Error` if serialization fails.
    pub fn to_yaml(&self) -> Result<String, serde_yaml::Error> {
        serde_yaml::to_string(&self)
    }

    /// The answers as a `serde_json::Value`, for callers that post-process them.
    pub fn values_json(&self) -> serde_json::Value {
        serde_json::to_value(self.to_value()).unwrap_or(serde_json::Value::Null)
    }

    /// The schema as a JSON Schema document.
    pub fn to_json_schema(&self) -> serde_json::Value {
        schema_export::to_json_schema(&self.schema)
    }

    fn with_outcome(&self, outcome: PatchOutcome) -> ParsedForm {
        let mut touched = self.touched.clone();
        touched.extend(outcome.touched);
        ParsedForm {
            responses: outcome.responses,
            touched,
            ..self.clone()
        }
    }
}

/// Parses a form document.
///
/// # Arguments
///
/// * `source` - The document text.
/// * `file_name` - The name of the document (used for error reporting).
///
/// # Errors
///
/// Returns a `FormError` if the document is not a well-formed form. No partial
/// model is returned.
pub fn parse(source: &str, file_name: &str) -> Result<ParsedForm, FormError> {
    let parser = FormParser::new_with_name(source, file_name.to_string());
    let document = parser.parse_document()?;
    Ok(ParsedForm {
        source: source.to_string(),
        name: file_name.to_string(),
        metadata: document.metadata,
        schema: document.schema,
        responses: document.responses,
        index: document.index,
        touched: BTreeSet::new(),
    })
}

/// Required-severity issues of `responses` against `schema`, in document order.
pub fn validate(schema: &FormSchema, responses: &ResponseStore) -> Vec<validator::Issue> {
    validator::validate(schema, responses)
}

pub fn inspect(form: &ParsedForm) -> InspectResult {
    let issues = validator::inspect_issues(&form.schema, &form.responses);
    InspectResult {
        structure_summary: StructureSummary::compute(&form.schema),
        progress_summary: ProgressSummary::compute(&form.schema, &form.responses, &issues),
        issues,
    }
}

/// Applies a batch of patches. Rejected patches are reported and skipped; the
/// rest are committed in order.
pub fn apply(form: &ParsedForm, patches: Vec<Patch>) -> (ParsedForm, ApplyResult) {
    run_batch(form, apply::encode_batch(patches))
}

/// Like `apply`, for a batch received as JSON text. A batch that is not a JSON
/// array is rejected as a whole; a single malformed entry rejects only itself.
pub fn apply_json(form: &ParsedForm, json: &str) -> (ParsedForm, ApplyResult) {
    match apply::decode_batch(json) {
        Ok(batch) => run_batch(form, batch),
        Err(message) => {
            log::debug!("patch batch for `{}` rejected: {message}", form.name);
            finish(form, apply::rejected_batch(&form.responses, message))
        }
    }
}

fn run_batch(form: &ParsedForm, batch: Vec<BatchEntry>) -> (ParsedForm, ApplyResult) {
    let outcome = apply::apply_patches(&form.schema, &form.metadata, &form.responses, batch);
    finish(form, outcome)
}

fn finish(form: &ParsedForm, outcome: PatchOutcome) -> (ParsedForm, ApplyResult) {
    let apply_status = outcome.status();
    let rejected_patches = outcome.rejected.clone();
    log::debug!(
        "applied {} patches to `{}` ({} rejected)",
        outcome.applied,
        form.name,
        rejected_patches.len()
    );
    let next = form.with_outcome(outcome);
    let inspection = inspect(&next);
    let result = ApplyResult {
        apply_status,
        rejected_patches,
        structure_summary: inspection.structure_summary,
        progress_summary: inspection.progress_summary,
        issues: inspection.issues,
    };
    (next, result)
}

/// Writes the form back to text.
///
/// # Errors
///
/// Returns a `FormError` if a table cell cannot be written or the frontmatter
/// cannot be encoded.
pub fn serialize(form: &ParsedForm, options: &SerializeOptions) -> Result<String, FormError> {
    log::debug!("serializing `{}` in {:?} mode", form.name, options.mode);
    let original = Original {
        source: &form.source,
        index: &form.index,
        touched: &form.touched,
    };
    Serializer::new(&form.schema, &form.metadata, &form.responses).serialize(&original, options)
}
