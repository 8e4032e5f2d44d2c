use crate::ast::Span;
use crate::error::ParseError;
use crate::model::{DEFAULT_ROLE, USER_ROLE};
use miette::NamedSource;
use serde::{Deserialize, Serialize};
use serde_yaml::{Mapping, Value};
use std::collections::BTreeMap;

/// Top-level frontmatter key holding the form's own settings.
pub const SETTINGS_KEY: &str = "form";

/// Limits handed to the external agent harness. The core only carries them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HarnessConfig {
    pub max_turns: u32,
    pub max_patches_per_turn: u32,
    pub max_issues_per_turn: u32,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            max_turns: 100,
            max_patches_per_turn: 20,
            max_issues_per_turn: 10,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FormSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spec: Option<String>,
    #[serde(default = "default_roles")]
    pub roles: Vec<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub role_instructions: BTreeMap<String, String>,
    #[serde(default)]
    pub harness: HarnessConfig,
    /// Keys this crate does not understand, kept for round-tripping.
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

fn default_roles() -> Vec<String> {
    vec![USER_ROLE.to_string(), DEFAULT_ROLE.to_string()]
}

impl Default for FormSettings {
    fn default() -> Self {
        Self {
            spec: None,
            roles: default_roles(),
            role_instructions: BTreeMap::new(),
            harness: HarnessConfig::default(),
            extra: BTreeMap::new(),
        }
    }
}

/// Document-level metadata: the form settings plus every other frontmatter key, in order.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FormMetadata {
    pub settings: FormSettings,
    pub raw: Mapping,
}

impl FormMetadata {
    pub fn roles(&self) -> &[String] {
        &self.settings.roles
    }

    pub fn has_role(&self, role: &str) -> bool {
        self.settings.roles.iter().any(|r| r == role)
    }

    pub fn instructions_for(&self, role: &str) -> Option<&str> {
        self.settings.role_instructions.get(role).map(String::as_str)
    }

    /// Frontmatter keys other than the settings key.
    pub fn extra_keys(&self) -> impl Iterator<Item = (&Value, &Value)> {
        self.raw
            .iter()
            .filter(|(k, _)| k.as_str() != Some(SETTINGS_KEY))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Frontmatter {
    pub metadata: FormMetadata,
    /// The whole `---` ... `---` block, when present.
    pub span: Option<Span>,
    pub body_start: usize,
}

/// Splits a leading `---` delimited YAML block from the document body.
pub fn extract_frontmatter(source: &str, name: &str) -> Result<Frontmatter, ParseError> {
    let start = if source.starts_with('\u{feff}') { 3 } else { 0 };
    let text = &source[start..];

    let first_line_end = text.find('\n').unwrap_or(text.len());
    if text[..first_line_end].trim_end() != "---" {
        return Ok(Frontmatter {
            metadata: FormMetadata::default(),
            span: None,
            body_start: start,
        });
    }

    let yaml_start = start + (first_line_end + 1).min(text.len());
    let mut cursor = yaml_start;
    while cursor < source.len() {
        let line_end = source[cursor..]
            .find('\n')
            .map_or(source.len(), |i| cursor + i);
        if source[cursor..line_end].trim_end() == "---" {
            let yaml = &source[yaml_start..cursor];
            let body_start = (line_end + 1).min(source.len());
            let span = Span::new(start, line_end);
            let metadata = parse_metadata(yaml).map_err(|message| {
                ParseError::InvalidFrontmatter {
                    src: NamedSource::new(name, source.to_string()),
                    span: span.into(),
                    message,
                }
            })?;
            log::debug!("frontmatter found: {} keys", metadata.raw.len());
            return Ok(Frontmatter {
                metadata,
                span: Some(span),
                body_start,
            });
        }
        cursor = line_end + 1;
    }

    Err(ParseError::UnterminatedFrontmatter {
        src: NamedSource::new(name, source.to_string()),
        span: (start, 3).into(),
    })
}

fn parse_metadata(yaml: &str) -> Result<FormMetadata, String> {
    if yaml.trim().is_empty() {
        return Ok(FormMetadata::default());
    }
    let value: Value = serde_yaml::from_str(yaml).map_err(|e| e.to_string())?;
    let raw = match value {
        Value::Mapping(mapping) => mapping,
        Value::Null => Mapping::new(),
        other => return Err(format!("expected a mapping, found {}", yaml_type_name(&other))),
    };
    let settings = match raw.get(SETTINGS_KEY) {
        Some(value) => serde_yaml::from_value::<FormSettings>(value.clone())
            .map_err(|e| format!("`{SETTINGS_KEY}`: {e}"))?,
        None => FormSettings::default(),
    };
    if settings.roles.is_empty() {
        return Err(format!("`{SETTINGS_KEY}.roles` must name at least one role"));
    }
    Ok(FormMetadata { settings, raw })
}

fn yaml_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Sequence(_) => "a sequence",
        Value::Mapping(_) => "a mapping",
        Value::Tagged(_) => "a tagged value",
    }
}

/// Renders metadata back into a `---` block. Returns `None` when there is nothing worth
/// writing (no extra keys, default settings, no version to stamp).
pub fn render_frontmatter(
    metadata: &FormMetadata,
    spec_version: Option<&str>,
) -> Result<Option<String>, serde_yaml::Error> {
    let mut settings = metadata.settings.clone();
    if let Some(version) = spec_version {
        settings.spec = Some(version.to_string());
    }

    let mut raw = metadata.raw.clone();
    let has_settings_key = raw.contains_key(SETTINGS_KEY);
    if has_settings_key || settings != FormSettings::default() {
        raw.insert(
            Value::String(SETTINGS_KEY.to_string()),
            serde_yaml::to_value(&settings)?,
        );
    }
    if raw.is_empty() {
        return Ok(None);
    }
    let yaml = serde_yaml::to_string(&raw)?;
    Ok(Some(format!("---\n{yaml}---\n")))
}
