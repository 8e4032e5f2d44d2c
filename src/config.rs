use serde::{Deserialize, Serialize};

/// How `serialize` turns a form back into text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SerializeMode {
    /// Writes a canonical document from the model. Prose outside tags is dropped.
    Regenerate,
    /// Keeps the original text and rewrites only the fields a patch touched.
    #[default]
    Preserve,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SerializeOptions {
    pub mode: SerializeMode,
    /// Stamped into the frontmatter settings as `spec` when set.
    pub spec_version: Option<String>,
}

impl SerializeOptions {
    pub fn regenerate() -> Self {
        Self {
            mode: SerializeMode::Regenerate,
            spec_version: None,
        }
    }

    pub fn preserve() -> Self {
        Self::default()
    }

    pub fn with_spec_version(mut self, version: impl Into<String>) -> Self {
        self.spec_version = Some(version.into());
        self
    }
}
