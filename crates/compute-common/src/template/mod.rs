//! Named manifest templates rendered with minijinja
//!
//! A [`ManifestTemplates`] set is built once from embedded YAML sources and
//! then rendered many times with different values. Undefined variables are
//! errors, so a template and its values struct cannot silently drift apart.

mod filters;

use minijinja::{Environment, UndefinedBehavior};
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

/// Errors that can occur while registering or rendering templates
#[derive(Debug, Error)]
pub enum TemplateError {
    /// Template source failed to parse
    #[error("template {name} is invalid: {source}")]
    Syntax {
        /// Template name
        name: String,
        /// The underlying minijinja error
        source: minijinja::Error,
    },

    /// Rendering failed (undefined variable, filter error)
    #[error("failed to render template {name}: {source}")]
    Render {
        /// Template name
        name: String,
        /// The underlying minijinja error
        source: minijinja::Error,
    },

    /// Rendered output is not the expected YAML object
    #[error("template {name} rendered invalid YAML: {source}")]
    Yaml {
        /// Template name
        name: String,
        /// The underlying serde_yaml error
        source: serde_yaml::Error,
    },
}

impl TemplateError {
    /// Name of the template that failed
    pub fn template_name(&self) -> &str {
        match self {
            Self::Syntax { name, .. } | Self::Render { name, .. } | Self::Yaml { name, .. } => name,
        }
    }
}

impl From<TemplateError> for crate::Error {
    fn from(e: TemplateError) -> Self {
        crate::Error::template(e.template_name().to_string(), e.to_string())
    }
}

/// A named set of manifest templates
pub struct ManifestTemplates {
    env: Environment<'static>,
}

impl Default for ManifestTemplates {
    fn default() -> Self {
        Self::new()
    }
}

impl ManifestTemplates {
    /// Create an empty set with strict undefined handling and the manifest filters
    pub fn new() -> Self {
        let mut env = Environment::new();
        env.set_undefined_behavior(UndefinedBehavior::Strict);
        env.set_keep_trailing_newline(true);
        env.add_filter("b64encode", filters::b64encode);
        env.add_filter("quote", filters::quote);
        env.add_filter("label_safe", filters::label_safe);
        Self { env }
    }

    /// Register a template source under `name`
    pub fn with_template(
        mut self,
        name: &'static str,
        source: &'static str,
    ) -> Result<Self, TemplateError> {
        self.env
            .add_template(name, source)
            .map_err(|source| TemplateError::Syntax {
                name: name.to_string(),
                source,
            })?;
        Ok(self)
    }

    /// Render `name` with `values` to text
    pub fn render(&self, name: &str, values: impl Serialize) -> Result<String, TemplateError> {
        let render_err = |source| TemplateError::Render {
            name: name.to_string(),
            source,
        };
        self.env
            .get_template(name)
            .map_err(render_err)?
            .render(values)
            .map_err(render_err)
    }

    /// Render `name` and parse the result as a single YAML document
    pub fn render_yaml<T: DeserializeOwned>(
        &self,
        name: &str,
        values: impl Serialize,
    ) -> Result<T, TemplateError> {
        let rendered = self.render(name, values)?;
        serde_yaml::from_str(&rendered).map_err(|source| TemplateError::Yaml {
            name: name.to_string(),
            source,
        })
    }
}
