//! Filters available to manifest templates
//!
//! - `b64encode`: base64-encode a string
//! - `quote`: render a string as a double-quoted YAML scalar
//! - `label_safe`: replace `:` so a workspace path can be used as a label value

use base64::{engine::general_purpose::STANDARD, Engine};
use minijinja::{Error, ErrorKind};

/// Usage: `{{ token | b64encode }}`
pub fn b64encode(value: &str) -> String {
    STANDARD.encode(value.as_bytes())
}

/// Usage: `name: {{ value | quote }}`
///
/// JSON string literals are valid YAML flow scalars, so escaping is delegated
/// to serde_json.
pub fn quote(value: &str) -> Result<String, Error> {
    serde_json::to_string(value).map_err(|e| {
        Error::new(
            ErrorKind::InvalidOperation,
            format!("failed to quote value: {}", e),
        )
    })
}

/// Usage: `{{ location | label_safe }}`
pub fn label_safe(value: &str) -> String {
    value.replace(':', "_")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quote_escapes_yaml_specials() {
        assert_eq!(quote("root:team-a").unwrap(), "\"root:team-a\"");
        assert_eq!(quote("say \"hi\"").unwrap(), "\"say \\\"hi\\\"\"");
    }

    #[test]
    fn label_safe_replaces_colons() {
        assert_eq!(label_safe("root:org:team-a"), "root_org_team-a");
    }

    #[test]
    fn b64encode_encodes() {
        assert_eq!(b64encode("token"), "dG9rZW4=");
    }
}
