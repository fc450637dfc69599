//! `{{VARIABLE}}` substitution over template text and JSON values.
//!
//! Tokens are `{{IDENTIFIER}}` with IDENTIFIER matching `\w+`. A token whose
//! variable is not bound is left in place verbatim.

use std::collections::BTreeMap;

use regex::{Captures, Regex};
use serde_json::Value;

use crate::error::FormationError;

const TOKEN_PATTERN: &str = r"\{\{(\w+)\}\}";

/// How many leading bytes are inspected for a NUL when classifying content.
pub const BINARY_SNIFF_LEN: usize = 8 * 1024;

/// Content with a NUL byte in its first 8 KiB is binary and never rendered.
pub fn is_binary(bytes: &[u8]) -> bool {
    let window = &bytes[..bytes.len().min(BINARY_SNIFF_LEN)];
    window.contains(&0)
}

/// Resolve state-recorded variables for rendering.
///
/// A value of the form `"$NAME"` is a placeholder for a sensitive variable
/// and resolves through `lookup` (normally the process environment). An
/// unbound placeholder is omitted, so its `{{TOKEN}}` stays in the output
/// rather than rendering the placeholder text.
pub fn safe_variables<F>(recorded: &BTreeMap<String, String>, lookup: F) -> BTreeMap<String, String>
where
    F: Fn(&str) -> Option<String>,
{
    let mut out = BTreeMap::new();
    for (name, value) in recorded {
        match env_placeholder(value) {
            Some(env_name) => match lookup(env_name) {
                Some(resolved) => {
                    out.insert(name.clone(), resolved);
                }
                None => {
                    tracing::debug!(
                        variable = %name,
                        env = env_name,
                        "sensitive variable unbound; token left verbatim"
                    );
                }
            },
            None => {
                out.insert(name.clone(), value.clone());
            }
        }
    }
    out
}

/// `Some("NAME")` for `"$NAME"`; `None` for a literal value.
pub fn env_placeholder(value: &str) -> Option<&str> {
    let name = value.strip_prefix('$')?;
    let valid = !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
    valid.then_some(name)
}

/// Renders templates against a fixed variable map.
#[derive(Debug, Clone)]
pub struct Interpolator {
    variables: BTreeMap<String, String>,
    token: Regex,
}

impl Interpolator {
    pub fn new(variables: BTreeMap<String, String>) -> Result<Self, FormationError> {
        Ok(Self {
            variables,
            token: Regex::new(TOKEN_PATTERN)?,
        })
    }

    pub fn variables(&self) -> &BTreeMap<String, String> {
        &self.variables
    }

    /// Substitute every bound token in `text`.
    pub fn render(&self, text: &str) -> String {
        self.token
            .replace_all(text, |caps: &Captures<'_>| match self.variables.get(&caps[1]) {
                Some(value) => value.clone(),
                None => caps[0].to_string(),
            })
            .into_owned()
    }

    /// Substitute tokens in every string leaf of `value`; keys are untouched.
    pub fn render_value(&self, value: &Value) -> Value {
        match value {
            Value::String(s) => Value::String(self.render(s)),
            Value::Array(items) => {
                Value::Array(items.iter().map(|v| self.render_value(v)).collect())
            }
            Value::Object(map) => Value::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), self.render_value(v)))
                    .collect(),
            ),
            other => other.clone(),
        }
    }

    /// Render file content. Binary or non-UTF-8 content passes through
    /// unchanged.
    pub fn render_bytes(&self, bytes: &[u8]) -> Vec<u8> {
        if is_binary(bytes) {
            return bytes.to_vec();
        }
        match std::str::from_utf8(bytes) {
            Ok(text) => self.render(text).into_bytes(),
            Err(_) => bytes.to_vec(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use serde_json::json;

    fn interp(pairs: &[(&str, &str)]) -> Interpolator {
        let vars = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Interpolator::new(vars).unwrap()
    }

    #[rstest]
    #[case("Hello {{NAME}}!", "Hello Ada!")]
    #[case("{{NAME}}{{NAME}}", "AdaAda")]
    #[case("Missing {{OTHER}} stays", "Missing {{OTHER}} stays")]
    #[case("Not a token {{ NAME }}", "Not a token {{ NAME }}")]
    #[case("Single {NAME}", "Single {NAME}")]
    fn render_text(#[case] input: &str, #[case] expected: &str) {
        assert_eq!(interp(&[("NAME", "Ada")]).render(input), expected);
    }

    #[test]
    fn render_value_touches_only_string_leaves() {
        let i = interp(&[("ACCOUNT", "T1")]);
        let value = json!({ "accountId": "{{ACCOUNT}}", "n": 3, "roles": ["{{ACCOUNT}}-admin"] });
        assert_eq!(
            i.render_value(&value),
            json!({ "accountId": "T1", "n": 3, "roles": ["T1-admin"] })
        );
    }

    #[test]
    fn binary_detection_uses_leading_window() {
        assert!(is_binary(b"PNG\0\x01"));
        assert!(!is_binary(b"plain text"));
        let mut late = vec![b'a'; BINARY_SNIFF_LEN];
        late.push(0);
        assert!(!is_binary(&late));
    }

    #[test]
    fn render_bytes_passes_binary_through() {
        let i = interp(&[("X", "y")]);
        let bin = b"{{X}}\0rest".to_vec();
        assert_eq!(i.render_bytes(&bin), bin);
        assert_eq!(i.render_bytes(b"{{X}}"), b"y".to_vec());
    }

    #[test]
    fn safe_variables_resolves_and_omits_placeholders() {
        let mut recorded = BTreeMap::new();
        recorded.insert("PLAIN".to_string(), "value".to_string());
        recorded.insert("SECRET".to_string(), "$API_KEY".to_string());
        recorded.insert("UNBOUND".to_string(), "$NOPE".to_string());

        let safe = safe_variables(&recorded, |name| (name == "API_KEY").then(|| "k3y".to_string()));
        assert_eq!(safe.get("PLAIN").map(String::as_str), Some("value"));
        assert_eq!(safe.get("SECRET").map(String::as_str), Some("k3y"));
        assert!(!safe.contains_key("UNBOUND"));

        let i = Interpolator::new(safe).unwrap();
        assert_eq!(i.render("{{UNBOUND}}"), "{{UNBOUND}}");
    }

    #[rstest]
    #[case("$HOME_DIR", Some("HOME_DIR"))]
    #[case("$", None)]
    #[case("$a-b", None)]
    #[case("cost $5", None)]
    fn placeholder_detection(#[case] value: &str, #[case] expected: Option<&str>) {
        assert_eq!(env_placeholder(value), expected);
    }
}
