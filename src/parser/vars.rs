//! `{{name}}` placeholder substitution.
//!
//! Works on the serialized JSON text of a whole value so placeholders are
//! found wherever they occur: urls, header values, request bodies, matcher
//! expectations.

use anyhow::{Context, Result};
use regex::{Captures, Regex};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;

const PLACEHOLDER: &str = r"\{\{(.+?)\}\}";

/// Return a copy of `value` with every known `{{name}}` replaced.
///
/// Unknown names are left untouched, braces included.
pub fn replace_vars<T>(value: &T, vars: &HashMap<String, String>) -> Result<T>
where
    T: Serialize + DeserializeOwned,
{
    let text = serde_json::to_string(value).context("Failed to serialize definition")?;
    if vars.is_empty() {
        return serde_json::from_str(&text).context("Failed to copy definition");
    }

    let replaced = substitute(&text, vars)?;
    serde_json::from_str(&replaced).context("Definition is not valid JSON after substitution")
}

fn substitute(text: &str, vars: &HashMap<String, String>) -> Result<String> {
    let re = Regex::new(PLACEHOLDER)?;
    let result = re.replace_all(text, |caps: &Captures| match vars.get(&caps[1]) {
        Some(value) => json_escape(value),
        None => caps[0].to_string(),
    });
    Ok(result.into_owned())
}

/// Escape a value so it can sit inside a JSON string literal
fn json_escape(value: &str) -> String {
    let quoted = serde_json::Value::String(value.to_string()).to_string();
    quoted[1..quoted.len() - 1].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::types::{Step, TestDefinition};
    use serde_json::json;

    fn vars(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn definition() -> TestDefinition {
        serde_json::from_value(json!({
            "id": "t-1",
            "steps": [
                {
                    "action": "navigate",
                    "url": "{{base_url}}/login",
                    "headers": { "Authorization": "Bearer {{token}}" }
                },
                { "action": "expect", "matcher": ["data.user", "toBe", "{{user}}"] }
            ]
        }))
        .unwrap()
    }

    #[test]
    fn test_replaces_everywhere() {
        let out = replace_vars(
            &definition(),
            &vars(&[
                ("base_url", "https://api.example.test"),
                ("token", "abc"),
                ("user", "ana"),
            ]),
        )
        .unwrap();

        assert_eq!(out.steps[0].config["url"], "https://api.example.test/login");
        assert_eq!(out.steps[0].config["headers"]["Authorization"], "Bearer abc");
        assert_eq!(out.steps[1].matcher.as_ref().unwrap()[2], "ana");
    }

    #[test]
    fn test_unknown_placeholder_passes_through() {
        let out = replace_vars(&definition(), &vars(&[("token", "abc")])).unwrap();
        assert_eq!(out.steps[0].config["url"], "{{base_url}}/login");
        assert_eq!(out.steps[1].matcher.as_ref().unwrap()[2], "{{user}}");
    }

    #[test]
    fn test_without_placeholders_is_identity() {
        let step = Step::new("navigate").with("url", "https://example.test");
        let out = replace_vars(&step, &vars(&[("base_url", "x")])).unwrap();
        assert_eq!(out, step);
    }

    #[test]
    fn test_non_greedy_match() {
        let step = Step::new("navigate").with("url", "{{a}}-{{b}}");
        let out = replace_vars(&step, &vars(&[("a", "1"), ("b", "2")])).unwrap();
        assert_eq!(out.config["url"], "1-2");
    }

    #[test]
    fn test_values_with_quotes_keep_json_valid() {
        let step = Step::new("type").with("text", "say {{greeting}}");
        let out = replace_vars(&step, &vars(&[("greeting", r#""hi" \o/"#)])).unwrap();
        assert_eq!(out.config["text"], r#"say "hi" \o/"#);
    }
}
