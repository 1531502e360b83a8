//! DOM matchers, resolved against the live page.
//!
//! Each matcher reads one value out of the page and hands the comparison to
//! the generic comparators. Negation is the caller's business.

use anyhow::{Context, Result};
use serde::Deserialize;
use serde_json::{json, Value};

use super::comparators::{compare, parse_comparator, MatchResult};
use super::error::StepError;
use crate::driver::traits::BrowserPage;

/// Reads one thing about the first element matching `selector`
pub const READ_ELEMENT_JS: &str = r#"({ selector, read, name }) => {
    const el = document.querySelector(selector);
    if (!el) return { found: false, value: null };
    switch (read) {
        case 'visible': {
            const style = window.getComputedStyle(el);
            return {
                found: true,
                value: !!style && style.display !== 'none' && style.visibility !== 'hidden' && style.opacity !== '0'
            };
        }
        case 'attribute':
            return { found: true, value: el.getAttribute(name) };
        case 'style':
            return { found: true, value: window.getComputedStyle(el).getPropertyValue(name) };
        case 'text':
            return { found: true, value: el.textContent };
        default:
            return { found: true, value: true };
    }
}"#;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DomMatcher {
    Present,
    Visible,
    Attribute,
    StyleProperty,
    TextContent,
}

impl DomMatcher {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "toBePresent" => Some(DomMatcher::Present),
            "toBeVisible" => Some(DomMatcher::Visible),
            "toHaveAttribute" => Some(DomMatcher::Attribute),
            "toHaveStyleProperty" => Some(DomMatcher::StyleProperty),
            "toHaveTextContent" => Some(DomMatcher::TextContent),
            _ => None,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ElementRead {
    found: bool,
    #[serde(default)]
    value: Value,
}

async fn read_element(
    page: &dyn BrowserPage,
    selector: &str,
    read: &str,
    name: Option<&str>,
) -> Result<ElementRead> {
    let raw = page
        .evaluate(
            READ_ELEMENT_JS,
            json!({ "selector": selector, "read": read, "name": name }),
        )
        .await
        .with_context(|| format!("Failed to query '{}'", selector))?;
    serde_json::from_value(raw).context("Unexpected element query result")
}

fn not_found(selector: &str) -> MatchResult {
    MatchResult {
        pass: false,
        message: format!("Element not found: {}", selector),
    }
}

pub async fn present(page: &dyn BrowserPage, selector: &str, visible: bool) -> Result<MatchResult> {
    let read = read_element(page, selector, if visible { "visible" } else { "present" }, None).await?;
    let pass = read.found && read.value == Value::Bool(true);
    let message = match (pass, visible) {
        (true, _) => format!("Element was found: {}", selector),
        (false, true) if read.found => format!("Element is not visible: {}", selector),
        _ => format!("Element not found: {}", selector),
    };
    Ok(MatchResult { pass, message })
}

pub async fn visible(page: &dyn BrowserPage, selector: &str) -> Result<MatchResult> {
    let result = present(page, selector, true).await?;
    Ok(MatchResult {
        message: if result.pass {
            format!("Element is visible: {}", selector)
        } else {
            result.message
        },
        pass: result.pass,
    })
}

pub async fn attribute(
    page: &dyn BrowserPage,
    selector: &str,
    name: &str,
    comparator: Option<&str>,
    value: Option<&Value>,
) -> Result<MatchResult, StepError> {
    let read = read_element(page, selector, "attribute", Some(name))
        .await
        .map_err(|e| StepError::driver("expect", e))?;
    if !read.found {
        return Ok(not_found(selector));
    }

    match comparator {
        Some(comparator) => compare_value(comparator, &read.value, value),
        None => Ok(MatchResult {
            pass: !read.value.is_null(),
            message: format!("Attribute '{}' on {}: {}", name, selector, read.value),
        }),
    }
}

pub async fn style_property(
    page: &dyn BrowserPage,
    selector: &str,
    property: &str,
    comparator: &str,
    value: Option<&Value>,
) -> Result<MatchResult, StepError> {
    let read = read_element(page, selector, "style", Some(property))
        .await
        .map_err(|e| StepError::driver("expect", e))?;
    if !read.found {
        return Ok(not_found(selector));
    }
    compare_value(comparator, &read.value, value)
}

/// Compares the text content with surrounding whitespace trimmed
pub async fn text_content(
    page: &dyn BrowserPage,
    selector: &str,
    comparator: &str,
    value: Option<&Value>,
) -> Result<MatchResult, StepError> {
    let read = read_element(page, selector, "text", None)
        .await
        .map_err(|e| StepError::driver("expect", e))?;
    if !read.found {
        return Ok(not_found(selector));
    }
    let text = match read.value {
        Value::String(s) => Value::String(s.trim().to_string()),
        other => other,
    };
    compare_value(comparator, &text, value)
}

/// Inner comparators may carry their own `not.`
fn compare_value(
    comparator: &str,
    received: &Value,
    expected: Option<&Value>,
) -> Result<MatchResult, StepError> {
    let (negated, name) = parse_comparator(comparator);
    let mut result = compare(name, Some(received), expected, negated)?;
    result.pass ^= negated;
    Ok(result)
}

/// Run a library matcher with the expected value of an `expect` step.
///
/// Expected value shapes:
/// - `toBePresent`: optional `true` to also require visibility
/// - `toHaveAttribute`: `[name]` or `[name, comparator, value]`
/// - `toHaveStyleProperty`: `[property, comparator, value]`
/// - `toHaveTextContent`: `[comparator, value]`, a bare value means `toBe`
pub async fn apply(
    matcher: DomMatcher,
    page: &dyn BrowserPage,
    selector: &str,
    expected: Option<&Value>,
) -> Result<MatchResult, StepError> {
    let args: Vec<Value> = match expected {
        Some(Value::Array(items)) => items.clone(),
        Some(other) => vec![other.clone()],
        None => Vec::new(),
    };
    let arg_str = |i: usize| args.get(i).and_then(Value::as_str);
    let invalid = |reason: &str| StepError::InvalidConfig {
        action: "expect".to_string(),
        reason: reason.to_string(),
    };

    match matcher {
        DomMatcher::Present => {
            let visible = expected.and_then(Value::as_bool).unwrap_or(false);
            present(page, selector, visible)
                .await
                .map_err(|e| StepError::driver("expect", e))
        }
        DomMatcher::Visible => visible(page, selector)
            .await
            .map_err(|e| StepError::driver("expect", e)),
        DomMatcher::Attribute => {
            let name = arg_str(0).ok_or_else(|| invalid("toHaveAttribute needs an attribute name"))?;
            attribute(page, selector, name, arg_str(1), args.get(2)).await
        }
        DomMatcher::StyleProperty => {
            let (Some(property), Some(comparator)) = (arg_str(0), arg_str(1)) else {
                return Err(invalid("toHaveStyleProperty needs [property, comparator, value]"));
            };
            style_property(page, selector, property, comparator, args.get(2)).await
        }
        DomMatcher::TextContent => match (args.len(), arg_str(0)) {
            (2.., Some(comparator)) => text_content(page, selector, comparator, args.get(1)).await,
            (1, _) => text_content(page, selector, "toBe", args.first()).await,
            _ => Err(invalid("toHaveTextContent needs [comparator, value]")),
        },
    }
}
