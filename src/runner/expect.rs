//! The `expect` action.
//!
//! A matcher is `[subject, comparator, expected]`. The subject is a dotted
//! path into the selected context, or for `document` a page query of the form
//! `selector` or `[selector, property, argument]`.

use serde::Deserialize;
use serde_json::{json, Value};

use super::comparators::{compare, lookup, parse_comparator, MatchResult};
use super::context::ExecutionState;
use super::error::StepError;
use super::matchers::{self, DomMatcher};
use crate::driver::traits::BrowserPage;
use crate::parser::types::{ContextKind, Step};

/// Reads a property of (or calls a method on) the first matching element.
///
/// Without a property the result is a small summary of the element.
pub const QUERY_ELEMENT_JS: &str = r#"({ selector, property, arg }) => {
    const el = document.querySelector(selector);
    if (!el) return { found: false, defined: true, value: null };
    if (property === null || property === undefined) {
        return {
            found: true,
            defined: true,
            value: { tagName: el.tagName, id: el.id, text: (el.textContent || '').trim() }
        };
    }
    const member = el[property];
    const value = typeof member === 'function' ? member.call(el, arg) : member;
    if (value === undefined) return { found: true, defined: false, value: null };
    try {
        return { found: true, defined: true, value: JSON.parse(JSON.stringify(value)) };
    } catch (e) {
        return { found: true, defined: true, value: String(value) };
    }
}"#;

#[derive(Debug, Deserialize)]
struct QueryResult {
    found: bool,
    #[serde(default = "defined_by_default")]
    defined: bool,
    #[serde(default)]
    value: Value,
}

fn defined_by_default() -> bool {
    true
}

/// Page query parsed from a `document` subject
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentSubject {
    pub selector: String,
    pub property: Option<String>,
    pub argument: Option<Value>,
}

impl DocumentSubject {
    pub fn parse(subject: &Value) -> Option<Self> {
        match subject {
            Value::String(selector) => Some(Self {
                selector: selector.clone(),
                property: None,
                argument: None,
            }),
            Value::Array(parts) => {
                let selector = parts.first()?.as_str()?.to_string();
                Some(Self {
                    selector,
                    property: parts.get(1).and_then(Value::as_str).map(str::to_string),
                    argument: parts.get(2).cloned(),
                })
            }
            _ => None,
        }
    }
}

fn is_blank(subject: &Value) -> bool {
    match subject {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        Value::Array(items) => items.is_empty(),
        _ => false,
    }
}

fn invalid(reason: String) -> StepError {
    StepError::InvalidConfig {
        action: "expect".to_string(),
        reason,
    }
}

/// Evaluate one `expect` step against the captured state
pub async fn run(
    step: &Step,
    state: &ExecutionState,
    page: Option<&dyn BrowserPage>,
) -> Result<(), StepError> {
    let Some(matcher) = step.matcher.as_ref() else {
        return Ok(());
    };
    let Some(subject) = matcher.first().filter(|s| !is_blank(s)) else {
        return Ok(());
    };
    let Some(comparator) = matcher.get(1).and_then(Value::as_str) else {
        return Ok(());
    };
    let expected = matcher.get(2);
    let (negated, name) = parse_comparator(comparator);
    let context = step.context.unwrap_or_default();

    let result = match DomMatcher::from_name(name) {
        Some(dom) => {
            let page = page.ok_or_else(|| invalid(format!("'{}' needs a browser page", name)))?;
            let query = DocumentSubject::parse(subject)
                .ok_or_else(|| invalid(format!("'{}' needs a selector subject", name)))?;
            matchers::apply(dom, page, &query.selector, expected).await?
        }
        None => {
            let received = resolve(subject, context, state, page).await?;
            compare(name, received.as_ref(), expected, negated)?
        }
    };

    check(result, negated)
}

fn check(result: MatchResult, negated: bool) -> Result<(), StepError> {
    if result.pass == negated {
        return Err(StepError::Assertion(result.message));
    }
    Ok(())
}

/// `None` when the subject resolves to nothing
async fn resolve(
    subject: &Value,
    context: ContextKind,
    state: &ExecutionState,
    page: Option<&dyn BrowserPage>,
) -> Result<Option<Value>, StepError> {
    if context == ContextKind::Document {
        let page = page.ok_or_else(|| invalid("document context needs a browser page".into()))?;
        let query = DocumentSubject::parse(subject)
            .ok_or_else(|| invalid(format!("Invalid document subject: {}", subject)))?;
        return query_document(page, &query).await;
    }

    let path = match subject {
        Value::String(path) => path.clone(),
        Value::Number(n) => n.to_string(),
        other => return Err(invalid(format!("Invalid subject path: {}", other))),
    };
    Ok(lookup(&state.context_value(context), &path))
}

async fn query_document(
    page: &dyn BrowserPage,
    query: &DocumentSubject,
) -> Result<Option<Value>, StepError> {
    let raw = page
        .evaluate(
            QUERY_ELEMENT_JS,
            json!({
                "selector": query.selector,
                "property": query.property,
                "arg": query.argument,
            }),
        )
        .await
        .map_err(|e| StepError::driver("expect", e))?;

    let result: QueryResult = serde_json::from_value(raw)
        .map_err(|e| StepError::driver("expect", anyhow::Error::new(e)))?;

    if !result.found {
        return Ok(Some(Value::Null));
    }
    Ok(result.defined.then_some(result.value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::http::CapturedResponse;
    use crate::runner::testing::{FakeElement, FakePage};

    fn state_with_status(status: u16) -> ExecutionState {
        ExecutionState {
            last_response: Some(CapturedResponse {
                url: "http://127.0.0.1/".into(),
                status: Some(status),
                data: json!({"items": [1, 2, 3]}),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    fn expect_step(subject: Value, comparator: &str, expected: Value) -> Step {
        Step::new("expect").with_matcher(subject, comparator, expected)
    }

    #[tokio::test]
    async fn test_response_path_assertions() {
        let state = state_with_status(200);
        run(&expect_step(json!("status"), "toBe", json!(200)), &state, None)
            .await
            .unwrap();
        run(&expect_step(json!("data.items.length"), "toBe", json!(3)), &state, None)
            .await
            .unwrap();

        let err = run(&expect_step(json!("status"), "toBe", json!(201)), &state, None)
            .await
            .unwrap_err();
        assert!(matches!(err, StepError::Assertion(ref m) if m.contains("Received: 200")));
    }

    #[tokio::test]
    async fn test_negation_passes_iff_different() {
        let state = state_with_status(500);
        run(&expect_step(json!("status"), "not.toBe", json!(200)), &state, None)
            .await
            .unwrap();
        assert!(run(&expect_step(json!("status"), "not.toBe", json!(500)), &state, None)
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_malformed_matcher_is_vacuous_pass() {
        let state = ExecutionState::default();
        run(&Step::new("expect"), &state, None).await.unwrap();

        let mut no_comparator = Step::new("expect");
        no_comparator.matcher = Some(vec![json!("status")]);
        run(&no_comparator, &state, None).await.unwrap();

        run(&expect_step(json!(""), "toBe", json!(1)), &state, None)
            .await
            .unwrap();
        run(&expect_step(Value::Null, "toBe", json!(1)), &state, None)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_missing_path_is_undefined() {
        let state = ExecutionState::default();
        run(&expect_step(json!("status"), "toBeUndefined", Value::Null), &state, None)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_metrics_and_console_contexts() {
        let mut state = ExecutionState::default();
        state.metrics.pagesize = 2048;
        state.console.errors.push(crate::runner::context::ConsoleEntry {
            text: "boom".into(),
            location: None,
        });

        let pagesize = expect_step(json!("pagesize"), "toBeGreaterThan", json!(1024))
            .with_context(ContextKind::Metrics);
        run(&pagesize, &state, None).await.unwrap();

        let errors = expect_step(json!("errors.length"), "toBe", json!(0))
            .with_context(ContextKind::Console);
        assert!(run(&errors, &state, None).await.is_err());
    }

    #[tokio::test]
    async fn test_document_queries_and_library_matchers() {
        let fake = FakePage::default().with_element(
            "#title",
            FakeElement::visible("Dashboard").attribute("class", "big"),
        );
        let page: &dyn BrowserPage = &fake;
        let state = ExecutionState::default();

        let text = expect_step(json!(["#title", "textContent"]), "toBe", json!("Dashboard"))
            .with_context(ContextKind::Document);
        run(&text, &state, Some(page)).await.unwrap();

        let attr = expect_step(json!(["#title", "getAttribute", "class"]), "toBe", json!("big"))
            .with_context(ContextKind::Document);
        run(&attr, &state, Some(page)).await.unwrap();

        let missing = expect_step(json!(["#nope", "textContent"]), "toBeNull", Value::Null)
            .with_context(ContextKind::Document);
        run(&missing, &state, Some(page)).await.unwrap();

        let visible = expect_step(json!("#title"), "toBeVisible", Value::Null);
        run(&visible, &state, Some(page)).await.unwrap();

        let absent = expect_step(json!("#nope"), "not.toBePresent", Value::Null);
        run(&absent, &state, Some(page)).await.unwrap();
    }

    #[tokio::test]
    async fn test_library_matcher_needs_a_page() {
        let err = run(
            &expect_step(json!("#title"), "toBeVisible", Value::Null),
            &ExecutionState::default(),
            None,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, StepError::InvalidConfig { .. }));
    }

    #[test]
    fn test_document_subject_forms() {
        assert_eq!(
            DocumentSubject::parse(&json!("#a")).unwrap(),
            DocumentSubject {
                selector: "#a".into(),
                property: None,
                argument: None
            }
        );
        let call = DocumentSubject::parse(&json!(["#a", "getAttribute", "href"])).unwrap();
        assert_eq!(call.property.as_deref(), Some("getAttribute"));
        assert_eq!(call.argument, Some(json!("href")));
        assert!(DocumentSubject::parse(&json!(42)).is_none());
    }
}
