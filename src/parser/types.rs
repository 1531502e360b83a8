use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

use crate::notify::Notifications;
use crate::runner::error::StepError;
use crate::runner::state::{Log, LogStatus, StepStatus};

/// A test as handed to the runner by the scheduler, the API or the CLI
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestDefinition {
    #[serde(default)]
    pub id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,

    #[serde(default = "default_test_name")]
    pub name: String,

    #[serde(default, rename = "type")]
    pub kind: TestType,

    #[serde(default)]
    pub steps: Vec<Step>,

    /// Schedule expression, only meaningful for scheduled tests
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schedule: Option<String>,

    #[serde(default)]
    pub trigger: Trigger,

    #[serde(default)]
    pub runs_count: u64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lastrun: Option<LastRun>,

    /// Overrides the project level notifications when present
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notifications: Option<Notifications>,
}

fn default_test_name() -> String {
    "Unnamed test".to_string()
}

impl TestDefinition {
    /// Bookkeeping after a finished run: remember the outcome and bump the counter
    pub fn record_run(&mut self, log: &Log) {
        self.lastrun = Some(LastRun {
            log_id: log.id.clone(),
            status: log.status,
            created_at: log.created_at,
            trigger: log.trigger,
        });
        self.runs_count += 1;
    }
}

/// Summary of the latest run stored on the test
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LastRun {
    pub log_id: String,
    pub status: LogStatus,
    pub created_at: i64,
    pub trigger: Trigger,
}

/// Which execution context a test runs in
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TestType {
    #[default]
    Basic,
    Browser,
}

impl fmt::Display for TestType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TestType::Basic => write!(f, "basic"),
            TestType::Browser => write!(f, "browser"),
        }
    }
}

/// What started a run
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Trigger {
    #[default]
    Manual,
    Scheduled,
    Api,
}

/// One step of a test.
///
/// Every key besides `action`, `context`, `matcher` and `status` is kept in
/// `config`. A nested `config` object is accepted as well and wins over the
/// flat keys, so both `{action: navigate, url: ..}` and
/// `{action: navigate, config: {url: ..}}` describe the same step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    pub action: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<ContextKind>,

    /// `[subject, comparator, expected]`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub matcher: Option<Vec<Value>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<StepStatus>,

    #[serde(flatten)]
    pub config: Map<String, Value>,
}

impl Step {
    pub fn new(action: &str) -> Self {
        Self {
            action: action.to_string(),
            context: None,
            matcher: None,
            status: None,
            config: Map::new(),
        }
    }

    /// Builder helper, mostly for tests and programmatic definitions
    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.config.insert(key.to_string(), value.into());
        self
    }

    pub fn with_context(mut self, context: ContextKind) -> Self {
        self.context = Some(context);
        self
    }

    pub fn with_matcher(mut self, subject: Value, comparator: &str, expected: Value) -> Self {
        self.matcher = Some(vec![subject, Value::String(comparator.to_string()), expected]);
        self
    }

    pub fn action_kind(&self) -> Result<ActionKind, StepError> {
        self.action.parse()
    }

    /// Step parameters with a nested `config` object merged over the flat keys
    pub fn settings(&self) -> Map<String, Value> {
        let mut merged: Map<String, Value> = self
            .config
            .iter()
            .filter(|(key, _)| key.as_str() != "config")
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        if let Some(Value::Object(nested)) = self.config.get("config") {
            for (k, v) in nested {
                merged.insert(k.clone(), v.clone());
            }
        }
        merged
    }

    /// Deserialize the step parameters into an action specific struct
    pub fn settings_as<T: DeserializeOwned>(&self) -> Result<T, StepError> {
        serde_json::from_value(Value::Object(self.settings())).map_err(|e| {
            StepError::InvalidConfig {
                action: self.action.clone(),
                reason: e.to_string(),
            }
        })
    }
}

/// The closed set of actions a step may name
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActionKind {
    Navigate,
    Type,
    Click,
    Reload,
    Header,
    Geolocation,
    UserAgent,
    Viewport,
    Authenticate,
    WaitForSelector,
    WaitForTimeout,
    WaitForNavigation,
    Expect,
}

impl ActionKind {
    pub const ALL: [ActionKind; 13] = [
        ActionKind::Navigate,
        ActionKind::Type,
        ActionKind::Click,
        ActionKind::Reload,
        ActionKind::Header,
        ActionKind::Geolocation,
        ActionKind::UserAgent,
        ActionKind::Viewport,
        ActionKind::Authenticate,
        ActionKind::WaitForSelector,
        ActionKind::WaitForTimeout,
        ActionKind::WaitForNavigation,
        ActionKind::Expect,
    ];

    /// Wire name of the action
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionKind::Navigate => "navigate",
            ActionKind::Type => "type",
            ActionKind::Click => "click",
            ActionKind::Reload => "reload",
            ActionKind::Header => "header",
            ActionKind::Geolocation => "geolocation",
            ActionKind::UserAgent => "useragent",
            ActionKind::Viewport => "viewport",
            ActionKind::Authenticate => "authenticate",
            ActionKind::WaitForSelector => "waitForSelector",
            ActionKind::WaitForTimeout => "waitForTimeout",
            ActionKind::WaitForNavigation => "waitForNavigation",
            ActionKind::Expect => "expect",
        }
    }
}

impl FromStr for ActionKind {
    type Err = StepError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ActionKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| StepError::UnsupportedAction {
                action: s.to_string(),
                variant: None,
            })
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which captured state an `expect` step inspects
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ContextKind {
    #[default]
    Response,
    Document,
    Metrics,
    #[serde(rename = "resource-list", alias = "resources")]
    ResourceList,
    Console,
}

impl fmt::Display for ContextKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ContextKind::Response => "response",
            ContextKind::Document => "document",
            ContextKind::Metrics => "metrics",
            ContextKind::ResourceList => "resource-list",
            ContextKind::Console => "console",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_flat_step_keeps_extra_keys_in_config() {
        let step: Step = serde_json::from_value(json!({
            "action": "navigate",
            "url": "https://example.test",
            "method": "GET"
        }))
        .unwrap();

        assert_eq!(step.action_kind().unwrap(), ActionKind::Navigate);
        assert_eq!(step.config["url"], "https://example.test");
        assert!(step.context.is_none());
    }

    #[test]
    fn test_nested_config_wins_over_flat_keys() {
        let step: Step = serde_json::from_value(json!({
            "action": "navigate",
            "url": "https://flat.test",
            "config": { "url": "https://nested.test", "timeout": 100 }
        }))
        .unwrap();

        let settings = step.settings();
        assert_eq!(settings["url"], "https://nested.test");
        assert_eq!(settings["timeout"], 100);
        assert!(!settings.contains_key("config"));
    }

    #[test]
    fn test_unknown_action_is_typed_error() {
        let err = "scrollTo".parse::<ActionKind>().unwrap_err();
        assert!(matches!(err, StepError::UnsupportedAction { ref action, .. } if action == "scrollTo"));
    }

    #[test]
    fn test_action_names_round_trip() {
        for kind in ActionKind::ALL {
            assert_eq!(kind.as_str().parse::<ActionKind>().unwrap(), kind);
        }
    }

    #[test]
    fn test_parse_yaml_definition() {
        let yaml = r#"
id: t-1
project_id: p-1
type: browser
steps:
  - action: navigate
    url: "{{base_url}}"
  - action: expect
    context: resource-list
    matcher: ["length", "toBeGreaterThan", 0]
"#;
        let test: TestDefinition = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(test.kind, TestType::Browser);
        assert_eq!(test.trigger, Trigger::Manual);
        assert_eq!(test.name, "Unnamed test");
        assert_eq!(test.steps[1].context, Some(ContextKind::ResourceList));
        assert_eq!(test.steps[1].matcher.as_ref().unwrap().len(), 3);
    }

    #[test]
    fn test_status_is_appended_without_touching_config() {
        let mut step = Step::new("expect").with_matcher(json!("status"), "toBe", json!(200));
        step.status = Some(StepStatus::Pass);

        let value = serde_json::to_value(&step).unwrap();
        assert_eq!(value["status"], "PASS");
        assert_eq!(value["matcher"], json!(["status", "toBe", 200]));
    }

    #[test]
    fn test_record_run_updates_lastrun() {
        let mut test = TestDefinition {
            id: "t-1".into(),
            project_id: None,
            name: "uptime".into(),
            kind: TestType::Basic,
            steps: vec![],
            schedule: None,
            trigger: Trigger::Manual,
            runs_count: 4,
            lastrun: None,
            notifications: None,
        };
        let mut log = Log::create("t-1", Trigger::Scheduled);
        log.status = LogStatus::Fail;

        test.record_run(&log);

        assert_eq!(test.runs_count, 5);
        let lastrun = test.lastrun.unwrap();
        assert_eq!(lastrun.log_id, log.id);
        assert_eq!(lastrun.status, LogStatus::Fail);
        assert_eq!(lastrun.trigger, Trigger::Scheduled);
    }
}
