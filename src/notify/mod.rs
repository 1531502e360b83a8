//! Who gets told about a finished run.
//!
//! Only the decision lives here. Delivering the email or calling the webhook
//! is up to whoever consumes the [`NotificationPlan`].

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

use crate::runner::state::{Log, LogStatus};

/// Logs the change rule compares: the current run and the one before it
pub const HISTORY_DEPTH: usize = 2;

/// When a recipient wants to hear about a run
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum NotifyOn {
    Any,
    Pass,
    Fail,
    #[default]
    Change,
}

impl NotifyOn {
    fn fires(&self, status: LogStatus, changed: bool) -> bool {
        match self {
            NotifyOn::Any => true,
            NotifyOn::Pass => status == LogStatus::Pass,
            NotifyOn::Fail => status == LogStatus::Fail,
            NotifyOn::Change => changed,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Notifications {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<EmailSettings>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub webhook: Vec<WebhookSettings>,
}

impl Notifications {
    fn uses_change(&self) -> bool {
        let email = self
            .email
            .as_ref()
            .map_or(false, |e| e.recipients.iter().any(|r| r.status == NotifyOn::Change));
        email || self.webhook.iter().any(|w| w.status == NotifyOn::Change)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EmailSettings {
    /// Subject line per status, keyed `PASS` / `FAIL`
    #[serde(default)]
    pub subject: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<Sender>,

    #[serde(default)]
    pub recipients: Vec<Recipient>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sender {
    #[serde(default)]
    pub name: String,
    pub email: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recipient {
    pub email: String,
    #[serde(default)]
    pub status: NotifyOn,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebhookSettings {
    pub config: WebhookTarget,
    #[serde(default)]
    pub status: NotifyOn,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebhookTarget {
    pub url: String,
    #[serde(default)]
    pub headers: Map<String, Value>,
    /// Milliseconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,
}

/// What should go out for one finished run
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NotificationPlan {
    pub status: LogStatus,
    pub subject: Option<String>,
    pub from: Option<Sender>,
    pub recipients: Vec<String>,
    pub webhooks: Vec<WebhookTarget>,
}

impl NotificationPlan {
    pub fn is_empty(&self) -> bool {
        self.recipients.is_empty() && self.webhooks.is_empty()
    }
}

/// Past logs of a test
#[async_trait]
pub trait LogHistory: Send + Sync {
    /// At most `limit` logs of `test_id`, newest first
    async fn recent(&self, test_id: &str, limit: usize) -> Result<Vec<Log>>;
}

/// Decide who is notified about `log`.
///
/// The test's own settings replace the project's. `None` means nothing is
/// configured at all. `log` must already be stored, the change rule reads it
/// back as the newest entry of the history.
pub async fn plan(
    log: &Log,
    test_notifications: Option<&Notifications>,
    project_notifications: Option<&Notifications>,
    history: &dyn LogHistory,
) -> Option<NotificationPlan> {
    let Some(settings) = test_notifications.or(project_notifications) else {
        log::info!("No notifications to be sent");
        return None;
    };

    let changed = if settings.uses_change() {
        match history.recent(&log.test_id, HISTORY_DEPTH).await {
            Ok(logs) => status_changed(&logs),
            Err(e) => {
                log::warn!("Failed to read history of {}: {:#}", log.test_id, e);
                false
            }
        }
    } else {
        false
    };

    let status = log.status;
    let recipients = settings
        .email
        .iter()
        .flat_map(|email| email.recipients.iter())
        .filter(|r| r.status.fires(status, changed))
        .map(|r| r.email.clone())
        .collect();
    let webhooks = settings
        .webhook
        .iter()
        .filter(|w| w.status.fires(status, changed))
        .map(|w| w.config.clone())
        .collect();

    Some(NotificationPlan {
        status,
        subject: settings
            .email
            .as_ref()
            .and_then(|e| e.subject.get(status.as_str()).cloned()),
        from: settings.email.as_ref().and_then(|e| e.from.clone()),
        recipients,
        webhooks,
    })
}

/// First run, or a different status than the run before
fn status_changed(newest_first: &[Log]) -> bool {
    match newest_first {
        [current, previous, ..] => current.status != previous.status,
        _ => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::types::Trigger;

    struct StaticHistory(Vec<LogStatus>);

    #[async_trait]
    impl LogHistory for StaticHistory {
        async fn recent(&self, test_id: &str, limit: usize) -> Result<Vec<Log>> {
            Ok(self
                .0
                .iter()
                .take(limit)
                .map(|status| {
                    let mut log = Log::create(test_id, Trigger::Manual);
                    log.status = *status;
                    log
                })
                .collect())
        }
    }

    struct BrokenHistory;

    #[async_trait]
    impl LogHistory for BrokenHistory {
        async fn recent(&self, _test_id: &str, _limit: usize) -> Result<Vec<Log>> {
            anyhow::bail!("history unavailable")
        }
    }

    fn finished(status: LogStatus) -> Log {
        let mut log = Log::create("t-1", Trigger::Scheduled);
        log.status = status;
        log
    }

    fn settings(yaml: &str) -> Notifications {
        serde_yaml::from_str(yaml).unwrap()
    }

    const MIXED: &str = r#"
email:
  subject:
    PASS: "Back to normal"
    FAIL: "Monitor failed"
  from: { name: Lumi, email: bot@example.test }
  recipients:
    - { email: any@example.test, status: ANY }
    - { email: fail@example.test, status: FAIL }
    - { email: change@example.test }
webhook:
  - config: { url: "https://hooks.example.test/pass" }
    status: PASS
"#;

    #[tokio::test]
    async fn test_nothing_configured() {
        let log = finished(LogStatus::Fail);
        assert!(plan(&log, None, None, &StaticHistory(vec![])).await.is_none());
    }

    #[tokio::test]
    async fn test_status_filters_and_subject() {
        let notifications = settings(MIXED);
        let history = StaticHistory(vec![LogStatus::Fail, LogStatus::Fail]);

        let plan = plan(&finished(LogStatus::Fail), Some(&notifications), None, &history)
            .await
            .unwrap();

        assert_eq!(plan.recipients, vec!["any@example.test", "fail@example.test"]);
        assert!(plan.webhooks.is_empty());
        assert_eq!(plan.subject.as_deref(), Some("Monitor failed"));
        assert_eq!(plan.from.unwrap().name, "Lumi");
    }

    #[tokio::test]
    async fn test_change_fires_on_first_run_and_on_flip() {
        let notifications = settings(MIXED);

        let first = StaticHistory(vec![LogStatus::Pass]);
        let p = plan(&finished(LogStatus::Pass), Some(&notifications), None, &first)
            .await
            .unwrap();
        assert!(p.recipients.contains(&"change@example.test".to_string()));
        assert_eq!(p.webhooks.len(), 1);

        let flipped = StaticHistory(vec![LogStatus::Pass, LogStatus::Fail]);
        let p = plan(&finished(LogStatus::Pass), Some(&notifications), None, &flipped)
            .await
            .unwrap();
        assert!(p.recipients.contains(&"change@example.test".to_string()));

        let steady = StaticHistory(vec![LogStatus::Pass, LogStatus::Pass]);
        let p = plan(&finished(LogStatus::Pass), Some(&notifications), None, &steady)
            .await
            .unwrap();
        assert_eq!(p.recipients, vec!["any@example.test"]);
    }

    #[tokio::test]
    async fn test_test_settings_override_project() {
        let project = settings("email: { recipients: [{ email: project@example.test, status: ANY }] }");
        let test = settings("email: { recipients: [{ email: test@example.test, status: ANY }] }");

        let p = plan(
            &finished(LogStatus::Pass),
            Some(&test),
            Some(&project),
            &StaticHistory(vec![]),
        )
        .await
        .unwrap();
        assert_eq!(p.recipients, vec!["test@example.test"]);

        let p = plan(&finished(LogStatus::Pass), None, Some(&project), &StaticHistory(vec![]))
            .await
            .unwrap();
        assert_eq!(p.recipients, vec!["project@example.test"]);
    }

    #[tokio::test]
    async fn test_history_failure_suppresses_change() {
        let notifications = settings(MIXED);
        let p = plan(&finished(LogStatus::Fail), Some(&notifications), None, &BrokenHistory)
            .await
            .unwrap();
        assert_eq!(p.recipients, vec!["any@example.test", "fail@example.test"]);
    }

    #[test]
    fn test_default_trigger_is_change() {
        let recipient: Recipient = serde_json::from_str(r#"{"email": "a@example.test"}"#).unwrap();
        assert_eq!(recipient.status, NotifyOn::Change);
    }
}
