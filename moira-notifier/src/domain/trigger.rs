//! Trigger metadata carried with every notification.

use serde::{Deserialize, Serialize};

/// Metadata of the alert rule that produced the events.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TriggerData {
    pub id: String,
    pub name: String,
    /// Markdown description, possibly containing template expressions.
    #[serde(default)]
    pub desc: String,
    #[serde(default)]
    pub targets: Vec<String>,
    #[serde(rename = "warn_value", default)]
    pub warn_value: f64,
    #[serde(rename = "error_value", default)]
    pub error_value: f64,
    /// Tags in the order they were configured.
    #[serde(rename = "__notifier_trigger_tags", alias = "tags", default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub is_remote: bool,
}

impl TriggerData {
    /// Tags rendered as `[tag1][tag2]`, preserving configuration order.
    pub fn tags_string(&self) -> String {
        self.tags.iter().map(|t| format!("[{t}]")).collect()
    }

    /// Link to the trigger page on the web UI, when a front URL is configured.
    pub fn trigger_uri(&self, front_url: &str) -> Option<String> {
        let base = front_url.trim().trim_end_matches('/');
        if base.is_empty() || self.id.is_empty() {
            return None;
        }
        Some(format!("{}/trigger/{}", base, self.id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn trigger() -> TriggerData {
        TriggerData {
            id: "trigger-1".to_string(),
            name: "CPU usage".to_string(),
            tags: vec!["prod".to_string(), "web".to_string()],
            ..Default::default()
        }
    }

    #[test]
    fn test_tags_string_keeps_order() {
        assert_eq!(trigger().tags_string(), "[prod][web]");
        assert_eq!(TriggerData::default().tags_string(), "");
    }

    #[test]
    fn test_trigger_uri() {
        let t = trigger();
        assert_eq!(
            t.trigger_uri("https://moira.example.com/").as_deref(),
            Some("https://moira.example.com/trigger/trigger-1")
        );
        assert_eq!(t.trigger_uri(""), None);
    }

    #[test]
    fn test_tags_accepts_plain_alias() {
        let t: TriggerData =
            serde_json::from_str(r#"{"id":"t","name":"n","tags":["a","b"]}"#).unwrap();
        assert_eq!(t.tags, vec!["a", "b"]);
    }
}
