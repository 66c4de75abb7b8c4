//! End-to-end dispatch through real senders against mock HTTP endpoints.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use serde_json::json;
use tokio_util::task::TaskTracker;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use moira_notifier::config::{NotifierConfig, SenderSettings};
use moira_notifier::domain::{
    ContactData, NotificationEvent, NotificationPackage, ScheduleData, State, SubscriptionData,
    TriggerData,
};
use moira_notifier::metrics::NotifierMetrics;
use moira_notifier::notifier::Notifier;
use moira_notifier::plotting::NoopPlotter;
use moira_notifier::store::InMemoryStore;

fn event(subscription_id: &str) -> NotificationEvent {
    NotificationEvent {
        metric: "web01.cpu.load".to_string(),
        timestamp: Utc::now().timestamp(),
        state: State::Error,
        old_state: State::Ok,
        trigger_id: "trigger-1".to_string(),
        subscription_id: Some(subscription_id.to_string()),
        values: BTreeMap::from([("t1".to_string(), 97.5)]),
        message: None,
        is_trigger_event: false,
    }
}

fn package(server: &MockServer, fail_count: u32) -> NotificationPackage {
    NotificationPackage {
        events: vec![event("sub-1")],
        trigger: TriggerData {
            id: "trigger-1".to_string(),
            name: "CPU usage".to_string(),
            desc: "Load on {{ trigger.name }}".to_string(),
            tags: vec!["prod".to_string()],
            ..Default::default()
        },
        contact: ContactData {
            id: "contact-1".to_string(),
            contact_type: "webhook".to_string(),
            value: format!("{}/hook", server.uri()),
            user: Some("alice".to_string()),
            team: None,
        },
        plotting: Default::default(),
        fail_count,
        throttled: false,
        dont_resend: false,
    }
}

fn webhook_settings(check: serde_json::Value) -> SenderSettings {
    SenderSettings::new("webhook")
        .with_option("url", "{{ contact.value }}")
        .with_option("delivery_check", check)
}

fn setup(settings: SenderSettings) -> (Notifier, Arc<InMemoryStore>, Arc<NotifierMetrics>) {
    let store = Arc::new(InMemoryStore::new());
    store.insert_subscription(SubscriptionData {
        id: "sub-1".to_string(),
        contacts: vec!["contact-1".to_string()],
        schedule: ScheduleData::always(),
        enabled: true,
        ..Default::default()
    });
    store.insert_contact(ContactData {
        id: "contact-1".to_string(),
        contact_type: "webhook".to_string(),
        ..Default::default()
    });
    let metrics = Arc::new(NotifierMetrics::new());
    let config = NotifierConfig {
        senders: vec![settings],
        store_retry_delay_ms: 1,
        ..Default::default()
    };
    let notifier = Notifier::new(config, store.clone(), metrics.clone(), Arc::new(NoopPlotter)).unwrap();
    notifier.register_senders().unwrap();
    (notifier, store, metrics)
}

async fn deliver(notifier: &Notifier, pkg: NotificationPackage) {
    let tracker = TaskTracker::new();
    notifier.send(pkg, &tracker);
    tracker.close();
    tracker.wait().await;
    notifier.stop_senders().await;
}

#[tokio::test]
async fn test_webhook_delivery_is_confirmed() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/hook"))
        .and(body_partial_json(json!({
            "trigger": { "id": "trigger-1", "description": "Load on CPU usage" },
            "contact": { "id": "contact-1", "type": "webhook" },
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": "msg-7" })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/status/msg-7"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "state": "delivered" })))
        .expect(1)
        .mount(&server)
        .await;

    let (notifier, store, metrics) = setup(webhook_settings(json!({
        "enabled": true,
        "url_template": format!("{}/status/{{{{ response.id }}}}", server.uri()),
        "check_template": r#"{% if response.state == "delivered" %}OK{% else %}PENDING{% endif %}"#,
    })));
    let controllers = notifier.delivery_controllers().unwrap();

    deliver(&notifier, package(&server, 0)).await;
    assert_eq!(metrics.sends_ok("webhook"), 1);
    assert_eq!(store.delivery_checks_len("webhook"), 1);

    let summary = controllers[0]
        .check_tick(Utc::now().timestamp() + 1)
        .await
        .unwrap();
    assert_eq!(summary.delivered, 1);
    assert_eq!(metrics.delivery_ok("webhook"), 1);
    assert_eq!(store.delivery_checks_len("webhook"), 0);
}

#[tokio::test]
async fn test_failed_webhook_is_rescheduled_a_minute_later() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/hook"))
        .respond_with(ResponseTemplate::new(502))
        .mount(&server)
        .await;

    let (notifier, store, metrics) = setup(webhook_settings(json!({})));
    let before = Utc::now().timestamp();
    deliver(&notifier, package(&server, 0)).await;

    assert_eq!(metrics.sends_failed("webhook"), 1);
    assert_eq!(metrics.sending_failed(), 1);
    let scheduled = store.scheduled_notifications();
    assert_eq!(scheduled.len(), 1);
    assert_eq!(scheduled[0].send_fail, 1);
    assert!(scheduled[0].timestamp >= before + 60);
    assert_eq!(scheduled[0].trigger.desc, "Load on {{ trigger.name }}");
    assert_eq!(store.delivery_checks_len("webhook"), 0);
}

#[tokio::test]
async fn test_gone_webhook_is_not_rescheduled() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/hook"))
        .respond_with(ResponseTemplate::new(410))
        .expect(1)
        .mount(&server)
        .await;

    let (notifier, store, metrics) = setup(webhook_settings(json!({})));
    deliver(&notifier, package(&server, 0)).await;

    assert_eq!(metrics.sends_ok("webhook"), 0);
    assert_eq!(metrics.sending_failed(), 0);
    assert!(store.scheduled_notifications().is_empty());
}

#[tokio::test]
async fn test_retry_for_removed_contact_is_dropped() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let (notifier, store, metrics) = setup(webhook_settings(json!({})));
    store.remove_contact("contact-1");
    deliver(&notifier, package(&server, 2)).await;

    assert_eq!(metrics.sends_ok("webhook"), 0);
    assert!(store.scheduled_notifications().is_empty());
}
