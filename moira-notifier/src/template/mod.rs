//! Template rendering with the minijinja engine.
//!
//! Used for trigger descriptions, webhook URL and body templates, and
//! delivery-check templates. Undefined variables are errors.

use minijinja::{Environment, UndefinedBehavior};
use serde::Serialize;
use serde_json::{Value, json};
use tracing::debug;

use crate::Result;
use crate::domain::{DeliveryCheckState, NotificationEvent, TriggerData};

/// Renders user supplied templates.
pub struct TemplateService {
    env: Environment<'static>,
}

impl Default for TemplateService {
    fn default() -> Self {
        Self::new()
    }
}

impl TemplateService {
    pub fn new() -> Self {
        let mut env = Environment::new();
        env.set_undefined_behavior(UndefinedBehavior::Strict);
        env.set_keep_trailing_newline(true);
        Self { env }
    }

    /// Renders a template with the given context.
    pub fn render<S: Serialize>(&self, template: &str, context: S) -> Result<String> {
        Ok(self.env.render_str(template, context)?)
    }

    /// Check that a template parses, without rendering it.
    pub fn validate(&self, template: &str) -> Result<()> {
        self.env.template_from_str(template)?;
        Ok(())
    }

    /// Expand template expressions in a trigger description.
    ///
    /// The template sees `trigger` and `events`. Descriptions without
    /// template syntax are returned unchanged.
    pub fn populate_description(
        &self,
        trigger: &TriggerData,
        events: &[NotificationEvent],
    ) -> Result<String> {
        if !has_template_syntax(&trigger.desc) {
            return Ok(trigger.desc.clone());
        }
        debug!(trigger_id = %trigger.id, "Rendering trigger description");
        self.render(
            &trigger.desc,
            json!({ "trigger": trigger, "events": events }),
        )
    }

    /// Map a decoded check response to a delivery state with a check template.
    pub fn render_check_state(&self, template: &str, response: &Value) -> Result<String> {
        let rendered = self.render(template, json!({ "response": response }))?;
        Ok(rendered.trim().to_string())
    }
}

/// Whether text contains minijinja expression or statement delimiters.
pub fn has_template_syntax(text: &str) -> bool {
    text.contains("{{") || text.contains("{%")
}

/// Parse a rendered check-template output.
///
/// Unknown literals are handed back as the error so the caller can log them.
pub fn parse_check_state(rendered: &str) -> std::result::Result<DeliveryCheckState, String> {
    let literal = rendered.trim();
    literal
        .parse::<DeliveryCheckState>()
        .map_err(|_| literal.to_string())
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::Error;
    use crate::domain::State;

    #[test]
    fn test_render_template_with_context() {
        let service = TemplateService::new();
        let result = service
            .render(
                "https://hooks.example.com/status/{{ response.id }}",
                json!({ "response": { "id": 42 } }),
            )
            .unwrap();
        assert_eq!(result, "https://hooks.example.com/status/42");
    }

    #[test]
    fn test_undefined_variable_is_an_error() {
        let service = TemplateService::new();
        let result = service.render("{{ missing.field }}", json!({}));
        assert!(matches!(result, Err(Error::Template(_))));
    }

    #[test]
    fn test_validate_rejects_broken_syntax() {
        let service = TemplateService::new();
        assert!(service.validate("{{ response.status }").is_err());
        assert!(service.validate("{% if response.ok %}OK{% else %}PENDING{% endif %}").is_ok());
    }

    #[test]
    fn test_populate_description() {
        let service = TemplateService::new();
        let trigger = TriggerData {
            id: "t1".to_string(),
            name: "CPU".to_string(),
            desc: "{{ trigger.name }} fired {{ events | length }} time(s)".to_string(),
            ..Default::default()
        };
        let events = vec![NotificationEvent {
            metric: "cpu".to_string(),
            timestamp: 0,
            state: State::Error,
            old_state: State::Ok,
            trigger_id: "t1".to_string(),
            subscription_id: None,
            values: Default::default(),
            message: None,
            is_trigger_event: false,
        }];
        assert_eq!(
            service.populate_description(&trigger, &events).unwrap(),
            "CPU fired 1 time(s)"
        );

        let plain = TriggerData {
            desc: "Check **disk** {usage}".to_string(),
            ..Default::default()
        };
        assert_eq!(
            service.populate_description(&plain, &events).unwrap(),
            "Check **disk** {usage}"
        );
    }

    #[test]
    fn test_check_state_rendering() {
        let service = TemplateService::new();
        let template = "{% if response.status == 'delivered' %}OK{% elif response.status == 'queued' %}PENDING{% else %}{{ response.status }}{% endif %}";

        let state = service
            .render_check_state(template, &json!({ "status": "delivered" }))
            .unwrap();
        assert_eq!(parse_check_state(&state), Ok(DeliveryCheckState::Ok));

        let state = service
            .render_check_state(template, &json!({ "status": "queued" }))
            .unwrap();
        assert_eq!(parse_check_state(&state), Ok(DeliveryCheckState::Pending));

        let state = service
            .render_check_state(template, &json!({ "status": "bounced" }))
            .unwrap();
        assert_eq!(parse_check_state(&state), Err("bounced".to_string()));

        assert_eq!(
            parse_check_state(" userException\n"),
            Ok(DeliveryCheckState::UserException)
        );
    }
}
