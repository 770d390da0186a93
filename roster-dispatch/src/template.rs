//! Greeting templates applied to outgoing bodies.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::Channel;

/// Placeholder replaced with the recipient's name
pub const NAME_PLACEHOLDER: &str = "{name}";

/// A greeting prepended to every body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageTemplate {
    greeting: String,
}

impl Default for MessageTemplate {
    fn default() -> Self {
        Self::new("Hello {name},\n")
    }
}

impl MessageTemplate {
    pub fn new(greeting: impl Into<String>) -> Self {
        Self {
            greeting: greeting.into(),
        }
    }

    #[must_use]
    pub fn greeting(&self) -> &str {
        &self.greeting
    }

    /// Render the greeting for `name` followed by `body`.
    #[must_use]
    pub fn render(&self, name: &str, body: &str) -> String {
        let greeting = self.greeting.replace(NAME_PLACEHOLDER, name.trim());
        let mut out = String::with_capacity(greeting.len() + body.len());
        out.push_str(&greeting);
        out.push_str(body);
        out
    }
}

/// Chooses the template for a channel, falling back to the default one.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemplateService {
    #[serde(default)]
    default: MessageTemplate,

    #[serde(default)]
    overrides: BTreeMap<Channel, MessageTemplate>,
}

impl TemplateService {
    #[must_use]
    pub fn new(default: MessageTemplate) -> Self {
        Self {
            default,
            overrides: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn with_override(mut self, channel: Channel, template: MessageTemplate) -> Self {
        self.overrides.insert(channel, template);
        self
    }

    #[must_use]
    pub fn template_for(&self, channel: Channel) -> &MessageTemplate {
        self.overrides.get(&channel).unwrap_or(&self.default)
    }

    #[must_use]
    pub fn render(&self, channel: Channel, name: &str, body: &str) -> String {
        self.template_for(channel).render(name, body)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_default_greeting() {
        let template = MessageTemplate::default();
        assert_eq!(
            template.render(" Linus ", "Training is cancelled."),
            "Hello Linus,\nTraining is cancelled."
        );
    }

    #[test]
    fn test_render_is_deterministic() {
        let template = MessageTemplate::new("Hi {name}! ");
        let a = template.render("Ada", "x");
        let b = template.render("Ada", "x");
        assert_eq!(a, b);
        assert_eq!(a, "Hi Ada! x");
    }

    #[test]
    fn test_greeting_without_placeholder() {
        let template = MessageTemplate::new("Club notice: ");
        assert_eq!(template.render("Ada", "fees due"), "Club notice: fees due");
    }

    #[test]
    fn test_channel_override() {
        let service = TemplateService::default()
            .with_override(Channel::Sms, MessageTemplate::new("{name}: "));

        assert_eq!(service.render(Channel::Sms, "Ada", "hi"), "Ada: hi");
        assert_eq!(service.render(Channel::Messenger, "Ada", "hi"), "Hello Ada,\nhi");
    }

    #[test]
    fn test_deserialize_from_ron() {
        let service: TemplateService =
            ron::from_str(r#"(default: "Dear {name}, ", overrides: { sms: "{name}: " })"#).unwrap();

        assert_eq!(service.template_for(Channel::Messenger).greeting(), "Dear {name}, ");
        assert_eq!(service.render(Channel::Sms, "Bo", "ok"), "Bo: ok");
    }
}
