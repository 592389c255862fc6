use serde::{Deserialize, Serialize};

/// Consumer identity and group membership for a subscription.
///
/// A non-empty `group` selects competing-consumers delivery (each event reaches
/// exactly one member of the group). Without a group every subscriber receives
/// every event.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SubscriptionOptions {
    group: Option<String>,
    name: Option<String>,
}

impl SubscriptionOptions {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Joins the named consumer group.
    #[must_use]
    pub fn with_group(mut self, group: impl Into<String>) -> Self {
        self.group = Some(group.into());
        self
    }

    /// Names this consumer. Log-backed buses use it as the consumer identity.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// The consumer group, ignoring empty names.
    #[must_use]
    pub fn group(&self) -> Option<&str> {
        self.group.as_deref().filter(|g| !g.is_empty())
    }

    /// The consumer name, ignoring empty names.
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref().filter(|n| !n.is_empty())
    }

    #[must_use]
    pub fn is_grouped(&self) -> bool {
        self.group().is_some()
    }
}
