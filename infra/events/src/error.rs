use std::borrow::Cow;

type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors returned synchronously by bus operations.
///
/// Failures inside background read or dispatch loops are logged, never returned.
#[derive(Debug, thiserror::Error)]
pub enum EventBusError {
    /// Empty topic, id or type.
    #[error("Validation error{}: {message}", format_context(.context))]
    Validation { message: Cow<'static, str>, context: Option<Cow<'static, str>> },

    /// Operation on a bus that has been closed.
    #[error("eventbus is closed{}", format_context(.context))]
    Closed { context: Option<Cow<'static, str>> },

    /// `close` called on a bus that is already closed.
    #[error("eventbus is already closed{}", format_context(.context))]
    AlreadyClosed { context: Option<Cow<'static, str>> },

    #[error("Encode error{}: {source}", format_context(.context))]
    Encode { source: serde_json::Error, context: Option<Cow<'static, str>> },

    #[error("Decode error{}: {source}", format_context(.context))]
    Decode { source: serde_json::Error, context: Option<Cow<'static, str>> },

    /// The underlying broker or log rejected the call or was unreachable.
    #[error("Transport error{}: {source}", format_context(.context))]
    Transport { source: BoxError, context: Option<Cow<'static, str>> },

    /// A backend was requested that is not compiled in or is misconfigured.
    #[error("Configuration error{}: {message}", format_context(.context))]
    Configuration { message: Cow<'static, str>, context: Option<Cow<'static, str>> },
}

pub type Result<T, E = EventBusError> = std::result::Result<T, E>;

fn format_context(context: &Option<Cow<'static, str>>) -> Cow<'static, str> {
    context.as_ref().map_or(Cow::Borrowed(""), |c| Cow::Owned(format!(" ({c})")))
}

impl EventBusError {
    pub(crate) fn validation(message: impl Into<Cow<'static, str>>) -> Self {
        Self::Validation { message: message.into(), context: None }
    }

    pub(crate) const fn closed() -> Self {
        Self::Closed { context: None }
    }

    pub(crate) const fn already_closed() -> Self {
        Self::AlreadyClosed { context: None }
    }

    /// Wraps any backend failure as [`EventBusError::Transport`].
    pub fn transport(source: impl Into<BoxError>) -> Self {
        Self::Transport { source: source.into(), context: None }
    }

    pub(crate) fn cancelled() -> Self {
        Self::transport("operation cancelled")
    }

    pub fn configuration(message: impl Into<Cow<'static, str>>) -> Self {
        Self::Configuration { message: message.into(), context: None }
    }

    #[must_use]
    pub const fn is_closed(&self) -> bool {
        matches!(self, Self::Closed { .. })
    }

    #[must_use]
    pub const fn is_already_closed(&self) -> bool {
        matches!(self, Self::AlreadyClosed { .. })
    }

    #[must_use]
    pub const fn is_validation(&self) -> bool {
        matches!(self, Self::Validation { .. })
    }

    #[must_use]
    pub const fn is_transport(&self) -> bool {
        matches!(self, Self::Transport { .. })
    }

    fn with_context(mut self, value: Cow<'static, str>) -> Self {
        match &mut self {
            Self::Validation { context, .. }
            | Self::Closed { context }
            | Self::AlreadyClosed { context }
            | Self::Encode { context, .. }
            | Self::Decode { context, .. }
            | Self::Transport { context, .. }
            | Self::Configuration { context, .. } => *context = Some(value),
        }
        self
    }
}

/// Adds `.context(..)` to bus results.
pub trait EventBusErrorExt<T> {
    /// # Errors
    /// Passes the original error through with the context attached.
    fn context(self, context: impl Into<Cow<'static, str>>) -> Result<T>;
}

impl<T> EventBusErrorExt<T> for Result<T> {
    fn context(self, context: impl Into<Cow<'static, str>>) -> Self {
        self.map_err(|e| e.with_context(context.into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn closed_messages_are_stable() {
        assert_eq!(EventBusError::closed().to_string(), "eventbus is closed");
        assert_eq!(EventBusError::already_closed().to_string(), "eventbus is already closed");
    }

    #[test]
    fn context_is_rendered_in_parentheses() {
        let err: Result<()> = Err(EventBusError::validation("topic is empty"));
        let err = err.context("publish").unwrap_err();
        assert_eq!(err.to_string(), "Validation error (publish): topic is empty");
        assert!(err.is_validation());
    }

    #[test]
    fn cancelled_is_a_transport_error() {
        let err = EventBusError::cancelled();
        assert!(err.is_transport());
        assert!(err.to_string().ends_with("operation cancelled"));
    }
}
