use crate::error::RouterError;
use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Validation,
    Auth,
    Transient,
    Timeout,
    Cancelled,
    /// Failure inside the daemon rather than at the provider
    Internal,
}

impl From<&RouterError> for FailureKind {
    fn from(err: &RouterError) -> Self {
        match err {
            RouterError::Validation(_) | RouterError::ProviderNotConfigured(_) => Self::Validation,
            RouterError::Auth(_) => Self::Auth,
            RouterError::Transient { .. } => Self::Transient,
            RouterError::Timeout(_) => Self::Timeout,
            RouterError::Cancelled => Self::Cancelled,
        }
    }
}

/// Lifecycle of one query.
///
/// ```text
/// Received -> ContextAssembled -> Dispatched -> Streaming -> Completed
///     \              \                \            \
///      +--------------+----------------+------------+--> Failed(kind)
/// ```
///
/// A non-streaming query goes from `Dispatched` straight to `Completed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryState {
    Received,
    ContextAssembled,
    Dispatched,
    Streaming,
    Completed,
    Failed(FailureKind),
}

impl QueryState {
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed(_))
    }

    pub const fn can_advance_to(self, next: Self) -> bool {
        match (self, next) {
            (_, Self::Failed(_)) => !self.is_terminal(),
            (Self::Received, Self::ContextAssembled)
            | (Self::ContextAssembled, Self::Dispatched)
            | (Self::Dispatched, Self::Streaming | Self::Completed)
            | (Self::Streaming, Self::Completed) => true,
            _ => false,
        }
    }
}

impl fmt::Display for QueryState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Received => f.write_str("received"),
            Self::ContextAssembled => f.write_str("context_assembled"),
            Self::Dispatched => f.write_str("dispatched"),
            Self::Streaming => f.write_str("streaming"),
            Self::Completed => f.write_str("completed"),
            Self::Failed(kind) => write!(f, "failed({kind:?})"),
        }
    }
}

/// Per-request state holder that logs every transition
#[derive(Debug)]
pub struct QueryLifecycle {
    request_id: String,
    state: QueryState,
}

impl QueryLifecycle {
    pub fn new(request_id: impl Into<String>) -> Self {
        Self {
            request_id: request_id.into(),
            state: QueryState::Received,
        }
    }

    pub const fn state(&self) -> QueryState {
        self.state
    }

    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    /// Move to `next`; illegal transitions are ignored and return `false`
    pub fn advance(&mut self, next: QueryState) -> bool {
        if !self.state.can_advance_to(next) {
            log::warn!(
                "[{}] ignoring query transition {} -> {}",
                self.request_id,
                self.state,
                next
            );
            return false;
        }
        log::debug!("[{}] query {} -> {}", self.request_id, self.state, next);
        self.state = next;
        true
    }

    pub fn fail(&mut self, err: &RouterError) -> bool {
        self.advance(QueryState::Failed(FailureKind::from(err)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn streaming_happy_path() {
        let mut lifecycle = QueryLifecycle::new("r1");
        for next in [
            QueryState::ContextAssembled,
            QueryState::Dispatched,
            QueryState::Streaming,
            QueryState::Completed,
        ] {
            assert!(lifecycle.advance(next));
        }
        assert!(lifecycle.state().is_terminal());
    }

    #[test]
    fn terminal_states_are_final() {
        let mut lifecycle = QueryLifecycle::new("r2");
        assert!(lifecycle.advance(QueryState::ContextAssembled));
        assert!(lifecycle.fail(&RouterError::Timeout(Duration::from_secs(1))));
        assert_eq!(lifecycle.state(), QueryState::Failed(FailureKind::Timeout));

        assert!(!lifecycle.advance(QueryState::Dispatched));
        assert!(!lifecycle.fail(&RouterError::Cancelled));
        assert_eq!(lifecycle.state(), QueryState::Failed(FailureKind::Timeout));
    }

    #[test]
    fn steps_cannot_be_skipped() {
        assert!(!QueryState::Received.can_advance_to(QueryState::Dispatched));
        assert!(!QueryState::Streaming.can_advance_to(QueryState::Dispatched));
        assert!(QueryState::Dispatched.can_advance_to(QueryState::Completed));
    }
}
