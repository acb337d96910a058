//! Resolution state machine

use serde::Serialize;
use std::fmt;

/// Lifecycle of one fact resolution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResolutionState {
    Pending,
    Validating,
    ResolvingDependencies,
    Executing,
    Cached,
    Done,
    Error,
}

impl ResolutionState {
    /// Every state, in lifecycle order
    pub const ALL: [Self; 7] = [
        Self::Pending,
        Self::Validating,
        Self::ResolvingDependencies,
        Self::Executing,
        Self::Cached,
        Self::Done,
        Self::Error,
    ];

    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Error)
    }
}

impl fmt::Display for ResolutionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Pending => "PENDING",
            Self::Validating => "VALIDATING",
            Self::ResolvingDependencies => "RESOLVING_DEPENDENCIES",
            Self::Executing => "EXECUTING",
            Self::Cached => "CACHED",
            Self::Done => "DONE",
            Self::Error => "ERROR",
        };
        f.write_str(name)
    }
}

/// Rejected transition
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum StateError {
    #[error("illegal resolution transition {from} -> {to}")]
    IllegalTransition {
        from: ResolutionState,
        to: ResolutionState,
    },
}

/// States reachable from `from` in one step
#[must_use]
pub fn allowed_transitions(from: ResolutionState) -> &'static [ResolutionState] {
    use ResolutionState::{Cached, Done, Error, Executing, Pending, ResolvingDependencies, Validating};
    match from {
        // a cache hit skips straight to DONE
        Pending => &[Validating, Done, Error],
        Validating => &[ResolvingDependencies, Error],
        ResolvingDependencies => &[Executing, Error],
        Executing => &[Cached, Error],
        Cached => &[Done, Error],
        Done | Error => &[],
    }
}

/// Check one transition against the table
///
/// Panics instead of returning an error with the `strict-debug` feature.
///
/// # Errors
/// [`StateError::IllegalTransition`] when `to` is not reachable from `from`.
pub fn validate_transition(from: ResolutionState, to: ResolutionState) -> Result<(), StateError> {
    if allowed_transitions(from).contains(&to) {
        return Ok(());
    }
    #[cfg(feature = "strict-debug")]
    panic!("illegal resolution transition {from} -> {to}");

    #[cfg(not(feature = "strict-debug"))]
    Err(StateError::IllegalTransition { from, to })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ResolutionState::*;

    #[test]
    fn happy_path_is_legal() {
        let path = [Pending, Validating, ResolvingDependencies, Executing, Cached, Done];
        for pair in path.windows(2) {
            validate_transition(pair[0], pair[1]).unwrap();
        }
        validate_transition(Pending, Done).unwrap();
    }

    #[test]
    fn error_reachable_from_every_non_terminal() {
        for s in ResolutionState::ALL.into_iter().filter(|s| !s.is_terminal()) {
            assert!(allowed_transitions(s).contains(&Error), "{s}");
        }
    }

    #[cfg(not(feature = "strict-debug"))]
    #[test]
    fn terminal_states_are_final() {
        assert_eq!(
            validate_transition(Done, Pending),
            Err(StateError::IllegalTransition { from: Done, to: Pending })
        );
        assert!(validate_transition(Error, Executing).is_err());
        assert!(validate_transition(Validating, Executing).is_err());
    }
}
