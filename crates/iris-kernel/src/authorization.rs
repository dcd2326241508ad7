//! [`AuthorizationGate`] – one-way camera permission state.
//!
//! The platform reports permission once per process run.  The gate accepts
//! exactly one transition out of `Undetermined`.  Any later report that
//! disagrees is ignored with a warning, so a denial stays terminal for the
//! session.

use iris_types::{AuthorizationState, ConfigError};
use tracing::warn;

/// Holds the session's [`AuthorizationState`].
///
/// # Example
///
/// ```
/// use iris_kernel::authorization::AuthorizationGate;
/// use iris_types::AuthorizationState;
///
/// let mut gate = AuthorizationGate::new();
/// assert!(gate.check().is_err());
///
/// gate.resolve(AuthorizationState::Authorized);
/// assert!(gate.check().is_ok());
///
/// // Terminal: a later denial is ignored.
/// gate.resolve(AuthorizationState::Denied);
/// assert_eq!(gate.state(), AuthorizationState::Authorized);
/// ```
#[derive(Debug, Default)]
pub struct AuthorizationGate {
    state: AuthorizationState,
}

impl AuthorizationGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> AuthorizationState {
        self.state
    }

    /// Apply the platform's answer and return the resulting state.
    ///
    /// Re-reporting the current state is a no-op.  Illegal transitions are
    /// ignored.
    pub fn resolve(&mut self, reported: AuthorizationState) -> AuthorizationState {
        if reported == self.state {
            return self.state;
        }
        if self.state.can_transition_to(reported) {
            self.state = reported;
        } else {
            warn!(
                current = ?self.state,
                reported = ?reported,
                "ignoring authorization change after it was settled"
            );
        }
        self.state
    }

    /// Return `Ok(())` when camera access was granted, or
    /// [`ConfigError::NotAuthorized`] otherwise.
    pub fn check(&self) -> Result<(), ConfigError> {
        match self.state {
            AuthorizationState::Authorized => Ok(()),
            other => Err(ConfigError::NotAuthorized(other)),
        }
    }
}
