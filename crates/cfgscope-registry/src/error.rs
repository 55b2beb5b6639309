//! Registry error types

use crate::registry::RegistrationKey;
use cfgscope_core::{ScopeError, SwapError};

/// Errors raised by registration and resolution
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    /// Same service type and key registered twice
    #[error("service already registered: {0}")]
    AlreadyRegistered(RegistrationKey),

    /// Nothing registered under the requested service type and key
    #[error("service not registered: {0}")]
    NotRegistered(RegistrationKey),

    /// Registered with a different configuration type than requested
    #[error("service {key} is not configured by {requested}")]
    TypeMismatch {
        /// Registration that was found
        key: RegistrationKey,
        /// Configuration type the caller asked for
        requested: &'static str,
    },

    /// Building the manager failed
    #[error("failed to build manager: {0}")]
    Construction(#[from] SwapError),

    /// Acquiring a scope failed
    #[error(transparent)]
    Scope(#[from] ScopeError),
}

impl RegistryError {
    /// Check if the error reflects a wiring mistake rather than runtime state
    #[inline]
    #[must_use]
    pub fn is_configuration_error(&self) -> bool {
        matches!(
            self,
            Self::AlreadyRegistered(_) | Self::NotRegistered(_) | Self::TypeMismatch { .. }
        )
    }
}
