use thiserror::Error;

/// Error taxonomy for the panel
#[derive(Debug, Error)]
pub enum PanelError {
    /// A credential or config document write failed; prior state stays authoritative
    #[error("Persistence failure: {0}")]
    PersistenceFailure(String),

    /// The engine's control surface could not be reached for a live reload
    #[error("Engine unreachable: {0}")]
    EngineUnreachable(String),

    /// Both the live reload and the restart fallback failed
    #[error("Reload failed: live reload: {live}; restart: {restart}")]
    ReloadFailure { live: String, restart: String },

    /// No credential set has been generated yet
    #[error("Configuration incomplete: {0}")]
    ConfigurationIncomplete(String),

    /// No server address configured; links carry a placeholder host
    #[error("Server address unresolved, using placeholder {placeholder}")]
    AddressUnresolved { placeholder: String },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Result type for panel operations
pub type Result<T, E = PanelError> = std::result::Result<T, E>;

impl PanelError {
    pub fn persistence(msg: impl Into<String>) -> Self {
        Self::PersistenceFailure(msg.into())
    }

    pub fn unreachable(msg: impl Into<String>) -> Self {
        Self::EngineUnreachable(msg.into())
    }

    pub fn incomplete(msg: impl Into<String>) -> Self {
        Self::ConfigurationIncomplete(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization(msg.into())
    }

    /// Warning-level conditions that still produce a usable result
    pub fn is_warning(&self) -> bool {
        matches!(self, Self::AddressUnresolved { .. })
    }
}

impl From<crate::DomainError> for PanelError {
    fn from(err: crate::DomainError) -> Self {
        Self::InvalidInput(err.to_string())
    }
}

impl From<serde_json::Error> for PanelError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::DomainError;

    fn parse_port(s: &str) -> Result<u16> {
        s.parse::<u16>()
            .map_err(|e| PanelError::invalid(e.to_string()))
    }

    fn non_empty(s: &str) -> Result<&str, DomainError> {
        if s.is_empty() {
            Err(DomainError::EmptyName)
        } else {
            Ok(s)
        }
    }

    #[test]
    fn test_result_alias_takes_an_optional_error_type() {
        assert_eq!(parse_port("443").unwrap(), 443);
        assert!(matches!(parse_port("x"), Err(PanelError::InvalidInput(_))));
        assert_eq!(non_empty(""), Err(DomainError::EmptyName));
    }

    #[test]
    fn test_domain_errors_become_invalid_input() {
        let err: PanelError = DomainError::EmptyName.into();
        assert!(matches!(err, PanelError::InvalidInput(_)));
        assert!(!err.is_warning());
        assert!(PanelError::AddressUnresolved {
            placeholder: "your-server-ip".into()
        }
        .is_warning());
    }
}
