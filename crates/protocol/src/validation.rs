use crate::QueryRequest;
use std::path::{Component, Path};
use thiserror::Error;

/// Structural problems with a query body. Never retried.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("malformed request body: {0}")]
    Malformed(String),

    #[error("unknown provider: {0}")]
    UnknownProvider(String),

    #[error("field `{0}` must not be empty")]
    EmptyField(&'static str),

    #[error("file path must be workspace-relative: {0}")]
    InvalidPath(String),

    #[error("file is not tracked in the workspace: {0}")]
    UnknownFile(String),

    #[error("provider `{0}` is not configured")]
    ProviderNotConfigured(String),
}

impl QueryRequest {
    /// Checks that do not need workspace state.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.model.trim().is_empty() {
            return Err(ValidationError::EmptyField("model"));
        }
        if self.message.trim().is_empty() {
            return Err(ValidationError::EmptyField("message"));
        }
        for file in &self.files {
            if file.trim().is_empty() {
                return Err(ValidationError::EmptyField("files"));
            }
            let escapes = Path::new(file).components().any(|c| {
                matches!(
                    c,
                    Component::ParentDir | Component::RootDir | Component::Prefix(_)
                )
            });
            if escapes {
                return Err(ValidationError::InvalidPath(file.clone()));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ProviderKind;

    fn request() -> QueryRequest {
        QueryRequest {
            provider: ProviderKind::Anthropic,
            model: "claude".into(),
            history: vec![],
            message: "explain".into(),
            files: vec!["src/lib.rs".into()],
            stream: false,
        }
    }

    #[test]
    fn accepts_well_formed_request() {
        assert_eq!(request().validate(), Ok(()));
    }

    #[test]
    fn rejects_blank_message() {
        let mut req = request();
        req.message = "   ".into();
        assert_eq!(req.validate(), Err(ValidationError::EmptyField("message")));
    }

    #[test]
    fn rejects_escaping_paths() {
        let mut req = request();
        req.files = vec!["../secret".into()];
        assert!(matches!(req.validate(), Err(ValidationError::InvalidPath(_))));

        req.files = vec!["/etc/passwd".into()];
        assert!(matches!(req.validate(), Err(ValidationError::InvalidPath(_))));
    }
}
