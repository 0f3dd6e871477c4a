use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum BatchmarkError {
    #[error("no source document loaded")]
    MissingSource,
    #[error("recipient list is empty")]
    EmptyRecipients,
    #[error("email dispatch is enabled but no recipient has an email address")]
    MissingEmailDirectory,
    #[error("output directory {path} is not usable: {reason}")]
    OutputDirectory { path: PathBuf, reason: String },
    #[error("a batch is already running")]
    BatchAlreadyRunning,
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),
    #[error("pdf error: {0}")]
    Pdf(String),
    #[error("raster error: {0}")]
    Raster(String),
    #[error("font error: {0}")]
    Font(String),
    #[error("image error: {0}")]
    Image(#[from] image::ImageError),
    #[error("mail delivery to {address} failed: {reason}")]
    Mail { address: String, reason: String },
    #[error("settings error: {0}")]
    Settings(#[from] serde_json::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl BatchmarkError {
    /// Setup errors abort a batch before the first recipient is rendered.
    pub fn is_setup_error(&self) -> bool {
        matches!(
            self,
            BatchmarkError::MissingSource
                | BatchmarkError::EmptyRecipients
                | BatchmarkError::MissingEmailDirectory
                | BatchmarkError::OutputDirectory { .. }
                | BatchmarkError::BatchAlreadyRunning
        )
    }
}

impl From<lopdf::Error> for BatchmarkError {
    fn from(value: lopdf::Error) -> Self {
        BatchmarkError::Pdf(value.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn setup_errors_are_classified() {
        assert!(BatchmarkError::MissingSource.is_setup_error());
        assert!(BatchmarkError::EmptyRecipients.is_setup_error());
        assert!(
            BatchmarkError::OutputDirectory {
                path: PathBuf::from("/nope"),
                reason: "read-only".to_string(),
            }
            .is_setup_error()
        );
        assert!(!BatchmarkError::Raster("page 2".to_string()).is_setup_error());
        assert!(
            !BatchmarkError::Mail {
                address: "a@x.com".to_string(),
                reason: "timeout".to_string(),
            }
            .is_setup_error()
        );
    }

    #[test]
    fn display_includes_context() {
        let err = BatchmarkError::OutputDirectory {
            path: PathBuf::from("out"),
            reason: "permission denied".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "output directory out is not usable: permission denied"
        );
    }
}
