use std::path::PathBuf;

use fieldsync_core::AccessError;

/// Errors reading legacy configuration files.
#[derive(Debug, thiserror::Error)]
pub enum LegacyError {
    #[error("line {line}: {reason}")]
    Syntax { line: usize, reason: String },

    #[error("{}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: Box<LegacyError>,
    },

    #[error("cannot read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("legacy directory {} does not exist", .0.display())]
    MissingDirectory(PathBuf),
}

impl LegacyError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        LegacyError::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn in_file(self, path: impl Into<PathBuf>) -> Self {
        LegacyError::Parse {
            path: path.into(),
            source: Box::new(self),
        }
    }
}

impl From<LegacyError> for AccessError {
    fn from(e: LegacyError) -> Self {
        let location = match &e {
            LegacyError::Parse { path, .. }
            | LegacyError::Io { path, .. }
            | LegacyError::MissingDirectory(path) => path.display().to_string(),
            LegacyError::Syntax { .. } => String::new(),
        };
        AccessError::LegacyUnavailable {
            location,
            reason: e.to_string(),
        }
    }
}
