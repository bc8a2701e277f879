use std::io;
use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// All failure modes surfaced at the pipeline boundary. Every variant names
/// the offending input; nothing is recovered internally.
#[derive(Debug, Error)]
pub enum Error {
    #[error("failed to parse recipe `{recipe}`: {reason}")]
    RecipeParse { recipe: String, reason: String },

    #[error("shell evaluation of `{recipe}` failed: {reason}")]
    ShellEvaluation { recipe: String, reason: String },

    #[error("failed to fetch `{uri}`")]
    Fetch {
        uri: String,
        #[source]
        cause: anyhow::Error,
    },

    #[error("checksum mismatch for `{uri}`: expected {expected}, actual {actual}")]
    ChecksumMismatch {
        uri: String,
        expected: String,
        actual: String,
    },

    #[error("failed to extract `{archive}`: {reason}")]
    Extract { archive: PathBuf, reason: String },

    #[error("{phase} script exited with status {status}")]
    BuildScript { phase: String, status: u64 },

    #[error("failed to write archive member `{member}`")]
    ArchiveWrite {
        member: String,
        #[source]
        cause: io::Error,
    },

    #[error("hook `{event}` failed in module `{module}`")]
    Hook {
        event: String,
        module: String,
        #[source]
        cause: anyhow::Error,
    },

    #[error("build canceled")]
    Canceled,

    #[error(transparent)]
    Io(#[from] io::Error),
}

impl Error {
    pub fn recipe_parse(recipe: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::RecipeParse {
            recipe: recipe.into(),
            reason: reason.into(),
        }
    }

    pub fn shell_evaluation(recipe: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::ShellEvaluation {
            recipe: recipe.into(),
            reason: reason.into(),
        }
    }

    pub fn extract(archive: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Error::Extract {
            archive: archive.into(),
            reason: reason.into(),
        }
    }

    pub fn archive_write(member: impl Into<String>, cause: io::Error) -> Self {
        Error::ArchiveWrite {
            member: member.into(),
            cause,
        }
    }
}
