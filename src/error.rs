use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum BatonError {
    #[error("Working directory {0} isn't a directory")]
    WorkdirMissing(PathBuf),

    #[error("Submission template {0} does not exist")]
    TemplateMissing(PathBuf),

    #[error("Submission command failed with status {status:?}: {stderr}")]
    SubmissionFailed { status: Option<i32>, stderr: String },

    #[error("Submission command succeeded but printed no allocation id")]
    EmptyAllocationId,

    #[error("Lifecycle record {0} does not exist")]
    LifecycleMissing(PathBuf),

    #[error("Cannot read job descriptor {path}: {source}")]
    Descriptor {
        path: PathBuf,
        #[source]
        source: Box<BatonError>,
    },

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Failed to install signal handler: {0}")]
    Signal(#[source] std::io::Error),

    #[error("Processor error: {0}")]
    Processor(String),
}

impl BatonError {
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        BatonError::Io {
            context: context.into(),
            source,
        }
    }

    /// Process exit status for an error that reached the top-level dispatch.
    ///
    /// Contention and malformed job data never surface as errors, so every
    /// variant that does is either a broken deployment or a failed submission.
    pub fn exit_code(&self) -> u8 {
        1
    }
}

pub type Result<T> = std::result::Result<T, BatonError>;
