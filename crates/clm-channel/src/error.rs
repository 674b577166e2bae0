use clm_domain::QueueError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ChannelError {
    #[error(transparent)]
    UnknownChannel(#[from] QueueError),

    /// A VCS subprocess exited non-zero or failed to spawn. The command output
    /// is captured so the caller's logger can surface it; the message itself
    /// stays opaque, matching the original's "surface as opaque error" policy.
    #[error("git {command} failed: {output}")]
    Repository { command: String, output: String },

    /// VCS output or a repository URL couldn't be parsed into the shape this
    /// component expects. Fatal to the affected operation.
    #[error("malformed input: {0}")]
    Malformed(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
