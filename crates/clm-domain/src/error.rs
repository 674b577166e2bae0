use thiserror::Error;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("unknown channel: {0}")]
    UnknownChannel(String),
}
