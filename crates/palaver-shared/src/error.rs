use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SharedError {
    #[error("Unknown {kind}: {value}")]
    UnknownVariant { kind: &'static str, value: String },

    #[error("Invalid id: {0}")]
    InvalidId(#[from] uuid::Error),

    #[error("Invalid channel name: {0}")]
    InvalidChannel(String),
}
