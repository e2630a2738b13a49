use thiserror::Error;

#[derive(Error, Debug)]
pub enum DejavuError {
    #[error("image decode error: {0}")]
    Decode(String),

    #[error("local store error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("remote store error: {0}")]
    Remote(String),
}

pub type Result<T> = std::result::Result<T, DejavuError>;
