use thiserror::Error;

#[derive(Error, Debug)]
pub enum KakeiboError {
    #[error("Database error: {0}")]
    Db(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Corrupt ledger data: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Not saved: {0}")]
    Storage(String),

    #[error("No record with ID {0}")]
    NotFound(String),

    #[error("Record {0} already exists")]
    DuplicateId(String),

    #[error("Unknown category: {0}")]
    UnknownCategory(String),

    #[error("Unknown member: {0}")]
    UnknownMember(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Ledger schema version {0} is newer than this build supports")]
    UnsupportedSchema(u32),

    #[error("A sync is already in progress")]
    SyncInProgress,

    #[error("Settings error: {0}")]
    Settings(String),
}

pub type Result<T> = std::result::Result<T, KakeiboError>;
