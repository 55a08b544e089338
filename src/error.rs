use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// Neither a remote nor a local ledger location could be read.
    #[error("ledger source unavailable: {0}")]
    SourceUnavailable(String),
    /// Header or column layout differs from the fixed five-column contract.
    #[error("ledger format error: {0}")]
    Format(String),
    #[error("ledger parse error on line {line}: {msg}")]
    Parse { line: usize, msg: String },
    /// Ledger integrity violation, the append is refused.
    #[error("{0}")]
    Validation(String),
    #[error("could not persist ledger: {0}")]
    Persistence(String),
    #[error("could not render statement: {0}")]
    Render(String),
    #[error("mail delivery failed: {0}")]
    Delivery(String),
    #[error("archive upload failed: {0}")]
    Archive(String),
    #[error("authentication failed: {0}")]
    Auth(String),
}

impl Error {
    pub fn parse(line: usize, msg: impl Into<String>) -> Self {
        Error::Parse {
            line,
            msg: msg.into(),
        }
    }

    /// Secondary failures are reported to the operator but never undo a
    /// persisted row.
    pub fn is_best_effort(&self) -> bool {
        matches!(self, Error::Delivery(_) | Error::Archive(_))
    }
}
