#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Session: {0}")]
    Session(#[from] crate::session::SessionError),
    #[error("Transaction: {0}")]
    Transaction(#[from] crate::engine::TransactionError),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
