use thiserror::Error;

/// Errors surfaced by the event bus.
#[derive(Debug, Error)]
pub enum BusError {
    #[error("bus is closed")]
    Closed,

    #[error("bus is full")]
    Full,

    #[error("WAL I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("WAL corrupt record: {0}")]
    Corrupt(String),
}

impl BusError {
    /// Transient errors leave the publisher free to retry on the next
    /// poll cycle; checkpoints must not advance past them.
    pub fn is_transient(&self) -> bool {
        matches!(self, BusError::Full | BusError::Io(_))
    }
}
