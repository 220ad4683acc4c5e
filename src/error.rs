use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ReadError {
    #[error("serial port error: {0}")]
    Serial(#[from] tokio_serial::Error),
    #[error("modbus transport error: {0}")]
    Transport(#[from] std::io::Error),
    #[error("probe answered {got} registers, expected {want}")]
    ShortResponse { want: usize, got: usize },
    #[error("probe read timed out after {0:?}")]
    Timeout(Duration),
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("database call timed out after {0:?}")]
    Timeout(Duration),
}

#[derive(Debug, Error)]
pub enum SpoolError {
    #[error("spool io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("spool serialization error: {0}")]
    Codec(#[from] serde_json::Error),
}
