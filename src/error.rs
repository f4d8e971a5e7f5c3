use std::path::PathBuf;

use thiserror::Error;

use crate::SensorKind;

#[derive(Debug, Error)]
pub enum MonitorError {
    #[error("could not parse {kind:?} payload {payload:?}")]
    Parse { kind: SensorKind, payload: String },

    #[error("could not load model {}: {reason}", .path.display())]
    Model { path: PathBuf, reason: String },

    #[error("csv export failed: {0}")]
    Csv(#[from] csv::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid broker address {0:?}, expected host:port")]
    BrokerAddress(String),
}
