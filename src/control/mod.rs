pub mod service;

pub use service::{ControlService, ToggleOutcome};

use thiserror::Error;

use crate::store::{models::SeriesKey, StoreError};

#[derive(Debug, Error)]
pub enum ControlError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("series {0} is not a switchable device")]
    NotADevice(SeriesKey),

    #[error("invalid input: {0}")]
    Invalid(String),
}
