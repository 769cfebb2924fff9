use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::color::ColorError;

/// Errors raised by the synchronous quantization pipeline.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum QuantizeError {
    #[error("no image data provided")]
    EmptyImage,

    #[error("pixel buffer length {len} does not match dimensions {width}x{height}")]
    DimensionMismatch { len: usize, width: u32, height: u32 },

    #[error("maxColors must be at least 1, got {0}")]
    InvalidMaxColors(usize),

    #[error("unknown quantization algorithm {0:?}, expected \"kmeans\" or \"median-cut\"")]
    UnknownAlgorithm(String),

    #[error("unable to decode image: {0}")]
    Decode(String),

    #[error("quantization was cancelled")]
    Cancelled,
}

/// Errors raised while loading or querying a filament inventory.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FilamentError {
    #[error("unknown match method {0:?}, expected \"lab-delta-e\", \"rgb-distance\" or \"hue-match\"")]
    UnknownMethod(String),

    #[error("filament {id}: {source}")]
    InvalidHex {
        id: String,
        #[source]
        source: ColorError,
    },

    #[error(transparent)]
    Color(#[from] ColorError),

    #[error("invalid filament inventory: {0}")]
    Inventory(String),
}

/// Why the isolated execution channel could not deliver a result.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChannelError {
    #[error("failed to start worker: {0}")]
    Spawn(String),

    #[error("worker terminated before replying")]
    Disconnected,
}

/// Everything a caller of the quantization service can get back instead of a result.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ServiceError {
    #[error(transparent)]
    Input(#[from] QuantizeError),

    #[error("execution channel failed: {0}")]
    Channel(#[from] ChannelError),

    #[error("quantization timed out after {}s", .0.as_secs_f64())]
    TimedOut(Duration),

    #[error("quantization service is no longer running")]
    ServiceStopped,

    #[error("worker returned an unexpected result type")]
    UnexpectedOutput,
}

/// The `{ message }` shape reported across the external boundary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub message: String,
}

impl<E: std::error::Error> From<&E> for ErrorResponse {
    fn from(e: &E) -> Self {
        Self {
            message: e.to_string(),
        }
    }
}
