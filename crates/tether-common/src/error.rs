use thiserror::Error;

use crate::types::ConnectionState;

/// Layout failures reported by a widget's fit operation.
///
/// The variant is the stable cause classification that gets logged when a
/// resize cycle is skipped.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LayoutError {
    #[error("widget dimensions unavailable: {0}")]
    Dimensions(String),

    #[error("render surface is detached")]
    Detached,

    #[error("layout failed: {0}")]
    Other(String),
}

impl LayoutError {
    pub fn classification(&self) -> &'static str {
        match self {
            LayoutError::Dimensions(_) => "dimensions",
            LayoutError::Detached => "detached",
            LayoutError::Other(_) => "other",
        }
    }
}

#[derive(Error, Debug)]
pub enum TetherError {
    #[error("session acquisition failed: {0}")]
    Acquisition(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("not connected")]
    NotConnected,

    #[error("invalid connection transition from {from} to {to}")]
    InvalidTransition {
        from: ConnectionState,
        to: ConnectionState,
    },

    #[error(transparent)]
    Layout(#[from] LayoutError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("operation timed out")]
    Timeout,
}

pub type Result<T> = std::result::Result<T, TetherError>;
