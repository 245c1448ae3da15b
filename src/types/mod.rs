//! Shared types

pub mod error;

pub use error::{FatalCloseKind, Result, TransportError};
