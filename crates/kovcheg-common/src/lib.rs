//! Common utilities for kovcheg.
//!
//! This crate provides the foundational types used across the kovcheg
//! workspace:
//!
//! - [`BinaryReader`] - Little-endian cursor over a byte slice
//! - [`BinaryWriter`] - Little-endian emitter into a growable buffer
//! - [`crc`] - IEEE CRC-32 hashing utilities

mod error;
mod reader;
mod writer;

pub mod crc;

pub use error::{Error, Result};
pub use reader::BinaryReader;
pub use writer::BinaryWriter;

/// Re-export zerocopy traits for convenience
pub use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};
