//! Common utilities and types used throughout the coherence engine.
//!
//! This module provides fundamental building blocks that are shared across all controllers.
//! It includes:
//! 1. **Identity Types:** Tile identifiers and cache-line address helpers.
//! 2. **Constants:** Wire-format widths and system limits.
//! 3. **Memory Operations:** Core operation kinds and lock signals.
//! 4. **Error Handling:** Configuration and protocol error types.

/// Tile identifiers and cache-line address arithmetic.
pub mod addr;

/// Common constants used throughout the engine.
pub mod constants;

/// Memory operation type definitions.
pub mod data;

/// Error types for configuration and protocol failures.
pub mod error;

pub use addr::{TileId, ceil_log2, floor_log2, line_address, line_offset};
pub use data::{AccessType, LockSignal, MemComponent, MemOp};
pub use error::{ConfigError, ProtocolError, ProtocolResult};
