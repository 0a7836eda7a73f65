//! Global Protocol Constants.
//!
//! This module defines system-wide constants used across the coherence engine. It includes:
//! 1. **Wire Format:** Bit widths used when computing the modeled length of a message.
//! 2. **Limits:** Upper bounds on tiles and sharer-set sizes.

/// Bits used to encode the message kind on the simulated interconnect.
pub const MSG_TYPE_BITS: u32 = 4;

/// Bits used to encode a physical address on the simulated interconnect.
pub const PHYSICAL_ADDRESS_BITS: u32 = 48;

/// Largest supported tile count; bounds the full-map sharer bit vector.
pub const MAX_TILES: usize = 1024;

/// Size in bytes of the fixed part of an encoded `ShmemMsg` (everything but the payload).
pub const WIRE_HEADER_BYTES: usize = 1 + 1 + 1 + 8 + 4 + 4 + 1 + 1 + 4;
