/// Configuration builders and core access helpers.
pub mod harness;

/// Test doubles for the transport and DRAM seams.
pub mod mocks;
