/// Main library module for sandscan.
///
/// `common` holds shared types and I/O seams, `sandwich` the detection engine.
pub mod common;
pub mod sandwich;
