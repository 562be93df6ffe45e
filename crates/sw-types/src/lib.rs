//! # sw-types
//!
//! Core types shared by the Skywalker crates: the settings store, parameter
//! values, per-member input/output records, and the result/error protocol.

pub mod errors;
pub mod records;
pub mod settings;

pub use errors::*;
pub use records::*;
pub use settings::*;
