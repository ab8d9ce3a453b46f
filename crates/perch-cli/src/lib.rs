//! Perch CLI support
//!
//! Argument parsing helpers and output formatting shared by the `perch`
//! binary.

pub mod settings;
