//! Utility functions shared across kmsflip
//!
//! Common helpers that don't fit in specialized modules.

pub mod color;

pub use color::Rgb;
