//! Sloth CLI library
//!
//! This library exposes the profile format and reporters for testing and reuse.

pub mod completions;
pub mod config;
pub mod output;
