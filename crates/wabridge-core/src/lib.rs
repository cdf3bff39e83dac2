//! # wabridge-core
//!
//! Core types, traits, configuration, and error handling for the wabridge gateway.

pub mod config;
pub mod error;
pub mod message;
pub mod storage;
pub mod traits;
