//! # wabridge-channels
//!
//! Messaging client adapters for wabridge.

pub mod whatsapp;
