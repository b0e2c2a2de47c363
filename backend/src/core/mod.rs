//! Core infrastructure shared by every component
//!
//! - **time**: wall-clock abstraction (system and manually-advanced clocks)
//! - **config**: tunable parameters for matching, tracking and polling

pub mod config;
pub mod time;
