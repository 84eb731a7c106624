//! # Effusive Common Library
//!
//! Shared code for the effusive server and client:
//! - Reference-audio catalog (SQLite)
//! - API request/response types for the local inference server
//! - Configuration and preference loading
//! - Hashing, filename and PCM16 utilities
//! - Model weight discovery

pub mod api;
pub mod audio;
pub mod config;
pub mod db;
pub mod error;
pub mod filename;
pub mod hashing;
pub mod models;
pub mod prefs;

pub use error::{Error, Result};
