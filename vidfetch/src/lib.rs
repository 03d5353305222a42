//! vidfetch library crate.
//!
//! Download jobs for short-form video platforms, driven by yt-dlp and exposed
//! over HTTP.

pub mod api;
pub mod config;
pub mod downloader;
pub mod error;
pub mod filename;
pub mod jobs;
pub mod logging;
pub mod metadata;
pub mod platform;

pub use error::{Error, Result};
