#![forbid(unsafe_code)]

//! Building blocks for the vidshelf web front-end: runtime configuration, the
//! yt-dlp client, the batch orchestrator and the on-disk catalog.

pub mod batch;
pub mod catalog;
pub mod config;
pub mod extractor;
pub mod files;
pub mod logging;
pub mod page;
pub mod security;
