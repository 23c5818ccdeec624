//! Core crate for the tilescale conversion pipeline.

pub mod collect;
pub mod config;
pub mod engine;
pub mod error;
pub mod extract;
pub mod ffmpeg;
pub mod logging;
pub mod media;
pub mod session;
pub mod tile;
pub mod types;
