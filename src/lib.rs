//! Games Store - game package installer for Steam
//!
//! Downloads game packages from the store (or takes one the user already
//! has), unpacks ZIP/RAR archives and copies the plugin, stats and manifest
//! files into the Steam client's `config/` directories, keeping a registry of
//! what was installed.

pub mod archive;
pub mod catalog;
pub mod config;
pub mod downloaders;
pub mod error;
pub mod installer;
pub mod logging;
pub mod paths;
pub mod pipeline;

pub use error::{PipelineError, Result};
