//! Installing game files into a Steam client
//!
//! After a package has been extracted to a scratch directory:
//! 1. Identify: derive the game's name and app id from the extracted tree
//! 2. Classify: sort files into buckets by extension
//! 3. Copy: copy each bucket into its `config/` subdirectory
//! 4. Register: record the installed files in the registry document
//!
//! Uninstalling reverses 3 and 4 using the registry entry.

pub mod classify;
pub mod registry;
pub mod uninstall;

pub use classify::{identify_game, install_files, Bucket, BucketFiles, GameIdentity};
pub use registry::{InstallType, InstalledGame, RegistryDocument, RegistryStore};
pub use uninstall::{uninstall, UninstallReport};
