//! Installed-games registry
//!
//! A JSON object keyed by game display name:
//!
//! ```json
//! {
//!     "MyGame": {
//!         "id": "12345",
//!         "install_date": "2024-05-01 13:37",
//!         "paths": { "lua": ["script.lua"], "st": [], "bin": [], "manifests": ["data.manifest"] },
//!         "install_type": "manual"
//!     }
//! }
//! ```
//!
//! All writes go through one [`RegistryStore`] task, and every write replaces
//! the file atomically, so concurrent jobs cannot lose each other's entries
//! and a crash cannot leave a truncated document.

use super::classify::BucketFiles;
use crate::error::{IoResultExt, PipelineError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

/// Local time, minute precision
pub const DATE_FORMAT: &str = "%Y-%m-%d %H:%M";

/// Queue depth for pending registry commands
const COMMAND_QUEUE: usize = 64;

/// How a game was installed; absent for regular downloads
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstallType {
    Manual,
}

/// One registry entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstalledGame {
    pub id: String,
    pub install_date: String,
    #[serde(default)]
    pub paths: BucketFiles,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub install_type: Option<InstallType>,
}

impl InstalledGame {
    /// New entry stamped with the current local time
    pub fn new(id: impl Into<String>, paths: BucketFiles, install_type: Option<InstallType>) -> Self {
        Self {
            id: id.into(),
            install_date: chrono::Local::now().format(DATE_FORMAT).to_string(),
            paths,
            install_type,
        }
    }
}

/// The whole registry file in memory
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RegistryDocument {
    games: BTreeMap<String, InstalledGame>,
}

impl RegistryDocument {
    /// Load strictly: a missing or blank file is empty, anything unparsable
    /// is [`PipelineError::RegistryCorrupt`].
    pub fn load(path: &Path) -> Result<Self> {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => {
                return Err(PipelineError::io(
                    format!("Failed to read registry {}", path.display()),
                    e,
                ))
            }
        };

        if content.trim().is_empty() {
            return Ok(Self::default());
        }

        serde_json::from_str(&content).map_err(|e| PipelineError::RegistryCorrupt {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    }

    /// Load for display: any problem yields an empty document
    pub fn load_lenient(path: &Path) -> Self {
        Self::load(path).unwrap_or_else(|e| {
            warn!("Treating registry as empty: {}", e);
            Self::default()
        })
    }

    /// Write the document atomically (temp file in the same directory, then
    /// rename over the old one). Indented with 4 spaces.
    pub fn save(&self, path: &Path) -> Result<()> {
        let dir = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        std::fs::create_dir_all(dir)
            .io_context(|| format!("Failed to create {}", dir.display()))?;

        let mut buf = Vec::new();
        let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
        let mut serializer = serde_json::Serializer::with_formatter(&mut buf, formatter);
        self.serialize(&mut serializer)
            .map_err(|e| PipelineError::Registry(format!("cannot serialize registry: {}", e)))?;

        let mut tmp = tempfile::NamedTempFile::new_in(dir)
            .io_context(|| format!("Failed to create temp file in {}", dir.display()))?;
        tmp.write_all(&buf)
            .io_context(|| format!("Failed to write {}", tmp.path().display()))?;
        tmp.as_file()
            .sync_all()
            .io_context(|| format!("Failed to sync {}", tmp.path().display()))?;
        tmp.persist(path)
            .map_err(|e| PipelineError::io(format!("Failed to replace {}", path.display()), e.error))?;

        debug!("Registry written: {} ({} games)", path.display(), self.len());
        Ok(())
    }

    /// Insert or overwrite; returns the previous entry
    pub fn insert(&mut self, name: impl Into<String>, game: InstalledGame) -> Option<InstalledGame> {
        self.games.insert(name.into(), game)
    }

    pub fn remove(&mut self, name: &str) -> Option<InstalledGame> {
        self.games.remove(name)
    }

    pub fn get(&self, name: &str) -> Option<&InstalledGame> {
        self.games.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &InstalledGame)> {
        self.games.iter()
    }

    pub fn len(&self) -> usize {
        self.games.len()
    }

    pub fn is_empty(&self) -> bool {
        self.games.is_empty()
    }
}

enum Command {
    Record {
        name: String,
        game: InstalledGame,
        reply: oneshot::Sender<Result<()>>,
    },
    Remove {
        name: String,
        reply: oneshot::Sender<Result<InstalledGame>>,
    },
    Snapshot {
        reply: oneshot::Sender<RegistryDocument>,
    },
}

/// Handle to the task that owns the registry file.
///
/// Cheap to clone; the task exits when the last handle is dropped.
#[derive(Debug, Clone)]
pub struct RegistryStore {
    path: Arc<PathBuf>,
    tx: mpsc::Sender<Command>,
}

impl RegistryStore {
    /// Start the writer task. Must be called inside a tokio runtime.
    pub fn spawn(path: PathBuf) -> Self {
        let path = Arc::new(path);
        let (tx, rx) = mpsc::channel(COMMAND_QUEUE);
        tokio::spawn(writer_loop(Arc::clone(&path), rx));
        Self { path, tx }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Insert or overwrite the entry for `name`
    pub async fn record(&self, name: &str, game: InstalledGame) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Record {
            name: name.to_string(),
            game,
            reply,
        })
        .await?;
        rx.await.map_err(|_| writer_gone())?
    }

    /// Remove and return the entry for `name`
    pub async fn remove(&self, name: &str) -> Result<InstalledGame> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Remove {
            name: name.to_string(),
            reply,
        })
        .await?;
        rx.await.map_err(|_| writer_gone())?
    }

    /// Current contents, ordered after every write queued before it
    pub async fn snapshot(&self) -> Result<RegistryDocument> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Snapshot { reply }).await?;
        rx.await.map_err(|_| writer_gone())
    }

    async fn send(&self, command: Command) -> Result<()> {
        self.tx.send(command).await.map_err(|_| writer_gone())
    }
}

fn writer_gone() -> PipelineError {
    PipelineError::Registry("registry writer stopped".into())
}

async fn writer_loop(path: Arc<PathBuf>, mut rx: mpsc::Receiver<Command>) {
    while let Some(command) = rx.recv().await {
        let path = Arc::clone(&path);
        match command {
            Command::Record { name, game, reply } => {
                let result = blocking(move || {
                    let mut doc = RegistryDocument::load(&path)?;
                    if doc.insert(name.clone(), game).is_some() {
                        info!("Replacing registry entry '{}'", name);
                    } else {
                        info!("Adding registry entry '{}'", name);
                    }
                    doc.save(&path)
                })
                .await;
                let _ = reply.send(result);
            }
            Command::Remove { name, reply } => {
                let result = blocking(move || {
                    let mut doc = RegistryDocument::load(&path)?;
                    let game = doc.remove(&name).ok_or_else(|| {
                        PipelineError::Registry(format!("game '{}' is not installed", name))
                    })?;
                    doc.save(&path)?;
                    info!("Removed registry entry '{}'", name);
                    Ok(game)
                })
                .await;
                let _ = reply.send(result);
            }
            Command::Snapshot { reply } => {
                let doc = blocking(move || Ok(RegistryDocument::load_lenient(&path)))
                    .await
                    .unwrap_or_default();
                let _ = reply.send(doc);
            }
        }
    }
    debug!("Registry writer stopped");
}

async fn blocking<T, F>(f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| PipelineError::Internal(format!("registry task failed: {}", e)))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::installer::Bucket;

    fn files(lua: &[&str], manifests: &[&str]) -> BucketFiles {
        let mut files = BucketFiles::default();
        for f in lua {
            files.push(Bucket::Lua, f.to_string());
        }
        for f in manifests {
            files.push(Bucket::Manifests, f.to_string());
        }
        files
    }

    #[test]
    fn test_date_format_minute_precision() {
        let game = InstalledGame::new("1", BucketFiles::default(), None);
        assert!(chrono::NaiveDateTime::parse_from_str(&game.install_date, DATE_FORMAT).is_ok());
        assert_eq!(game.install_date.len(), "2024-01-01 00:00".len());
    }

    #[test]
    fn test_document_shape() {
        let mut doc = RegistryDocument::default();
        doc.insert(
            "MyGame",
            InstalledGame {
                id: "12345".into(),
                install_date: "2024-05-01 13:37".into(),
                paths: files(&["script.lua"], &["data.manifest"]),
                install_type: None,
            },
        );
        let value = serde_json::to_value(&doc).unwrap();
        assert_eq!(
            value,
            serde_json::json!({
                "MyGame": {
                    "id": "12345",
                    "install_date": "2024-05-01 13:37",
                    "paths": {"lua": ["script.lua"], "st": [], "bin": [], "manifests": ["data.manifest"]}
                }
            })
        );
    }

    #[test]
    fn test_manual_marker_serialized() {
        let game = InstalledGame::new("7", BucketFiles::default(), Some(InstallType::Manual));
        let value = serde_json::to_value(&game).unwrap();
        assert_eq!(value["install_type"], "manual");
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("GamesStore").join("game_registry.json");
        let mut doc = RegistryDocument::default();
        let game = InstalledGame::new("620", files(&["a.lua"], &[]), None);
        doc.insert("Portal 2", game.clone());
        doc.save(&path).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains("\n    \"Portal 2\""));

        let loaded = RegistryDocument::load(&path).unwrap();
        assert_eq!(loaded.get("Portal 2"), Some(&game));
    }

    #[test]
    fn test_missing_and_blank_are_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("reg.json");
        assert!(RegistryDocument::load(&path).unwrap().is_empty());
        std::fs::write(&path, "  \n").unwrap();
        assert!(RegistryDocument::load(&path).unwrap().is_empty());
    }

    #[test]
    fn test_corrupt_document() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("reg.json");
        std::fs::write(&path, "{\"MyGame\": {\"id\": ").unwrap();
        assert!(matches!(
            RegistryDocument::load(&path),
            Err(PipelineError::RegistryCorrupt { .. })
        ));
        assert!(RegistryDocument::load_lenient(&path).is_empty());
    }

    #[tokio::test]
    async fn test_store_record_overwrites() {
        let dir = tempfile::tempdir().unwrap();
        let store = RegistryStore::spawn(dir.path().join("reg.json"));

        store
            .record("MyGame", InstalledGame::new("1", files(&["a.lua"], &[]), None))
            .await
            .unwrap();
        store
            .record("MyGame", InstalledGame::new("1", files(&["b.lua"], &[]), None))
            .await
            .unwrap();

        let doc = store.snapshot().await.unwrap();
        assert_eq!(doc.len(), 1);
        assert_eq!(doc.get("MyGame").unwrap().paths.lua, vec!["b.lua"]);
    }

    #[tokio::test]
    async fn test_store_concurrent_records_all_kept() {
        let dir = tempfile::tempdir().unwrap();
        let store = RegistryStore::spawn(dir.path().join("reg.json"));

        let mut handles = Vec::new();
        for i in 0..16 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store
                    .record(
                        &format!("Game {}", i),
                        InstalledGame::new(i.to_string(), BucketFiles::default(), None),
                    )
                    .await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let doc = RegistryDocument::load(store.path()).unwrap();
        assert_eq!(doc.len(), 16);
    }

    #[tokio::test]
    async fn test_store_refuses_to_overwrite_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("reg.json");
        std::fs::write(&path, "not json").unwrap();
        let store = RegistryStore::spawn(path.clone());

        let err = store
            .record("X", InstalledGame::new("1", BucketFiles::default(), None))
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::RegistryCorrupt { .. }));
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "not json");
    }

    #[tokio::test]
    async fn test_store_remove_unknown() {
        let dir = tempfile::tempdir().unwrap();
        let store = RegistryStore::spawn(dir.path().join("reg.json"));
        assert!(matches!(
            store.remove("nope").await,
            Err(PipelineError::Registry(_))
        ));
    }
}
