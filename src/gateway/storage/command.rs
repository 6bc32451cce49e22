//! File-backed command suggestion store.
//!
//! Each category is a JSON array of strings in `<dir>/<category>.json`.
//! Missing category files are seeded with defaults when the store opens.
//! A file that cannot be parsed loads as empty and is left untouched until
//! the next successful append rewrites it.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use super::traits::{CATEGORIES, CommandStore, StoreError};

const GIT_DEFAULTS: &[&str] = &[
    "git status",
    "git pull",
    "git push",
    "git commit -m \"\"",
    "git add .",
    "git checkout",
    "git branch",
    "git log",
    "git diff",
    "git clone",
];

const DOCKER_DEFAULTS: &[&str] = &[
    "docker ps",
    "docker ps -a",
    "docker images",
    "docker build -t",
    "docker run",
    "docker-compose up -d",
    "docker-compose down",
    "docker logs -f",
];

const SHELL_DEFAULTS: &[&str] = &[
    "ls", "ls -la", "cd", "pwd", "cp", "mv", "rm", "rm -rf", "mkdir", "touch", "cat", "grep",
    "echo", "chmod", "chown", "ps aux", "top", "htop", "df -h", "free -m",
];

fn defaults_for(category: &str) -> &'static [&'static str] {
    match category {
        "git" => GIT_DEFAULTS,
        "docker" => DOCKER_DEFAULTS,
        "shell" => SHELL_DEFAULTS,
        _ => &[],
    }
}

/// [`CommandStore`] keeping one JSON file per category.
///
/// Appends are serialized through a write lock so concurrent saves from
/// different connections cannot lose each other's entries.
pub struct FileCommandStore {
    dir: PathBuf,
    lock: RwLock<()>,
}

impl FileCommandStore {
    /// Open the store, creating the directory and seeding missing
    /// category files.
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir).await?;

        let store = Self {
            dir,
            lock: RwLock::new(()),
        };
        for category in CATEGORIES {
            let path = store.path_for(category);
            if !tokio::fs::try_exists(&path).await? {
                let seeded: Vec<String> =
                    defaults_for(category).iter().map(|c| c.to_string()).collect();
                write_list(&path, &seeded).await?;
                debug!("Seeded {} command suggestions", category);
            }
        }

        info!("Command store ready at {}", store.dir.display());
        Ok(store)
    }

    fn path_for(&self, category: &str) -> PathBuf {
        self.dir.join(format!("{}.json", category))
    }

    async fn read_list(&self, category: &str) -> Vec<String> {
        let path = self.path_for(category);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Vec::new(),
            Err(e) => {
                warn!("Failed to read {}: {}", path.display(), e);
                return Vec::new();
            }
        };
        serde_json::from_slice(&bytes).unwrap_or_else(|e| {
            warn!("Ignoring unreadable {}: {}", path.display(), e);
            Vec::new()
        })
    }
}

/// Write through a temporary file so readers never see a partial list.
async fn write_list(path: &Path, list: &[String]) -> Result<(), StoreError> {
    let json = serde_json::to_vec_pretty(list)?;
    let tmp = path.with_extension("json.tmp");
    tokio::fs::write(&tmp, json).await?;
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}

#[async_trait]
impl CommandStore for FileCommandStore {
    async fn load(&self, category: &str) -> Vec<String> {
        if !CATEGORIES.contains(&category) {
            return Vec::new();
        }
        let _read = self.lock.read().await;
        self.read_list(category).await
    }

    async fn append(&self, category: &str, command: &str) -> Result<bool, StoreError> {
        if !CATEGORIES.contains(&category) {
            return Err(StoreError::UnknownCategory(category.to_string()));
        }
        if command.trim().is_empty() {
            return Ok(false);
        }

        let _write = self.lock.write().await;
        let mut list = self.read_list(category).await;
        if list.iter().any(|existing| existing == command) {
            return Ok(false);
        }
        list.push(command.to_string());
        write_list(&self.path_for(category), &list).await?;
        debug!("Saved command to {}", category);
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::storage::CUSTOM_CATEGORY;

    async fn open_temp() -> (tempfile::TempDir, FileCommandStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCommandStore::open(dir.path().join("commands"))
            .await
            .unwrap();
        (dir, store)
    }

    mod seeding {
        use super::*;

        #[tokio::test]
        async fn test_defaults_seeded() {
            let (_dir, store) = open_temp().await;
            let all = store.load_all().await;
            assert_eq!(all.len(), 4);
            assert_eq!(all["git"].len(), 10);
            assert_eq!(all["docker"].len(), 8);
            assert_eq!(all["shell"].len(), 20);
            assert!(all["custom"].is_empty());
            assert_eq!(all["git"][0], "git status");
        }

        #[tokio::test]
        async fn test_existing_files_not_overwritten() {
            let dir = tempfile::tempdir().unwrap();
            tokio::fs::write(dir.path().join("git.json"), r#"["git fetch"]"#)
                .await
                .unwrap();
            let store = FileCommandStore::open(dir.path()).await.unwrap();
            assert_eq!(store.load("git").await, vec!["git fetch"]);
        }

        #[tokio::test]
        async fn test_corrupt_file_loads_empty() {
            let dir = tempfile::tempdir().unwrap();
            tokio::fs::write(dir.path().join("shell.json"), "{not json")
                .await
                .unwrap();
            let store = FileCommandStore::open(dir.path()).await.unwrap();
            assert!(store.load("shell").await.is_empty());
        }

        #[tokio::test]
        async fn test_unknown_category_loads_empty() {
            let (_dir, store) = open_temp().await;
            assert!(store.load("../etc/passwd").await.is_empty());
        }
    }

    mod append {
        use super::*;

        #[tokio::test]
        async fn test_append_is_deduplicated() {
            let (_dir, store) = open_temp().await;
            assert!(store.append(CUSTOM_CATEGORY, "uptime").await.unwrap());
            assert!(!store.append(CUSTOM_CATEGORY, "uptime").await.unwrap());
            assert_eq!(store.load(CUSTOM_CATEGORY).await, vec!["uptime"]);
        }

        #[tokio::test]
        async fn test_blank_command_ignored() {
            let (_dir, store) = open_temp().await;
            assert!(!store.append(CUSTOM_CATEGORY, "   ").await.unwrap());
            assert!(store.load(CUSTOM_CATEGORY).await.is_empty());
        }

        #[tokio::test]
        async fn test_append_persists_across_reopen() {
            let dir = tempfile::tempdir().unwrap();
            {
                let store = FileCommandStore::open(dir.path()).await.unwrap();
                store.append(CUSTOM_CATEGORY, "df -h /").await.unwrap();
            }
            let store = FileCommandStore::open(dir.path()).await.unwrap();
            assert_eq!(store.load(CUSTOM_CATEGORY).await, vec!["df -h /"]);
        }

        #[tokio::test]
        async fn test_unknown_category_rejected() {
            let (_dir, store) = open_temp().await;
            let result = store.append("secrets", "x").await;
            assert!(matches!(result, Err(StoreError::UnknownCategory(_))));
        }

        #[tokio::test]
        async fn test_concurrent_appends_all_kept() {
            let (_dir, store) = open_temp().await;
            let store = std::sync::Arc::new(store);
            let mut tasks = Vec::new();
            for i in 0..10 {
                let store = store.clone();
                tasks.push(tokio::spawn(async move {
                    store
                        .append(CUSTOM_CATEGORY, &format!("cmd {}", i))
                        .await
                        .unwrap()
                }));
            }
            for task in tasks {
                assert!(task.await.unwrap());
            }
            assert_eq!(store.load(CUSTOM_CATEGORY).await.len(), 10);
        }
    }
}
