//! Store handle and on-disk layout.
//!
//! ```text
//! <root>/<version>/registry.db              users + "my user" marker
//! <root>/<version>/users/<id>/posts.db      one owner's post index
//! <root>/<version>/users/<id>/files/<hash>  committed attachments
//! <staging>/<hash>                          staged uploads
//! ```
//!
//! [`Store`] is `Send + Sync`; share it behind an `Arc`. The registry has one
//! connection behind one mutex. Each owner's post index has its own
//! connection and mutex, so writers for different users never wait on each
//! other while writers for the same user are serialized.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use rusqlite::Connection;
use tracing::{debug, info};

use crate::cafs::FileStore;
use crate::config::StoreConfig;
use crate::error::{Result, StoreError};
use crate::migrations::{self, Schema};

const REGISTRY_DB: &str = "registry.db";
const POSTS_DB: &str = "posts.db";
const USERS_DIR: &str = "users";
const FILES_DIR: &str = "files";
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

pub(crate) type OwnerIndex = Arc<Mutex<Connection>>;

pub struct Store {
    config: StoreConfig,
    registry: Mutex<Connection>,
    owners: Mutex<HashMap<String, OwnerIndex>>,
    files: FileStore,
}

impl Store {
    /// Open (or create) the store described by `config`.
    pub fn open(config: StoreConfig) -> Result<Self> {
        let data_dir = config.data_dir();
        fs::create_dir_all(data_dir.join(USERS_DIR))?;

        info!(path = %data_dir.display(), "opening store");

        let registry = open_connection(&data_dir.join(REGISTRY_DB), Schema::Registry)?;
        let files = FileStore::new(config.staging_dir(), config.max_file_size)?;

        Ok(Self {
            config,
            registry: Mutex::new(registry),
            owners: Mutex::new(HashMap::new()),
            files,
        })
    }

    /// Open (or create) a store rooted at an explicit directory.
    ///
    /// Useful for tests and embedding.
    pub fn open_at(root: &Path) -> Result<Self> {
        Self::open(StoreConfig::at(root))
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// The content-addressed file store used for uploads.
    pub fn files(&self) -> &FileStore {
        &self.files
    }

    pub fn data_dir(&self) -> PathBuf {
        self.config.data_dir()
    }

    /// Home directory of a user.
    pub fn user_dir(&self, user_id: &str) -> PathBuf {
        self.data_dir().join(USERS_DIR).join(user_id)
    }

    /// Where a user's committed files live.
    pub fn user_files_dir(&self, user_id: &str) -> PathBuf {
        self.user_dir(user_id).join(FILES_DIR)
    }

    pub(crate) fn registry(&self) -> MutexGuard<'_, Connection> {
        lock(&self.registry)
    }

    /// The post index of `user_id`, opened on first use.
    ///
    /// Fails with `NotFound` for a user that was never saved.
    pub(crate) fn owner_index(&self, user_id: &str) -> Result<OwnerIndex> {
        let mut owners = lock(&self.owners);
        if let Some(index) = owners.get(user_id) {
            return Ok(Arc::clone(index));
        }

        if !self.user_exists(user_id)? {
            return Err(StoreError::not_found(format!("user {user_id}")));
        }

        let dir = self.user_dir(user_id);
        fs::create_dir_all(dir.join(FILES_DIR))?;
        let conn = open_connection(&dir.join(POSTS_DB), Schema::Posts)?;

        debug!(user_id, "opened post index");

        let index = Arc::new(Mutex::new(conn));
        owners.insert(user_id.to_string(), Arc::clone(&index));
        Ok(index)
    }
}

/// Open a connection with the recommended settings and run migrations.
fn open_connection(path: &Path, schema: Schema) -> Result<Connection> {
    let conn = Connection::open(path)?;

    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "foreign_keys", "ON")?;
    conn.busy_timeout(BUSY_TIMEOUT)?;

    migrations::run_migrations(&conn, schema)?;

    Ok(conn)
}

// A panic while holding a connection rolls back its open transaction on
// drop, so the connection itself stays usable.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
