//! User registry: known identities and the "my user" marker.
//!
//! Every operation here runs under the registry mutex, so changing the
//! operator is atomic with respect to concurrent readers.

use std::fs;

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};
use tracing::{debug, info};

use crate::cafs::ContentHash;
use crate::collection::Collection;
use crate::container;
use crate::error::{Result, StoreError};
use crate::models::{validate_id, User};
use crate::store::Store;

const USER_COLUMNS: &str = "u.id, u.name, u.bio, u.avatar_hash, u.created_at";

impl Store {
    // ------------------------------------------------------------------
    // Read
    // ------------------------------------------------------------------

    /// The local operator, or `NotFound` if none has been set yet.
    pub fn get_my_user(&self) -> Result<User> {
        self.registry()
            .query_row(
                &format!(
                    "SELECT {USER_COLUMNS}
                     FROM my_user m JOIN users u ON u.id = m.user_id
                     WHERE m.slot = 1"
                ),
                [],
                row_to_user,
            )
            .optional()?
            .ok_or_else(|| StoreError::not_found("my user"))
    }

    /// Id of the local operator, if one is set.
    pub fn my_user_id(&self) -> Result<Option<String>> {
        Ok(self
            .registry()
            .query_row("SELECT user_id FROM my_user WHERE slot = 1", [], |row| {
                row.get(0)
            })
            .optional()?)
    }

    pub fn get_user_by_id(&self, id: &str) -> Result<User> {
        self.registry()
            .query_row(
                &format!("SELECT {USER_COLUMNS} FROM users u WHERE u.id = ?1"),
                params![id],
                row_to_user,
            )
            .optional()?
            .ok_or_else(|| StoreError::not_found(format!("user {id}")))
    }

    /// All known users, the operator included, in the order they were first
    /// saved.
    pub fn get_users(&self) -> Result<Collection<User>> {
        let conn = self.registry();
        let mut stmt = conn.prepare(&format!(
            "SELECT {USER_COLUMNS} FROM users u ORDER BY u.rowid ASC"
        ))?;

        let rows = stmt.query_map([], row_to_user)?;

        let mut users = Vec::new();
        for row in rows {
            users.push(row?);
        }
        Ok(Collection::from(users))
    }

    /// The operator alone, or an empty collection when none is set.
    pub fn my_user_collection(&self) -> Result<Collection<User>> {
        match self.get_my_user() {
            Ok(user) => Ok(user.collection()),
            Err(e) if e.is_not_found() => Ok(Collection::empty()),
            Err(e) => Err(e),
        }
    }

    pub(crate) fn user_exists(&self, id: &str) -> Result<bool> {
        Ok(self
            .registry()
            .query_row("SELECT 1 FROM users WHERE id = ?1", params![id], |_| Ok(()))
            .optional()?
            .is_some())
    }

    // ------------------------------------------------------------------
    // Write
    // ------------------------------------------------------------------

    /// Parse an external `{"user": {...}}` payload into an unsaved user.
    pub fn new_user_from_container_json(&self, bytes: &[u8]) -> Result<User> {
        container::decode_user(bytes)
    }

    /// Create or update a user record and its home directory.
    ///
    /// On update the original `created_at` is kept.
    pub fn save_user(&self, user: &User) -> Result<()> {
        validate_id("user", &user.id)?;
        if user.name.trim().is_empty() {
            return Err(StoreError::validation("user name is empty"));
        }

        fs::create_dir_all(self.user_files_dir(&user.id))?;

        self.registry().execute(
            "INSERT INTO users (id, name, bio, avatar_hash, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(id) DO UPDATE SET
                 name = excluded.name,
                 bio = excluded.bio,
                 avatar_hash = excluded.avatar_hash",
            params![
                user.id,
                user.name,
                user.bio,
                user.avatar_hash.as_ref().map(ContentHash::as_str),
                user.created_at.to_rfc3339(),
            ],
        )?;

        debug!(user_id = %user.id, "saved user");
        Ok(())
    }

    /// Make `user` the local operator, replacing any previous one.
    ///
    /// The user must have been saved. The previous operator's record is left
    /// untouched.
    pub fn set_my_user(&self, user: &User) -> Result<()> {
        let mut conn = self.registry();
        let tx = conn.transaction()?;

        let exists = tx
            .query_row("SELECT 1 FROM users WHERE id = ?1", params![user.id], |_| Ok(()))
            .optional()?
            .is_some();
        if !exists {
            return Err(StoreError::not_found(format!("user {}", user.id)));
        }

        tx.execute(
            "INSERT INTO my_user (slot, user_id) VALUES (1, ?1)
             ON CONFLICT(slot) DO UPDATE SET user_id = excluded.user_id",
            params![user.id],
        )?;
        tx.commit()?;

        info!(user_id = %user.id, "my user set");
        Ok(())
    }
}

fn row_to_user(row: &rusqlite::Row<'_>) -> rusqlite::Result<User> {
    let id: String = row.get(0)?;
    let name: String = row.get(1)?;
    let bio: Option<String> = row.get(2)?;
    let avatar_str: Option<String> = row.get(3)?;
    let created_str: String = row.get(4)?;

    let avatar_hash = avatar_str
        .map(|s| ContentHash::parse(&s))
        .transpose()
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(3, rusqlite::types::Type::Text, Box::new(e))
        })?;

    let created_at: DateTime<Utc> = DateTime::parse_from_rfc3339(&created_str)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(4, rusqlite::types::Type::Text, Box::new(e))
        })?;

    Ok(User {
        id,
        name,
        bio,
        avatar_hash,
        created_at,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn test_store() -> (Store, TempDir) {
        let dir = TempDir::new().unwrap();
        let store = Store::open_at(dir.path()).unwrap();
        (store, dir)
    }

    fn user(store: &Store, id: &str, name: &str) -> User {
        let json = format!(r#"{{"user": {{"id": "{id}", "name": "{name}"}}}}"#);
        store.new_user_from_container_json(json.as_bytes()).unwrap()
    }

    #[test]
    fn save_and_get_user() {
        let (store, _dir) = test_store();
        let alice = user(&store, "alice", "Alice");
        store.save_user(&alice).unwrap();

        let loaded = store.get_user_by_id("alice").unwrap();
        assert_eq!(loaded.name, "Alice");
        assert!(store.user_files_dir("alice").is_dir());
    }

    #[test]
    fn missing_user_is_not_found() {
        let (store, _dir) = test_store();
        assert!(store.get_user_by_id("nobody").unwrap_err().is_not_found());
    }

    #[test]
    fn update_keeps_created_at() {
        let (store, _dir) = test_store();
        let mut alice = user(&store, "alice", "Alice");
        store.save_user(&alice).unwrap();
        let first = store.get_user_by_id("alice").unwrap();

        alice.name = "Alice B".to_string();
        alice.bio = Some("hello".to_string());
        alice.created_at = Utc::now() + chrono::Duration::days(1);
        store.save_user(&alice).unwrap();

        let loaded = store.get_user_by_id("alice").unwrap();
        assert_eq!(loaded.name, "Alice B");
        assert_eq!(loaded.bio.as_deref(), Some("hello"));
        assert_eq!(loaded.created_at, first.created_at);
        assert_eq!(store.get_users().unwrap().len(), 1);
    }

    #[test]
    fn users_listed_in_insertion_order() {
        let (store, _dir) = test_store();
        for (id, name) in [("zed", "Zed"), ("amy", "Amy"), ("max", "Max")] {
            store.save_user(&user(&store, id, name)).unwrap();
        }
        let ids: Vec<String> = store.get_users().unwrap().into_iter().map(|u| u.id).collect();
        assert_eq!(ids, vec!["zed", "amy", "max"]);
    }

    #[test]
    fn my_user_unset_then_set() {
        let (store, _dir) = test_store();
        assert!(store.get_my_user().unwrap_err().is_not_found());
        assert!(store.my_user_collection().unwrap().is_empty());

        let alice = user(&store, "alice", "Alice");
        store.save_user(&alice).unwrap();
        store.set_my_user(&alice).unwrap();

        assert_eq!(store.get_my_user().unwrap().id, "alice");
        assert_eq!(store.my_user_id().unwrap().as_deref(), Some("alice"));
        assert_eq!(store.my_user_collection().unwrap().len(), 1);
    }

    #[test]
    fn set_my_user_requires_saved_user() {
        let (store, _dir) = test_store();
        let ghost = user(&store, "ghost", "Ghost");
        assert!(store.set_my_user(&ghost).unwrap_err().is_not_found());
        assert!(store.get_my_user().is_err());
    }

    #[test]
    fn avatar_hash_persists() {
        let (store, _dir) = test_store();
        let mut alice = user(&store, "alice", "Alice");
        alice.avatar_hash = Some(ContentHash::of(b"face"));
        store.save_user(&alice).unwrap();

        assert_eq!(
            store.get_user_by_id("alice").unwrap().avatar_hash,
            Some(ContentHash::of(b"face"))
        );
    }
}
