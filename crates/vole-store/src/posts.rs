//! Per-user post collections.
//!
//! Saving a post is a three-step protocol run under the owner's lock:
//!
//! 1. check every referenced file is staged or already committed,
//! 2. commit the staged blobs into the owner's file directory,
//! 3. write the post and its file rows in one transaction.
//!
//! The index is written last, so a stored post never points at a file that
//! is missing from the owner's directory. If a commit fails midway, blobs
//! already moved stay in the directory unreferenced; committed files are
//! never garbage-collected.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use tracing::debug;

use crate::cafs::{ContentHash, FileStore};
use crate::collection::Collection;
use crate::container;
use crate::error::{Result, StoreError};
use crate::models::{validate_id, File, Post, User, Visibility};
use crate::store::{lock, Store};

const POST_COLUMNS: &str = "seq, id, body, sender_id, recipient_id, visibility, created_at";

impl Store {
    // ------------------------------------------------------------------
    // Read
    // ------------------------------------------------------------------

    /// All posts owned by `user`, newest first.
    ///
    /// A user who never posted gets an empty collection, not an error.
    pub fn get_posts(&self, user: &User) -> Result<Collection<Post>> {
        let index = self.owner_index(&user.id)?;
        let conn = lock(&index);
        load_posts(&conn, &user.id).map(Collection::from)
    }

    pub fn get_post(&self, user: &User, id: &str) -> Result<Post> {
        let index = self.owner_index(&user.id)?;
        let conn = lock(&index);

        let mut post = conn
            .query_row(
                &format!("SELECT {POST_COLUMNS} FROM posts WHERE id = ?1"),
                params![id],
                |row| row_to_post(row, &user.id),
            )
            .optional()?
            .ok_or_else(|| StoreError::not_found(format!("post {id}")))?;

        post.files = load_files(&conn, Some(id))?.remove(id).unwrap_or_default();
        Ok(post)
    }

    /// Every user's posts merged into one feed, newest first.
    ///
    /// Post ids are only unique per owner. When two users share an id,
    /// `before_id` on the feed resolves to the newest post with that id.
    pub fn get_all_posts(&self) -> Result<Collection<Post>> {
        let mut all = Vec::new();
        for user in self.get_users()? {
            all.extend(self.get_posts(&user)?);
        }

        all.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| a.owner_id.cmp(&b.owner_id))
                .then_with(|| b.seq.cmp(&a.seq))
        });
        Ok(Collection::from(all))
    }

    // ------------------------------------------------------------------
    // Write
    // ------------------------------------------------------------------

    /// Parse an external `{"post": {...}}` payload into an unsaved post
    /// owned by `user`.
    pub fn new_post_from_container_json(&self, user: &User, bytes: &[u8]) -> Result<Post> {
        container::decode_post(&user.id, bytes)
    }

    /// Persist `post`, committing its staged files first.
    ///
    /// On first save the post gets its creation order and timestamp; both
    /// are written back into `post`, along with each file's size. A post
    /// that already carries a creation order but has no row in its owner's
    /// index belongs to someone else (or was deleted) and is a `Conflict`.
    pub fn save_post(&self, post: &mut Post) -> Result<()> {
        validate_id("post", &post.id)?;

        let index = self.owner_index(&post.owner_id)?;
        let mut conn = lock(&index);

        let files_dir = self.user_files_dir(&post.owner_id);
        for file in &post.files {
            if !FileStore::is_committed(&file.hash, &files_dir) && !self.files().is_staged(&file.hash)
            {
                return Err(StoreError::not_found(format!("staged file {}", file.hash)));
            }
        }
        for file in &mut post.files {
            file.size = self.files().commit(&file.hash, &files_dir)?;
        }

        let tx = conn.transaction()?;

        let stored: Option<(i64, DateTime<Utc>)> = tx
            .query_row(
                "SELECT seq, created_at FROM posts WHERE id = ?1",
                params![post.id],
                |row| Ok((row.get(0)?, parse_created_at(&row.get::<_, String>(1)?, 1)?)),
            )
            .optional()?;

        let (seq, created_at) = match stored {
            Some((seq, created_at)) => {
                if post.seq.is_some_and(|s| s != seq) {
                    return Err(StoreError::Conflict(format!(
                        "post {} is stored with a different creation order",
                        post.id
                    )));
                }
                tx.execute(
                    "UPDATE posts
                     SET body = ?2, sender_id = ?3, recipient_id = ?4, visibility = ?5
                     WHERE id = ?1",
                    params![
                        post.id,
                        post.body,
                        post.sender_id,
                        post.recipient_id,
                        post.visibility.as_str(),
                    ],
                )?;
                (seq, created_at)
            }
            None if post.seq.is_some() => {
                return Err(StoreError::Conflict(format!(
                    "post {} was saved outside {}'s collection",
                    post.id, post.owner_id
                )));
            }
            None => {
                let now = Utc::now();
                tx.execute(
                    "INSERT INTO posts (id, body, sender_id, recipient_id, visibility, created_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                    params![
                        post.id,
                        post.body,
                        post.sender_id,
                        post.recipient_id,
                        post.visibility.as_str(),
                        now.to_rfc3339(),
                    ],
                )?;
                (tx.last_insert_rowid(), now)
            }
        };

        tx.execute("DELETE FROM post_files WHERE post_id = ?1", params![post.id])?;
        for (position, file) in post.files.iter().enumerate() {
            tx.execute(
                "INSERT INTO post_files (post_id, position, hash, name, size)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    post.id,
                    position as i64,
                    file.hash.as_str(),
                    file.name,
                    file.size as i64,
                ],
            )?;
        }
        tx.commit()?;

        post.seq = Some(seq);
        post.created_at = created_at;

        debug!(
            user_id = %post.owner_id,
            post_id = %post.id,
            seq,
            files = post.files.len(),
            "saved post"
        );
        Ok(())
    }

    /// Remove a post from `user`'s collection. Deleting an unknown id is a
    /// successful no-op; returns `true` if a post was removed.
    ///
    /// Referenced files stay in the user's file directory.
    pub fn delete_post(&self, user: &User, id: &str) -> Result<bool> {
        let index = self.owner_index(&user.id)?;
        let conn = lock(&index);

        let affected = conn.execute("DELETE FROM posts WHERE id = ?1", params![id])?;

        debug!(user_id = %user.id, post_id = id, deleted = affected > 0, "delete post");
        Ok(affected > 0)
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn load_posts(conn: &Connection, owner_id: &str) -> Result<Vec<Post>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {POST_COLUMNS} FROM posts ORDER BY seq DESC"
    ))?;
    let rows = stmt.query_map([], |row| row_to_post(row, owner_id))?;

    let mut posts = Vec::new();
    for row in rows {
        posts.push(row?);
    }

    let mut files = load_files(conn, None)?;
    for post in &mut posts {
        post.files = files.remove(&post.id).unwrap_or_default();
    }
    Ok(posts)
}

/// File rows grouped by post id, each group in display order.
fn load_files(conn: &Connection, post_id: Option<&str>) -> Result<HashMap<String, Vec<File>>> {
    let mut stmt = conn.prepare(
        "SELECT post_id, hash, name, size
         FROM post_files
         WHERE ?1 IS NULL OR post_id = ?1
         ORDER BY post_id, position",
    )?;
    let rows = stmt.query_map(params![post_id], |row| {
        let post_id: String = row.get(0)?;
        let hash_str: String = row.get(1)?;
        let name: String = row.get(2)?;
        let size: i64 = row.get(3)?;

        let hash = ContentHash::parse(&hash_str).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(1, rusqlite::types::Type::Text, Box::new(e))
        })?;

        Ok((
            post_id,
            File {
                hash,
                name,
                size: size.max(0) as u64,
            },
        ))
    })?;

    let mut files: HashMap<String, Vec<File>> = HashMap::new();
    for row in rows {
        let (post_id, file) = row?;
        files.entry(post_id).or_default().push(file);
    }
    Ok(files)
}

fn parse_created_at(s: &str, column: usize) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(column, rusqlite::types::Type::Text, Box::new(e))
        })
}

fn row_to_post(row: &rusqlite::Row<'_>, owner_id: &str) -> rusqlite::Result<Post> {
    let seq: i64 = row.get(0)?;
    let id: String = row.get(1)?;
    let body: String = row.get(2)?;
    let sender_id: String = row.get(3)?;
    let recipient_id: Option<String> = row.get(4)?;
    let visibility_str: String = row.get(5)?;
    let created_str: String = row.get(6)?;

    let visibility = Visibility::parse(&visibility_str).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            5,
            rusqlite::types::Type::Text,
            format!("unknown visibility {visibility_str:?}").into(),
        )
    })?;

    let created_at = parse_created_at(&created_str, 6)?;

    Ok(Post {
        id,
        owner_id: owner_id.to_string(),
        body,
        files: Vec::new(),
        sender_id,
        recipient_id,
        visibility,
        created_at,
        seq: Some(seq),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn setup() -> (Store, User, TempDir) {
        let dir = TempDir::new().unwrap();
        let store = Store::open_at(dir.path()).unwrap();
        let user = store
            .new_user_from_container_json(br#"{"user": {"id": "alice", "name": "Alice"}}"#)
            .unwrap();
        store.save_user(&user).unwrap();
        (store, user, dir)
    }

    fn post(store: &Store, user: &User, body: &str) -> Post {
        let json = serde_json::json!({"post": {"body": body}}).to_string();
        store
            .new_post_from_container_json(user, json.as_bytes())
            .unwrap()
    }

    fn post_with_file(store: &Store, user: &User, hash: &ContentHash) -> Post {
        let json = serde_json::json!({"post": {
            "body": "with file",
            "files": [{"hash": hash, "name": "notes.txt"}]
        }})
        .to_string();
        store
            .new_post_from_container_json(user, json.as_bytes())
            .unwrap()
    }

    #[test]
    fn empty_collection_for_new_user() {
        let (store, user, _dir) = setup();
        let posts = store.get_posts(&user).unwrap();
        assert!(posts.is_empty());
    }

    #[test]
    fn save_assigns_order_newest_first() {
        let (store, user, _dir) = setup();
        for body in ["one", "two", "three"] {
            let mut p = post(&store, &user, body);
            store.save_post(&mut p).unwrap();
            assert!(p.is_saved());
        }

        let bodies: Vec<String> = store
            .get_posts(&user)
            .unwrap()
            .into_iter()
            .map(|p| p.body)
            .collect();
        assert_eq!(bodies, vec!["three", "two", "one"]);
    }

    #[test]
    fn resave_updates_in_place() {
        let (store, user, _dir) = setup();
        let mut p = post(&store, &user, "draft");
        store.save_post(&mut p).unwrap();
        let (seq, created_at) = (p.seq, p.created_at);

        p.body = "final".to_string();
        store.save_post(&mut p).unwrap();

        let posts = store.get_posts(&user).unwrap();
        assert_eq!(posts.len(), 1);
        let stored = store.get_post(&user, &p.id).unwrap();
        assert_eq!(stored.body, "final");
        assert_eq!(stored.seq, seq);
        assert_eq!(stored.created_at, created_at);
    }

    #[test]
    fn mismatched_seq_is_conflict() {
        let (store, user, _dir) = setup();
        let mut p = post(&store, &user, "x");
        store.save_post(&mut p).unwrap();

        p.seq = Some(p.seq.unwrap() + 100);
        let err = store.save_post(&mut p).unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
    }

    #[test]
    fn moving_saved_post_to_other_owner_is_conflict() {
        let (store, alice, _dir) = setup();
        let bob = store
            .new_user_from_container_json(br#"{"user": {"id": "bob", "name": "Bob"}}"#)
            .unwrap();
        store.save_user(&bob).unwrap();

        let mut p = post(&store, &alice, "mine");
        store.save_post(&mut p).unwrap();

        p.owner_id = bob.id.clone();
        let err = store.save_post(&mut p).unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
        assert_eq!(store.get_posts(&alice).unwrap().len(), 1);
        assert!(store.get_posts(&bob).unwrap().is_empty());
    }

    #[test]
    fn save_commits_staged_files() {
        let (store, user, _dir) = setup();
        let staged = store.files().stage(&b"file body"[..]).unwrap();

        let mut p = post_with_file(&store, &user, &staged.hash);
        store.save_post(&mut p).unwrap();

        let files_dir = store.user_files_dir(&user.id);
        assert!(FileStore::is_committed(&staged.hash, &files_dir));
        assert!(!store.files().is_staged(&staged.hash));

        let stored = store.get_post(&user, &p.id).unwrap();
        assert_eq!(stored.files.len(), 1);
        assert_eq!(stored.files[0].name, "notes.txt");
        assert_eq!(stored.files[0].size, staged.size);
    }

    #[test]
    fn missing_file_aborts_save() {
        let (store, user, _dir) = setup();
        let mut p = post_with_file(&store, &user, &ContentHash::of(b"never uploaded"));

        let err = store.save_post(&mut p).unwrap_err();
        assert!(err.is_not_found());
        assert!(!p.is_saved());
        assert!(store.get_posts(&user).unwrap().is_empty());
    }

    #[test]
    fn delete_is_idempotent_and_keeps_files() {
        let (store, user, _dir) = setup();
        let staged = store.files().stage(&b"keep"[..]).unwrap();
        let mut p = post_with_file(&store, &user, &staged.hash);
        store.save_post(&mut p).unwrap();

        assert!(store.delete_post(&user, &p.id).unwrap());
        assert!(!store.delete_post(&user, &p.id).unwrap());
        assert!(!store.delete_post(&user, "never-existed").unwrap());

        assert!(store.get_posts(&user).unwrap().is_empty());
        assert!(store.get_post(&user, &p.id).unwrap_err().is_not_found());
        assert!(FileStore::is_committed(
            &staged.hash,
            &store.user_files_dir(&user.id)
        ));
    }

    #[test]
    fn unsaved_owner_is_not_found() {
        let (store, _user, _dir) = setup();
        let ghost = store
            .new_user_from_container_json(br#"{"user": {"id": "ghost", "name": "Ghost"}}"#)
            .unwrap();
        assert!(store.get_posts(&ghost).unwrap_err().is_not_found());
    }

    #[test]
    fn feed_merges_users_newest_first() {
        let (store, alice, _dir) = setup();
        let bob = store
            .new_user_from_container_json(br#"{"user": {"id": "bob", "name": "Bob"}}"#)
            .unwrap();
        store.save_user(&bob).unwrap();

        let mut a1 = post(&store, &alice, "a1");
        store.save_post(&mut a1).unwrap();
        let mut b1 = post(&store, &bob, "b1");
        store.save_post(&mut b1).unwrap();
        let mut a2 = post(&store, &alice, "a2");
        store.save_post(&mut a2).unwrap();

        let feed = store.get_all_posts().unwrap();
        assert_eq!(feed.len(), 3);
        for pair in feed.items().windows(2) {
            assert!(pair[0].created_at >= pair[1].created_at);
        }
        assert_eq!(feed.items()[0].body, "a2");
    }

    #[test]
    fn feed_cursor_on_shared_id_uses_newest_match() {
        let (store, alice, _dir) = setup();
        let bob = store
            .new_user_from_container_json(br#"{"user": {"id": "bob", "name": "Bob"}}"#)
            .unwrap();
        store.save_user(&bob).unwrap();

        let save = |user: &User, json: &[u8]| {
            let mut p = store.new_post_from_container_json(user, json).unwrap();
            store.save_post(&mut p).unwrap();
        };
        save(&alice, br#"{"post": {"body": "a0"}}"#);
        save(&bob, br#"{"post": {"id": "same", "body": "bob same"}}"#);
        save(&alice, br#"{"post": {"body": "a1"}}"#);
        save(&alice, br#"{"post": {"id": "same", "body": "alice same"}}"#);

        let feed = store.get_all_posts().unwrap();
        assert_eq!(feed.items()[0].body, "alice same");

        let page = feed.before_id(Some("same"));
        assert_eq!(page.len(), 3);
        assert_eq!(page.items()[0].body, "a1");
    }
}
