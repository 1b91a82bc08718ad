//! Domain model structs persisted by the store.
//!
//! These are the internal shapes. The wire shapes handed to the HTTP layer
//! live in [`crate::container`] so that either side can change independently.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::cafs::ContentHash;
use crate::collection::Collection;
use crate::error::{Result, StoreError};

/// Longest accepted user or post id.
pub const MAX_ID_LEN: usize = 64;

/// Check that an id is usable as a path component and a database key.
pub fn validate_id(kind: &str, id: &str) -> Result<()> {
    if id.is_empty() {
        return Err(StoreError::validation(format!("{kind} id is empty")));
    }
    if id.len() > MAX_ID_LEN {
        return Err(StoreError::validation(format!(
            "{kind} id longer than {MAX_ID_LEN} characters"
        )));
    }
    if !id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(StoreError::validation(format!(
            "{kind} id contains invalid characters: {id:?}"
        )));
    }
    Ok(())
}

pub(crate) fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

// ---------------------------------------------------------------------------
// User
// ---------------------------------------------------------------------------

/// A known user identity. One of them may be the local operator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub id: String,
    /// Human-readable display name.
    pub name: String,
    pub bio: Option<String>,
    /// Content hash of the avatar image in this user's file directory.
    pub avatar_hash: Option<ContentHash>,
    /// When this user was first saved locally.
    pub created_at: DateTime<Utc>,
}

impl User {
    /// A single-user collection.
    pub fn collection(&self) -> Collection<User> {
        Collection::from(vec![self.clone()])
    }
}

// ---------------------------------------------------------------------------
// Post
// ---------------------------------------------------------------------------

/// Who may see a post.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    #[default]
    Public,
    Private,
}

impl Visibility {
    pub fn as_str(&self) -> &'static str {
        match self {
            Visibility::Public => "public",
            Visibility::Private => "private",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "public" => Some(Visibility::Public),
            "private" => Some(Visibility::Private),
            _ => None,
        }
    }
}

/// A short-form post owned by exactly one user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Post {
    /// Unique within the owner's collection.
    pub id: String,
    /// Id of the owning user.
    pub owner_id: String,
    pub body: String,
    /// Attachments, in display order.
    pub files: Vec<File>,
    pub sender_id: String,
    /// `None` for posts addressed to nobody in particular.
    pub recipient_id: Option<String>,
    pub visibility: Visibility,
    pub created_at: DateTime<Utc>,
    /// Per-owner creation order. `None` until the post is first saved.
    pub seq: Option<i64>,
}

impl Post {
    pub fn is_saved(&self) -> bool {
        self.seq.is_some()
    }

    /// A single-post collection.
    pub fn collection(&self) -> Collection<Post> {
        Collection::from(vec![self.clone()])
    }
}

// ---------------------------------------------------------------------------
// File
// ---------------------------------------------------------------------------

/// A file attachment, identified by its content hash.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct File {
    pub hash: ContentHash,
    /// Original file name, for display only.
    pub name: String,
    /// Size in bytes. Zero until resolved from the blob on save.
    pub size: u64,
}
