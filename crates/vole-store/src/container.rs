//! External JSON representation ("containers") of users and posts.
//!
//! Single entities are wrapped under their type name, collections under the
//! plural:
//!
//! ```json
//! {"post": {"id": "...", "body": "hi", "files": [{"hash": "...", "name": "a.png", "size": 12}],
//!           "sender": "...", "recipient": null, "visibility": "public",
//!           "created_at": "2024-01-01T00:00:00Z"}}
//! {"posts": [...], "meta": {"before": "...", "limit": 20, "count": 20}}
//! ```
//!
//! Everything here is pure: no filesystem, no locks. Decoding validates the
//! payload and never fills in a malformed field with a guess.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::cafs::ContentHash;
use crate::collection::{Collection, Cursor};
use crate::error::{Result, StoreError};
use crate::models::{new_id, validate_id, File, Post, User, Visibility};

/// Wire value meaning "no recipient".
pub const NO_RECIPIENT: &str = "none";

/// Longest accepted post body, in bytes.
pub const MAX_BODY_LEN: usize = 64 * 1024;

// ---------------------------------------------------------------------------
// Wire records
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    pub hash: ContentHash,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRecord {
    #[serde(default)]
    pub id: Option<String>,
    pub name: String,
    #[serde(default)]
    pub bio: Option<String>,
    #[serde(default)]
    pub avatar_hash: Option<ContentHash>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    /// Output only; ignored when decoding.
    #[serde(default)]
    pub is_my_user: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostRecord {
    #[serde(default)]
    pub id: Option<String>,
    pub body: String,
    #[serde(default)]
    pub files: Vec<FileRecord>,
    #[serde(default)]
    pub sender: Option<String>,
    #[serde(default)]
    pub recipient: Option<String>,
    #[serde(default)]
    pub visibility: Visibility,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserContainer {
    pub user: UserRecord,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostContainer {
    pub post: PostRecord,
}

/// Pagination echoed alongside a collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Meta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub before: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<i64>,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserCollectionContainer {
    pub users: Vec<UserRecord>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostCollectionContainer {
    pub posts: Vec<PostRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<Meta>,
}

macro_rules! impl_to_json {
    ($($ty:ty),*) => {
        $(impl $ty {
            pub fn to_json(&self) -> Result<String> {
                Ok(serde_json::to_string(self)?)
            }
        })*
    };
}

impl_to_json!(
    UserContainer,
    PostContainer,
    UserCollectionContainer,
    PostCollectionContainer
);

// ---------------------------------------------------------------------------
// Users
// ---------------------------------------------------------------------------

/// Parse and validate a `{"user": {...}}` payload.
///
/// A missing id is assigned here; a missing `created_at` becomes now.
pub fn decode_user(bytes: &[u8]) -> Result<User> {
    let UserContainer { user } = serde_json::from_slice(bytes)?;

    let id = match user.id {
        Some(id) => {
            validate_id("user", &id)?;
            id
        }
        None => new_id(),
    };

    let name = user.name.trim();
    if name.is_empty() {
        return Err(StoreError::validation("user name is empty"));
    }

    Ok(User {
        id,
        name: name.to_string(),
        bio: user.bio,
        avatar_hash: user.avatar_hash,
        created_at: user.created_at.unwrap_or_else(Utc::now),
    })
}

pub fn user_record(user: &User, is_my_user: bool) -> UserRecord {
    UserRecord {
        id: Some(user.id.clone()),
        name: user.name.clone(),
        bio: user.bio.clone(),
        avatar_hash: user.avatar_hash.clone(),
        created_at: Some(user.created_at),
        is_my_user,
    }
}

impl User {
    pub fn container(&self, is_my_user: bool) -> UserContainer {
        UserContainer {
            user: user_record(self, is_my_user),
        }
    }
}

impl Collection<User> {
    /// Wire form; `my_user_id` marks the operator's record.
    pub fn container(&self, my_user_id: Option<&str>) -> UserCollectionContainer {
        UserCollectionContainer {
            users: self
                .iter()
                .map(|u| user_record(u, Some(u.id.as_str()) == my_user_id))
                .collect(),
        }
    }

    pub fn to_json(&self, my_user_id: Option<&str>) -> Result<String> {
        self.container(my_user_id).to_json()
    }
}

// ---------------------------------------------------------------------------
// Posts
// ---------------------------------------------------------------------------

/// Parse and validate a `{"post": {...}}` payload into an unsaved post
/// owned by `owner_id`.
pub fn decode_post(owner_id: &str, bytes: &[u8]) -> Result<Post> {
    let PostContainer { post } = serde_json::from_slice(bytes)?;

    let id = match post.id {
        Some(id) => {
            validate_id("post", &id)?;
            id
        }
        None => new_id(),
    };

    if post.body.len() > MAX_BODY_LEN {
        return Err(StoreError::validation(format!(
            "post body longer than {MAX_BODY_LEN} bytes"
        )));
    }
    if post.body.trim().is_empty() && post.files.is_empty() {
        return Err(StoreError::validation("post has neither body nor files"));
    }

    let files = post
        .files
        .into_iter()
        .map(|f| {
            if f.name.trim().is_empty() {
                return Err(StoreError::validation(format!("file {} has no name", f.hash)));
            }
            Ok(File {
                hash: f.hash,
                name: f.name,
                size: f.size.unwrap_or(0),
            })
        })
        .collect::<Result<Vec<_>>>()?;

    let sender_id = match post.sender {
        Some(sender) => {
            validate_id("sender", &sender)?;
            sender
        }
        None => owner_id.to_string(),
    };

    let recipient_id = match post.recipient {
        None => None,
        Some(r) if r == NO_RECIPIENT => None,
        Some(r) => {
            validate_id("recipient", &r)?;
            Some(r)
        }
    };

    Ok(Post {
        id,
        owner_id: owner_id.to_string(),
        body: post.body,
        files,
        sender_id,
        recipient_id,
        visibility: post.visibility,
        created_at: post.created_at.unwrap_or_else(Utc::now),
        seq: None,
    })
}

pub fn post_record(post: &Post) -> PostRecord {
    PostRecord {
        id: Some(post.id.clone()),
        body: post.body.clone(),
        files: post
            .files
            .iter()
            .map(|f| FileRecord {
                hash: f.hash.clone(),
                name: f.name.clone(),
                size: Some(f.size),
            })
            .collect(),
        sender: Some(post.sender_id.clone()),
        recipient: post.recipient_id.clone(),
        visibility: post.visibility,
        created_at: Some(post.created_at),
    }
}

impl Post {
    pub fn container(&self) -> PostContainer {
        PostContainer {
            post: post_record(self),
        }
    }
}

impl Collection<Post> {
    pub fn container(&self) -> PostCollectionContainer {
        let Cursor { before, limit } = self.cursor().clone();
        let meta = (before.is_some() || limit.is_some()).then(|| Meta {
            before,
            limit,
            count: self.len(),
        });

        PostCollectionContainer {
            posts: self.iter().map(post_record).collect(),
            meta,
        }
    }

    pub fn to_json(&self) -> Result<String> {
        self.container().to_json()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    fn hash() -> ContentHash {
        ContentHash::of(b"picture")
    }

    fn bytes(v: Value) -> Vec<u8> {
        serde_json::to_vec(&v).unwrap()
    }

    #[test]
    fn user_requires_name() {
        assert!(decode_user(&bytes(json!({"user": {"id": "alice"}}))).is_err());
        assert!(decode_user(&bytes(json!({"user": {"name": "   "}}))).is_err());
        assert!(decode_user(b"not json").is_err());
        // Unwrapped payloads are rejected too.
        assert!(decode_user(&bytes(json!({"name": "Alice"}))).is_err());
    }

    #[test]
    fn user_gets_generated_id() {
        let user = decode_user(&bytes(json!({"user": {"name": "Alice"}}))).unwrap();
        assert_eq!(user.name, "Alice");
        assert!(validate_id("user", &user.id).is_ok());
    }

    #[test]
    fn user_rejects_traversal_id() {
        let err = decode_user(&bytes(json!({"user": {"id": "../x", "name": "A"}}))).unwrap_err();
        assert!(matches!(err, StoreError::Validation(_)));
    }

    #[test]
    fn user_container_marks_operator() {
        let user = decode_user(&bytes(json!({"user": {"id": "alice", "name": "Alice"}}))).unwrap();
        let other = decode_user(&bytes(json!({"user": {"id": "bob", "name": "Bob"}}))).unwrap();

        let json: Value =
            serde_json::from_str(&Collection::from(vec![user, other]).to_json(Some("bob")).unwrap())
                .unwrap();
        assert_eq!(json["users"][0]["is_my_user"], json!(false));
        assert_eq!(json["users"][1]["is_my_user"], json!(true));
    }

    #[test]
    fn post_defaults_and_none_recipient() {
        let post = decode_post(
            "alice",
            &bytes(json!({"post": {"body": "hello", "recipient": "none"}})),
        )
        .unwrap();

        assert_eq!(post.owner_id, "alice");
        assert_eq!(post.sender_id, "alice");
        assert_eq!(post.recipient_id, None);
        assert_eq!(post.visibility, Visibility::Public);
        assert!(!post.is_saved());
    }

    #[test]
    fn post_rejects_malformed_input() {
        let cases = [
            json!({"post": {}}),
            json!({"post": {"body": ""}}),
            json!({"post": {"body": 5}}),
            json!({"post": {"body": "x", "visibility": "secret"}}),
            json!({"post": {"body": "x", "files": [{"hash": "abc", "name": "a"}]}}),
            json!({"post": {"body": "x", "files": [{"hash": hash(), "name": ""}]}}),
            json!({"post": {"body": "x", "files": [{"name": "a"}]}}),
            json!({"post": {"body": "x", "recipient": "a/b"}}),
        ];
        for case in cases {
            let err = decode_post("alice", &bytes(case.clone())).unwrap_err();
            assert!(matches!(err, StoreError::Validation(_)), "{case}");
        }
    }

    #[test]
    fn post_round_trip() {
        let original = decode_post(
            "alice",
            &bytes(json!({"post": {
                "body": "look at this",
                "files": [{"hash": hash(), "name": "cat.png", "size": 7}],
                "recipient": "bob",
                "visibility": "private"
            }})),
        )
        .unwrap();

        let json = original.container().to_json().unwrap();
        let decoded = decode_post("alice", json.as_bytes()).unwrap();

        assert_eq!(decoded, original);
    }

    #[test]
    fn post_collection_meta_only_when_paginated() {
        let post = decode_post("alice", &bytes(json!({"post": {"body": "x"}}))).unwrap();
        let all = Collection::from(vec![post]);

        let plain: Value = serde_json::from_str(&all.to_json().unwrap()).unwrap();
        assert!(plain.get("meta").is_none());
        assert_eq!(plain["posts"].as_array().unwrap().len(), 1);

        let paged: Value = serde_json::from_str(&all.limit(Some(0)).to_json().unwrap()).unwrap();
        assert_eq!(paged["meta"], json!({"limit": 0, "count": 0}));
    }
}
