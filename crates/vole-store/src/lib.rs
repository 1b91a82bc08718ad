//! # vole-store
//!
//! Local storage for the Vole personal feed: user identities, short posts
//! and their file attachments.
//!
//! Uploaded files go through a content-addressed staging area ([`cafs`]) and
//! are committed into the owner's file directory when a post referencing
//! them is saved. Users live in a registry database that also records which
//! of them is the local operator ("my user"); each user's posts live in a
//! per-user SQLite index. The [`Store`] handle exposes typed operations for
//! all of it and is safe to share between threads.

pub mod cafs;
pub mod collection;
pub mod config;
pub mod container;
pub mod migrations;
pub mod models;
pub mod posts;
pub mod store;
pub mod users;

mod error;

pub use cafs::{ContentHash, FileStore, StagedBlob};
pub use collection::{Collection, Cursor};
pub use config::StoreConfig;
pub use error::{ErrorKind, Result, StoreError};
pub use models::*;
pub use store::Store;
