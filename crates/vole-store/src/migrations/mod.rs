//! Database migration runner.
//!
//! The store keeps two kinds of SQLite database: one registry of users and
//! one post index per user. Each has its own ordered migration list, applied
//! on open and guarded by the `user_version` pragma so every step runs
//! exactly once.

pub mod v001_posts;
pub mod v001_registry;

use rusqlite::Connection;

use crate::error::{Result, StoreError};

type Step = fn(&Connection) -> std::result::Result<(), rusqlite::Error>;

const REGISTRY_STEPS: &[(&str, Step)] = &[("v001_registry", v001_registry::up)];
const POSTS_STEPS: &[(&str, Step)] = &[("v001_posts", v001_posts::up)];

/// Which database a connection belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Schema {
    /// `<data>/registry.db`: users and the "my user" marker.
    Registry,
    /// `<data>/users/<id>/posts.db`: one owner's posts.
    Posts,
}

impl Schema {
    fn steps(self) -> &'static [(&'static str, Step)] {
        match self {
            Schema::Registry => REGISTRY_STEPS,
            Schema::Posts => POSTS_STEPS,
        }
    }

    /// Latest version for this schema.
    pub fn current_version(self) -> u32 {
        self.steps().len() as u32
    }
}

/// Run all pending migrations for `schema` against the open connection.
pub fn run_migrations(conn: &Connection, schema: Schema) -> Result<()> {
    let current: u32 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;
    let target = schema.current_version();

    tracing::debug!(
        ?schema,
        current_version = current,
        target_version = target,
        "checking database migrations"
    );

    if current > target {
        return Err(StoreError::Migration(format!(
            "{schema:?} database is at version {current}, newer than supported {target}"
        )));
    }

    for (index, (name, up)) in schema.steps().iter().enumerate().skip(current as usize) {
        tracing::info!(migration = *name, "applying migration");
        up(conn).map_err(|e| StoreError::Migration(format!("{name}: {e}")))?;
        conn.pragma_update(None, "user_version", index as u32 + 1)?;
    }

    Ok(())
}
