//! Ordered query results with cursor pagination.
//!
//! A [`Collection`] is a value, not a live view: [`Collection::before_id`]
//! and [`Collection::limit`] consume it and return a new one, so two callers
//! can never filter each other's results.

use crate::models::{Post, User};

/// Anything that can be looked up by id inside a collection.
pub trait Keyed {
    fn key(&self) -> &str;
}

impl Keyed for User {
    fn key(&self) -> &str {
        &self.id
    }
}

impl Keyed for Post {
    fn key(&self) -> &str {
        &self.id
    }
}

/// The pagination applied to a collection, echoed back to clients.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Cursor {
    pub before: Option<String>,
    pub limit: Option<i64>,
}

/// An ordered list of users or posts. Posts are always newest first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Collection<T> {
    items: Vec<T>,
    cursor: Cursor,
}

impl<T> Default for Collection<T> {
    fn default() -> Self {
        Self {
            items: Vec::new(),
            cursor: Cursor::default(),
        }
    }
}

impl<T> From<Vec<T>> for Collection<T> {
    fn from(items: Vec<T>) -> Self {
        Self {
            items,
            cursor: Cursor::default(),
        }
    }
}

impl<T> Collection<T> {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn items(&self) -> &[T] {
        &self.items
    }

    pub fn into_items(self) -> Vec<T> {
        self.items
    }

    pub fn iter(&self) -> std::slice::Iter<'_, T> {
        self.items.iter()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn cursor(&self) -> &Cursor {
        &self.cursor
    }

    /// Keep at most `n` items, preserving order.
    ///
    /// `None` leaves the collection unbounded; `n <= 0` empties it.
    pub fn limit(mut self, n: Option<i64>) -> Self {
        if let Some(n) = n {
            let keep = usize::try_from(n).unwrap_or(0);
            self.items.truncate(keep);
            self.cursor.limit = Some(n);
        }
        self
    }
}

impl<T: Keyed> Collection<T> {
    /// Keep only the items after `id`, i.e. strictly older than it.
    ///
    /// `None` or an empty id applies no filter. An id that is not in the
    /// collection yields an empty collection.
    pub fn before_id(mut self, id: Option<&str>) -> Self {
        let Some(id) = id.filter(|id| !id.is_empty()) else {
            return self;
        };

        match self.items.iter().position(|item| item.key() == id) {
            Some(pos) => {
                self.items.drain(..=pos);
            }
            None => self.items.clear(),
        }
        self.cursor.before = Some(id.to_string());
        self
    }

    pub fn get(&self, id: &str) -> Option<&T> {
        self.items.iter().find(|item| item.key() == id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.get(id).is_some()
    }
}

impl<T> IntoIterator for Collection<T> {
    type Item = T;
    type IntoIter = std::vec::IntoIter<T>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.into_iter()
    }
}

impl<'a, T> IntoIterator for &'a Collection<T> {
    type Item = &'a T;
    type IntoIter = std::slice::Iter<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.iter()
    }
}
