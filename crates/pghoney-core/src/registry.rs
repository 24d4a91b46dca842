//! The set of usernames the decoy pretends to know.

use std::collections::HashSet;

/// Immutable username set, built once at startup and shared read-only
/// between sessions.
#[derive(Debug, Clone, Default)]
pub struct UserRegistry {
    users: HashSet<String>,
}

impl UserRegistry {
    pub fn new<I, S>(users: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            users: users.into_iter().map(Into::into).collect(),
        }
    }

    pub fn contains(&self, user: &str) -> bool {
        self.users.contains(user)
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }
}
