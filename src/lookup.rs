//! Lookup collaborators
//!
//! The ledger validates party and project references against external
//! directory services. Those services are not part of this crate; the core
//! logic depends only on the narrow [`UserDirectory`] and [`ProjectCatalog`]
//! traits and operates on opaque string ids.
//!
//! In-memory implementations are provided for tests and for single-node
//! deployments where the marketplace directory is seeded at startup.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// A resolved user reference
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserRecord {
    /// Opaque user id as known by the marketplace
    pub id: String,
    /// Name suitable for display on invoices
    pub display_name: String,
    /// Contact address, when the directory exposes one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

/// A resolved project reference
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectRecord {
    /// Opaque project id
    pub id: String,
    /// Project title for display
    pub title: String,
}

/// User existence/lookup collaborator
#[async_trait]
pub trait UserDirectory: Send + Sync {
    /// Resolve a user by id. `Ok(None)` means the user does not exist.
    async fn find_by_id(&self, id: &str) -> Result<Option<UserRecord>>;
}

/// Project existence/lookup collaborator
#[async_trait]
pub trait ProjectCatalog: Send + Sync {
    /// Resolve a project by id. `Ok(None)` means the project does not exist.
    async fn find_by_id(&self, id: &str) -> Result<Option<ProjectRecord>>;
}

/// In-memory user directory
#[derive(Debug, Default)]
pub struct InMemoryUserDirectory {
    users: RwLock<HashMap<String, UserRecord>>,
}

impl InMemoryUserDirectory {
    /// Create an empty directory
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a user record
    pub fn insert(&self, record: UserRecord) {
        self.users.write().insert(record.id.clone(), record);
    }

    /// Seed a user with a display name equal to its id
    pub fn seed(&self, id: impl Into<String>) {
        let id = id.into();
        self.insert(UserRecord {
            id: id.clone(),
            display_name: id,
            email: None,
        });
    }
}

#[async_trait]
impl UserDirectory for InMemoryUserDirectory {
    async fn find_by_id(&self, id: &str) -> Result<Option<UserRecord>> {
        Ok(self.users.read().get(id).cloned())
    }
}

/// In-memory project catalog
#[derive(Debug, Default)]
pub struct InMemoryProjectCatalog {
    projects: RwLock<HashMap<String, ProjectRecord>>,
}

impl InMemoryProjectCatalog {
    /// Create an empty catalog
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a project record
    pub fn insert(&self, record: ProjectRecord) {
        self.projects.write().insert(record.id.clone(), record);
    }

    /// Seed a project with a title equal to its id
    pub fn seed(&self, id: impl Into<String>) {
        let id = id.into();
        self.insert(ProjectRecord {
            id: id.clone(),
            title: id,
        });
    }
}

#[async_trait]
impl ProjectCatalog for InMemoryProjectCatalog {
    async fn find_by_id(&self, id: &str) -> Result<Option<ProjectRecord>> {
        Ok(self.projects.read().get(id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_user_lookup_hit_and_miss() {
        let directory = InMemoryUserDirectory::new();
        directory.insert(UserRecord {
            id: "u-1".to_string(),
            display_name: "Ada".to_string(),
            email: Some("ada@example.com".to_string()),
        });

        let found = directory.find_by_id("u-1").await.unwrap();
        assert_eq!(found.unwrap().display_name, "Ada");

        let missing = directory.find_by_id("u-2").await.unwrap();
        assert!(missing.is_none());
    }

    #[tokio::test]
    async fn test_project_seed() {
        let catalog = InMemoryProjectCatalog::new();
        catalog.seed("p-1");

        let found = catalog.find_by_id("p-1").await.unwrap().unwrap();
        assert_eq!(found.title, "p-1");
    }
}
