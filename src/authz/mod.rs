pub mod audit;
pub mod db_store;
pub mod directory;
pub mod engine;
pub mod errors;
pub mod hierarchy;
pub mod plan;
pub mod store;
pub mod sync;
#[cfg(test)]
pub(crate) mod testing;
pub mod types;
pub mod web;

use std::sync::Arc;

use sea_orm::DatabaseConnection;

use crate::directory::DbDirectory;
use crate::model::UserId;
use crate::settings::{self, FactBackend};
use db_store::DbFactStore;
use directory::Directory;
use engine::PolicyEvaluator;
use errors::AuthzError;
use hierarchy::HierarchyResolver;
use store::{FactStore, MemoryFactStore};
use sync::SyncEngine;
use types::{Action, EntityKind, EntityRef, Resource};

/// The authorization core: one fact store shared by the evaluator (reads)
/// and the sync engine (writes). Cheap to clone.
#[derive(Clone)]
pub struct Authz {
    pub store: Arc<dyn FactStore>,
    pub directory: Arc<dyn Directory>,
    pub evaluator: Arc<PolicyEvaluator>,
    pub sync: Arc<SyncEngine>,
    pub hierarchy: HierarchyResolver,
}

impl Authz {
    pub fn new(
        store: Arc<dyn FactStore>,
        directory: Arc<dyn Directory>,
        cfg: &settings::Authz,
    ) -> Self {
        Self {
            evaluator: Arc::new(PolicyEvaluator::new(store.clone(), cfg.query_timeout())),
            sync: Arc::new(SyncEngine::new(store.clone(), directory.clone(), cfg)),
            hierarchy: HierarchyResolver::new(directory.clone()),
            store,
            directory,
        }
    }

    /// Builds the core over the HR database with the configured fact backend.
    pub fn from_settings(db: DatabaseConnection, cfg: &settings::Authz) -> Self {
        let store: Arc<dyn FactStore> = match cfg.store {
            FactBackend::Memory => Arc::new(MemoryFactStore::new()),
            FactBackend::Database => Arc::new(DbFactStore::new(db.clone())),
        };
        tracing::info!(backend = ?cfg.store, fan_out = ?cfg.fan_out, "authorization core ready");
        Self::new(store, Arc::new(DbDirectory::new(db)), cfg)
    }

    pub async fn authorize(&self, actor: UserId, action: Action, resource: &Resource) -> bool {
        self.evaluator.authorize(actor, action, resource).await
    }

    /// Turns a reference into a checkable resource. `None` when a referenced
    /// request does not exist.
    pub async fn resolve(&self, reference: &EntityRef) -> Result<Option<Resource>, AuthzError> {
        let id = reference.numeric_id().ok_or_else(|| {
            AuthzError::InvalidReference(format!("`{reference}` does not have a numeric id"))
        })?;
        match reference.kind {
            EntityKind::Profile => Ok(Some(Resource::Profile { owner: id })),
            EntityKind::Company => Ok(Some(Resource::Company { id })),
            EntityKind::TimeOffRequest => Ok(self
                .directory
                .time_off_request(id)
                .await?
                .map(|r| Resource::TimeOffRequest {
                    id: r.id,
                    status: r.status,
                })),
            EntityKind::User => Err(AuthzError::InvalidReference(format!(
                "`{reference}` is a subject, not a resource"
            ))),
        }
    }
}
