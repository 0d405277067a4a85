use std::collections::BTreeSet;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::authz::errors::AuthzError;
use crate::authz::types::{FactIndex, FactPattern, RoleFact};

/// Persistence for role facts. Inserting an existing fact and deleting a
/// missing one are both no-ops.
#[async_trait]
pub trait FactStore: Send + Sync {
    async fn insert(&self, fact: &RoleFact) -> Result<(), AuthzError>;

    async fn insert_batch(&self, facts: &[RoleFact]) -> Result<(), AuthzError>;

    async fn delete(&self, fact: &RoleFact) -> Result<(), AuthzError>;

    async fn query(&self, pattern: &FactPattern) -> Result<BTreeSet<RoleFact>, AuthzError>;

    async fn contains(&self, fact: &RoleFact) -> Result<bool, AuthzError> {
        Ok(!self.query(&FactPattern::exact(fact)).await?.is_empty())
    }
}

/// Process-local store. Readers run concurrently, writers are serialized.
#[derive(Debug, Default)]
pub struct MemoryFactStore {
    index: RwLock<FactIndex>,
}

impl MemoryFactStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn fact_count(&self) -> usize {
        self.index.read().await.fact_count()
    }
}

#[async_trait]
impl FactStore for MemoryFactStore {
    async fn insert(&self, fact: &RoleFact) -> Result<(), AuthzError> {
        if self.index.write().await.insert(fact.clone()) {
            tracing::trace!(%fact, "fact inserted");
        }
        Ok(())
    }

    async fn insert_batch(&self, facts: &[RoleFact]) -> Result<(), AuthzError> {
        let mut index = self.index.write().await;
        for fact in facts {
            index.insert(fact.clone());
        }
        Ok(())
    }

    async fn delete(&self, fact: &RoleFact) -> Result<(), AuthzError> {
        if self.index.write().await.remove(fact) {
            tracing::trace!(%fact, "fact deleted");
        }
        Ok(())
    }

    async fn query(&self, pattern: &FactPattern) -> Result<BTreeSet<RoleFact>, AuthzError> {
        Ok(self.index.read().await.query(pattern))
    }

    async fn contains(&self, fact: &RoleFact) -> Result<bool, AuthzError> {
        Ok(self.index.read().await.contains(fact))
    }
}
