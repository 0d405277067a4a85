use std::collections::BTreeSet;

use async_trait::async_trait;
use chrono::Utc;
use sea_orm::sea_query::OnConflict;
use sea_orm::{ColumnTrait, DatabaseConnection, DbErr, EntityTrait, QueryFilter, Select, Set};

use crate::authz::errors::AuthzError;
use crate::authz::store::FactStore;
use crate::authz::types::{FactPattern, FlatFact, RefPattern, RoleFact};
use crate::entities::role_fact::{self, Column};

/// Fact store over the `role_facts` table.
#[derive(Debug, Clone)]
pub struct DbFactStore {
    db: DatabaseConnection,
}

impl DbFactStore {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }
}

fn active_model(fact: &RoleFact, now: i64) -> role_fact::ActiveModel {
    let flat = FlatFact::from(fact);
    role_fact::ActiveModel {
        subject_type: Set(flat.subject_type),
        subject_id: Set(flat.subject_id),
        role: Set(flat.role),
        resource_type: Set(flat.resource_type),
        resource_id: Set(flat.resource_id),
        created_at: Set(now),
    }
}

fn ignore_duplicates() -> OnConflict {
    OnConflict::columns([
        Column::SubjectType,
        Column::SubjectId,
        Column::Role,
        Column::ResourceType,
        Column::ResourceId,
    ])
    .do_nothing()
    .to_owned()
}

/// With ON CONFLICT DO NOTHING a duplicate surfaces as "no rows inserted".
fn tolerate_duplicate(result: Result<u64, DbErr>) -> Result<(), AuthzError> {
    match result {
        Ok(_) | Err(DbErr::RecordNotInserted) => Ok(()),
        Err(e) => Err(e.into()),
    }
}

fn filter_side(
    query: Select<role_fact::Entity>,
    pattern: &RefPattern,
    kind_col: Column,
    id_col: Column,
) -> Select<role_fact::Entity> {
    match pattern {
        RefPattern::Any => query,
        RefPattern::Kind(kind) => query.filter(kind_col.eq(kind.as_str())),
        RefPattern::Exact(entity) => query
            .filter(kind_col.eq(entity.kind.as_str()))
            .filter(id_col.eq(entity.id.as_str())),
    }
}

#[async_trait]
impl FactStore for DbFactStore {
    async fn insert(&self, fact: &RoleFact) -> Result<(), AuthzError> {
        let result = role_fact::Entity::insert(active_model(fact, Utc::now().timestamp()))
            .on_conflict(ignore_duplicates())
            .exec_without_returning(&self.db)
            .await;
        tolerate_duplicate(result)
    }

    async fn insert_batch(&self, facts: &[RoleFact]) -> Result<(), AuthzError> {
        if facts.is_empty() {
            return Ok(());
        }
        let now = Utc::now().timestamp();
        let result = role_fact::Entity::insert_many(facts.iter().map(|f| active_model(f, now)))
            .on_conflict(ignore_duplicates())
            .exec_without_returning(&self.db)
            .await;
        tolerate_duplicate(result)
    }

    async fn delete(&self, fact: &RoleFact) -> Result<(), AuthzError> {
        let flat = FlatFact::from(fact);
        role_fact::Entity::delete_many()
            .filter(Column::SubjectType.eq(flat.subject_type))
            .filter(Column::SubjectId.eq(flat.subject_id))
            .filter(Column::Role.eq(flat.role))
            .filter(Column::ResourceType.eq(flat.resource_type))
            .filter(Column::ResourceId.eq(flat.resource_id))
            .exec(&self.db)
            .await?;
        Ok(())
    }

    async fn query(&self, pattern: &FactPattern) -> Result<BTreeSet<RoleFact>, AuthzError> {
        let mut query = role_fact::Entity::find();
        query = filter_side(query, &pattern.subject, Column::SubjectType, Column::SubjectId);
        query = filter_side(
            query,
            &pattern.resource,
            Column::ResourceType,
            Column::ResourceId,
        );
        if let Some(role) = pattern.role {
            query = query.filter(Column::Role.eq(role.as_str()));
        }

        let rows = query.all(&self.db).await?;
        let mut facts = BTreeSet::new();
        for row in rows {
            let flat = FlatFact {
                subject_type: row.subject_type,
                subject_id: row.subject_id,
                role: row.role,
                resource_type: row.resource_type,
                resource_id: row.resource_id,
            };
            match RoleFact::try_from(flat) {
                Ok(fact) => {
                    facts.insert(fact);
                }
                Err(e) => tracing::warn!(error = %e, "skipping unreadable role fact row"),
            }
        }
        Ok(facts)
    }
}
