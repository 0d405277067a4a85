use async_trait::async_trait;
use sea_orm::DatabaseConnection;

use crate::authz::directory::Directory;
use crate::authz::errors::AuthzError;
use crate::errors::OrgError;
use crate::model::{Company, CompanyId, RequestId, TimeOffRequest, User, UserId};
use crate::storage;

/// `Directory` backed by the HR tables.
#[derive(Debug, Clone)]
pub struct DbDirectory {
    db: DatabaseConnection,
}

impl DbDirectory {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }
}

fn lookup_failed(e: OrgError) -> AuthzError {
    match e {
        OrgError::Db(db) => AuthzError::Db(db),
        other => AuthzError::Directory(other.to_string()),
    }
}

#[async_trait]
impl Directory for DbDirectory {
    async fn user(&self, id: UserId) -> Result<Option<User>, AuthzError> {
        storage::get_user(&self.db, id).await.map_err(lookup_failed)
    }

    async fn users_in_company(&self, company_id: CompanyId) -> Result<Vec<User>, AuthzError> {
        storage::users_in_company(&self.db, company_id)
            .await
            .map_err(lookup_failed)
    }

    async fn direct_reports(&self, manager_id: UserId) -> Result<Vec<User>, AuthzError> {
        storage::direct_reports(&self.db, manager_id)
            .await
            .map_err(lookup_failed)
    }

    async fn companies(&self) -> Result<Vec<Company>, AuthzError> {
        storage::list_companies(&self.db).await.map_err(lookup_failed)
    }

    async fn time_off_request(
        &self,
        id: RequestId,
    ) -> Result<Option<TimeOffRequest>, AuthzError> {
        storage::get_time_off_request(&self.db, id)
            .await
            .map_err(lookup_failed)
    }

    async fn requests_for_user(
        &self,
        user_id: UserId,
    ) -> Result<Vec<TimeOffRequest>, AuthzError> {
        storage::requests_for_user(&self.db, user_id)
            .await
            .map_err(lookup_failed)
    }
}
