use async_trait::async_trait;

use crate::authz::errors::AuthzError;
use crate::model::{Company, CompanyId, RequestId, TimeOffRequest, User, UserId};

/// Read access to the organization data the authorization core derives
/// facts from.
#[async_trait]
pub trait Directory: Send + Sync {
    async fn user(&self, id: UserId) -> Result<Option<User>, AuthzError>;

    async fn users_in_company(&self, company_id: CompanyId) -> Result<Vec<User>, AuthzError>;

    async fn direct_reports(&self, manager_id: UserId) -> Result<Vec<User>, AuthzError>;

    async fn companies(&self) -> Result<Vec<Company>, AuthzError>;

    async fn time_off_request(&self, id: RequestId)
        -> Result<Option<TimeOffRequest>, AuthzError>;

    async fn requests_for_user(&self, user_id: UserId)
        -> Result<Vec<TimeOffRequest>, AuthzError>;
}
