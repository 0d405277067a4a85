//! In-memory collaborators for unit tests of the authorization core.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;

use crate::authz::directory::Directory;
use crate::authz::errors::AuthzError;
use crate::authz::store::{FactStore, MemoryFactStore};
use crate::authz::types::{FactPattern, Role, RoleFact};
use crate::model::{
    Company, CompanyId, RequestId, RequestStatus, TimeOffRequest, User, UserId, UserRole,
};

#[derive(Default)]
struct Org {
    companies: BTreeMap<CompanyId, Company>,
    users: BTreeMap<UserId, User>,
    requests: BTreeMap<RequestId, TimeOffRequest>,
    next_id: i64,
}

impl Org {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }
}

#[derive(Default)]
pub struct MemoryDirectory {
    org: Mutex<Org>,
    pub fail_lookups: AtomicBool,
}

impl MemoryDirectory {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn add_company(&self, name: &str) -> Company {
        let mut org = self.org.lock().unwrap();
        let id = org.next_id();
        let company = Company {
            id,
            name: name.to_string(),
            created_at: 0,
        };
        org.companies.insert(id, company.clone());
        company
    }

    pub fn add_user(
        &self,
        company_id: CompanyId,
        first_name: &str,
        role: UserRole,
        manager_id: Option<UserId>,
    ) -> User {
        let mut org = self.org.lock().unwrap();
        let id = org.next_id();
        let user = User {
            id,
            company_id,
            email: format!("{}@example.test", first_name.to_lowercase()),
            first_name: first_name.to_string(),
            last_name: "Test".to_string(),
            location: None,
            manager_id,
            salary: Some(50_000),
            ssn: Some("000-00-0000".to_string()),
            role,
            created_at: 0,
        };
        org.users.insert(id, user.clone());
        user
    }

    /// Replaces a stored user and returns the previous version.
    pub fn update_user(&self, user: User) -> User {
        let mut org = self.org.lock().unwrap();
        org.users.insert(user.id, user).expect("user exists")
    }

    pub fn add_request(&self, user_id: UserId) -> TimeOffRequest {
        let mut org = self.org.lock().unwrap();
        let id = org.next_id();
        let day = NaiveDate::from_ymd_opt(2030, 1, 1).unwrap();
        let request = TimeOffRequest {
            id,
            user_id,
            start_date: day,
            end_date: day,
            reason: String::new(),
            status: RequestStatus::Pending,
            approved_by: None,
            created_at: id,
            updated_at: id,
        };
        org.requests.insert(id, request.clone());
        request
    }

    fn check(&self) -> Result<(), AuthzError> {
        if self.fail_lookups.load(Ordering::SeqCst) {
            return Err(AuthzError::Directory("directory unavailable".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl Directory for MemoryDirectory {
    async fn user(&self, id: UserId) -> Result<Option<User>, AuthzError> {
        self.check()?;
        Ok(self.org.lock().unwrap().users.get(&id).cloned())
    }

    async fn users_in_company(&self, company_id: CompanyId) -> Result<Vec<User>, AuthzError> {
        self.check()?;
        let org = self.org.lock().unwrap();
        Ok(org
            .users
            .values()
            .filter(|u| u.company_id == company_id)
            .cloned()
            .collect())
    }

    async fn direct_reports(&self, manager_id: UserId) -> Result<Vec<User>, AuthzError> {
        self.check()?;
        let org = self.org.lock().unwrap();
        Ok(org
            .users
            .values()
            .filter(|u| u.manager_id == Some(manager_id))
            .cloned()
            .collect())
    }

    async fn companies(&self) -> Result<Vec<Company>, AuthzError> {
        self.check()?;
        Ok(self.org.lock().unwrap().companies.values().cloned().collect())
    }

    async fn time_off_request(
        &self,
        id: RequestId,
    ) -> Result<Option<TimeOffRequest>, AuthzError> {
        self.check()?;
        Ok(self.org.lock().unwrap().requests.get(&id).cloned())
    }

    async fn requests_for_user(
        &self,
        user_id: UserId,
    ) -> Result<Vec<TimeOffRequest>, AuthzError> {
        self.check()?;
        let org = self.org.lock().unwrap();
        Ok(org
            .requests
            .values()
            .filter(|r| r.user_id == user_id)
            .cloned()
            .collect())
    }
}

/// Memory store whose reads and writes can be made to fail or stall.
#[derive(Default)]
pub struct FlakyStore {
    pub inner: MemoryFactStore,
    pub fail_reads: AtomicBool,
    pub stall_reads: AtomicBool,
    pub fail_writes: AtomicBool,
    /// Writes of facts with this role fail.
    pub fail_role: Mutex<Option<Role>>,
}

impl FlakyStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn fail_role(&self, role: Option<Role>) {
        *self.fail_role.lock().unwrap() = role;
    }

    fn check_write(&self, fact: &RoleFact) -> Result<(), AuthzError> {
        if self.fail_writes.load(Ordering::SeqCst)
            || *self.fail_role.lock().unwrap() == Some(fact.role)
        {
            return Err(AuthzError::Store(format!("write of `{fact}` rejected")));
        }
        Ok(())
    }

    async fn check_read(&self) -> Result<(), AuthzError> {
        if self.stall_reads.load(Ordering::SeqCst) {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(AuthzError::Store("read rejected".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl FactStore for FlakyStore {
    async fn insert(&self, fact: &RoleFact) -> Result<(), AuthzError> {
        self.check_write(fact)?;
        self.inner.insert(fact).await
    }

    async fn insert_batch(&self, facts: &[RoleFact]) -> Result<(), AuthzError> {
        for fact in facts {
            self.check_write(fact)?;
        }
        self.inner.insert_batch(facts).await
    }

    async fn delete(&self, fact: &RoleFact) -> Result<(), AuthzError> {
        self.check_write(fact)?;
        self.inner.delete(fact).await
    }

    async fn query(&self, pattern: &FactPattern) -> Result<BTreeSet<RoleFact>, AuthzError> {
        self.check_read().await?;
        self.inner.query(pattern).await
    }
}
