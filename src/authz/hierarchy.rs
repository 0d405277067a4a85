use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use crate::authz::directory::Directory;
use crate::authz::errors::AuthzError;
use crate::model::{CompanyId, User, UserId};

/// Walks the management hierarchy through the directory. Every traversal
/// carries a visited set, so cyclic manager links terminate.
#[derive(Clone)]
pub struct HierarchyResolver {
    directory: Arc<dyn Directory>,
}

impl HierarchyResolver {
    pub fn new(directory: Arc<dyn Directory>) -> Self {
        Self { directory }
    }

    /// Managers above `user`, nearest first. Stops at the first repeated
    /// user (the start user counts) or at a manager id that does not resolve.
    pub async fn manager_chain(&self, user: &User) -> Result<Vec<User>, AuthzError> {
        let mut chain = Vec::new();
        let mut visited = HashSet::from([user.id]);
        let mut next = user.manager_id;

        while let Some(manager_id) = next {
            if !visited.insert(manager_id) {
                tracing::warn!(user_id = user.id, manager_id, "manager cycle detected");
                break;
            }
            match self.directory.user(manager_id).await? {
                Some(manager) => {
                    next = manager.manager_id;
                    chain.push(manager);
                }
                None => {
                    tracing::debug!(user_id = user.id, manager_id, "dangling manager id");
                    break;
                }
            }
        }

        Ok(chain)
    }

    /// Like `manager_chain`, starting from an id. Unknown users have no chain.
    pub async fn manager_chain_of(&self, user_id: UserId) -> Result<Vec<User>, AuthzError> {
        match self.directory.user(user_id).await? {
            Some(user) => self.manager_chain(&user).await,
            None => Ok(Vec::new()),
        }
    }

    pub async fn direct_reports(&self, user_id: UserId) -> Result<Vec<User>, AuthzError> {
        let mut reports = self.directory.direct_reports(user_id).await?;
        reports.retain(|u| u.id != user_id);
        Ok(reports)
    }

    /// Everyone below `user_id`, breadth first. Never contains `user_id`.
    pub async fn all_reports(&self, user_id: UserId) -> Result<Vec<User>, AuthzError> {
        let mut reports = Vec::new();
        let mut visited = HashSet::from([user_id]);
        let mut queue = VecDeque::from([user_id]);

        while let Some(current) = queue.pop_front() {
            for report in self.directory.direct_reports(current).await? {
                if visited.insert(report.id) {
                    queue.push_back(report.id);
                    reports.push(report);
                }
            }
        }

        Ok(reports)
    }

    pub async fn ceos_of(&self, company_id: CompanyId) -> Result<Vec<User>, AuthzError> {
        let mut members = self.directory.users_in_company(company_id).await?;
        members.retain(User::is_ceo);
        Ok(members)
    }
}
