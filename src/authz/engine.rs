use std::collections::BTreeSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use crate::authz::errors::AuthzError;
use crate::authz::store::FactStore;
use crate::authz::types::{Action, EntityKind, EntityRef, FactPattern, Resource, Role, RoleFact};
use crate::model::{RequestStatus, UserId};

/// Roles on a profile that grant the basic view.
const BASIC_PROFILE_ROLES: &[Role] = &[Role::Owner, Role::Coworker, Role::Manager, Role::Ceo];
/// Roles on a profile that grant the sensitive view.
const SENSITIVE_PROFILE_ROLES: &[Role] = &[Role::Owner, Role::Manager, Role::Ceo];
/// Company roles that count as membership.
const MEMBER_ROLES: &[Role] = &[Role::Employee, Role::Ceo];

/// Answers authorization checks from the current fact set. Deny by default:
/// unsupported (action, resource) pairs, store errors and timeouts all deny.
pub struct PolicyEvaluator {
    store: Arc<dyn FactStore>,
    query_timeout: Duration,
}

impl PolicyEvaluator {
    pub fn new(store: Arc<dyn FactStore>, query_timeout: Duration) -> Self {
        Self {
            store,
            query_timeout,
        }
    }

    pub async fn authorize(&self, actor: UserId, action: Action, resource: &Resource) -> bool {
        match self.evaluate(actor, action, resource).await {
            Ok(allowed) => {
                tracing::debug!(
                    actor,
                    %action,
                    resource = %resource.entity_ref(),
                    allowed,
                    "authorization decision"
                );
                allowed
            }
            Err(e) => {
                tracing::warn!(
                    actor,
                    %action,
                    resource = %resource.entity_ref(),
                    error = %e,
                    "authorization check failed, denying"
                );
                false
            }
        }
    }

    /// Keeps the items `actor` may perform `action` on.
    pub async fn authorize_many<T, F>(
        &self,
        actor: UserId,
        action: Action,
        items: Vec<T>,
        resource_of: F,
    ) -> Vec<T>
    where
        F: Fn(&T) -> Resource,
    {
        let mut allowed = Vec::with_capacity(items.len());
        for item in items {
            if self.authorize(actor, action, &resource_of(&item)).await {
                allowed.push(item);
            }
        }
        allowed
    }

    /// Like `authorize` but surfaces store failures instead of denying.
    pub async fn evaluate(
        &self,
        actor: UserId,
        action: Action,
        resource: &Resource,
    ) -> Result<bool, AuthzError> {
        let viewer = EntityRef::user(actor);
        match (action, resource) {
            (Action::ViewBasic, Resource::Profile { owner }) => {
                let profile = EntityRef::profile(*owner);
                if self.holds_any(&viewer, BASIC_PROFILE_ROLES, &profile).await? {
                    return Ok(true);
                }
                // same company, derived from membership facts
                let mine = self.companies_of(&viewer, MEMBER_ROLES).await?;
                if mine.is_empty() {
                    return Ok(false);
                }
                for owner in self.profile_owners(&profile).await? {
                    let theirs = self.companies_of(&owner, MEMBER_ROLES).await?;
                    if !mine.is_disjoint(&theirs) {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
            (Action::ViewSensitive, Resource::Profile { owner }) => {
                let profile = EntityRef::profile(*owner);
                if self.holds_any(&viewer, SENSITIVE_PROFILE_ROLES, &profile).await? {
                    return Ok(true);
                }
                // ceo of the company the owner works for
                let led = self.companies_of(&viewer, &[Role::Ceo]).await?;
                if led.is_empty() {
                    return Ok(false);
                }
                for owner in self.profile_owners(&profile).await? {
                    let employers = self.companies_of(&owner, &[Role::Employee]).await?;
                    if !led.is_disjoint(&employers) {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
            (Action::View, Resource::TimeOffRequest { id, .. }) => {
                self.holds_any(
                    &viewer,
                    &[Role::Owner, Role::Approver],
                    &EntityRef::request(*id),
                )
                .await
            }
            (Action::Approve, Resource::TimeOffRequest { id, status }) => {
                if *status != RequestStatus::Pending {
                    return Ok(false);
                }
                self.holds(&RoleFact::new(
                    viewer,
                    Role::Approver,
                    EntityRef::request(*id),
                ))
                .await
            }
            (Action::View, Resource::Company { id }) => {
                self.holds_any(&viewer, MEMBER_ROLES, &EntityRef::company(*id))
                    .await
            }
            _ => Ok(false),
        }
    }

    /// Subjects holding a fact that grants `action` on `resource`, sorted.
    pub async fn expand(
        &self,
        action: Action,
        resource: &Resource,
    ) -> Result<Vec<EntityRef>, AuthzError> {
        let mut result = BTreeSet::new();
        match (action, resource) {
            (Action::ViewBasic, Resource::Profile { owner }) => {
                let profile = EntityRef::profile(*owner);
                result.extend(self.subjects_with(BASIC_PROFILE_ROLES, &profile).await?);
                for owner in self.profile_owners(&profile).await? {
                    for company in self.companies_of(&owner, MEMBER_ROLES).await? {
                        result.extend(self.subjects_with(MEMBER_ROLES, &company).await?);
                    }
                }
            }
            (Action::ViewSensitive, Resource::Profile { owner }) => {
                let profile = EntityRef::profile(*owner);
                result.extend(self.subjects_with(SENSITIVE_PROFILE_ROLES, &profile).await?);
                for owner in self.profile_owners(&profile).await? {
                    for company in self.companies_of(&owner, &[Role::Employee]).await? {
                        result.extend(self.subjects_with(&[Role::Ceo], &company).await?);
                    }
                }
            }
            (Action::View, Resource::TimeOffRequest { id, .. }) => {
                let request = EntityRef::request(*id);
                result.extend(
                    self.subjects_with(&[Role::Owner, Role::Approver], &request)
                        .await?,
                );
            }
            (Action::Approve, Resource::TimeOffRequest { id, status }) => {
                if *status == RequestStatus::Pending {
                    let request = EntityRef::request(*id);
                    result.extend(self.subjects_with(&[Role::Approver], &request).await?);
                }
            }
            (Action::View, Resource::Company { id }) => {
                let company = EntityRef::company(*id);
                result.extend(self.subjects_with(MEMBER_ROLES, &company).await?);
            }
            _ => {}
        }
        Ok(result
            .into_iter()
            .filter(|s| s.kind == EntityKind::User)
            .collect())
    }

    async fn timed<T, F>(&self, what: &str, fut: F) -> Result<T, AuthzError>
    where
        F: Future<Output = Result<T, AuthzError>>,
    {
        tokio::time::timeout(self.query_timeout, fut)
            .await
            .map_err(|_| AuthzError::Timeout(what.to_string()))?
    }

    async fn query(&self, pattern: FactPattern) -> Result<BTreeSet<RoleFact>, AuthzError> {
        self.timed("query", self.store.query(&pattern)).await
    }

    async fn holds(&self, fact: &RoleFact) -> Result<bool, AuthzError> {
        self.timed("contains", self.store.contains(fact)).await
    }

    async fn holds_any(
        &self,
        subject: &EntityRef,
        roles: &[Role],
        resource: &EntityRef,
    ) -> Result<bool, AuthzError> {
        let facts = self
            .query(
                FactPattern::any()
                    .subject(subject.clone())
                    .resource(resource.clone()),
            )
            .await?;
        Ok(facts.iter().any(|f| roles.contains(&f.role)))
    }

    async fn subjects_with(
        &self,
        roles: &[Role],
        resource: &EntityRef,
    ) -> Result<BTreeSet<EntityRef>, AuthzError> {
        let facts = self.query(FactPattern::any().resource(resource.clone())).await?;
        Ok(facts
            .into_iter()
            .filter(|f| roles.contains(&f.role))
            .map(|f| f.subject)
            .collect())
    }

    async fn companies_of(
        &self,
        subject: &EntityRef,
        roles: &[Role],
    ) -> Result<BTreeSet<EntityRef>, AuthzError> {
        let facts = self
            .query(
                FactPattern::any()
                    .subject(subject.clone())
                    .resource_kind(EntityKind::Company),
            )
            .await?;
        Ok(facts
            .into_iter()
            .filter(|f| roles.contains(&f.role))
            .map(|f| f.resource)
            .collect())
    }

    async fn profile_owners(&self, profile: &EntityRef) -> Result<Vec<EntityRef>, AuthzError> {
        let facts = self
            .query(FactPattern::any().role(Role::Owner).resource(profile.clone()))
            .await?;
        Ok(facts.into_iter().map(|f| f.subject).collect())
    }
}
