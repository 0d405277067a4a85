use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::authz::directory::Directory;
use crate::authz::errors::AuthzError;
use crate::authz::hierarchy::HierarchyResolver;
use crate::authz::plan::{self, FactOp};
use crate::authz::store::FactStore;
use crate::authz::types::{EntityRef, FactPattern, Role, RoleFact};
use crate::model::{Company, TimeOffRequest, User, UserId};
use crate::settings::{self, FanOut};

/// Outcome of one sync handler. Handlers never fail; they report.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    /// Fact writes that reached the store.
    pub applied: usize,
    /// Fact writes that failed or timed out and were deferred.
    pub failed: usize,
    /// A directory lookup failed, so some facts were not planned at all.
    pub incomplete: bool,
}

impl SyncReport {
    pub fn merge(&mut self, other: SyncReport) {
        self.applied += other.applied;
        self.failed += other.failed;
        self.incomplete |= other.incomplete;
    }

    pub fn is_clean(&self) -> bool {
        self.failed == 0 && !self.incomplete
    }
}

/// Bounded queue of writes waiting for a retry. A newer op for the same fact
/// replaces the queued one, and a later successful write on that fact cancels
/// it. When full the oldest op is dropped and left for the reconcile job.
pub struct Outbox {
    capacity: usize,
    ops: Mutex<VecDeque<FactOp>>,
}

impl Outbox {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            ops: Mutex::new(VecDeque::new()),
        }
    }

    pub async fn push(&self, op: FactOp) {
        if self.capacity == 0 {
            tracing::warn!(%op, "outbox disabled, dropping deferred write");
            return;
        }
        let mut ops = self.ops.lock().await;
        ops.retain(|queued| queued.fact() != op.fact());
        if ops.len() >= self.capacity {
            if let Some(dropped) = ops.pop_front() {
                tracing::warn!(op = %dropped, "outbox full, dropping oldest deferred write");
            }
        }
        ops.push_back(op);
    }

    /// Forgets any queued op on `fact`; returns whether one was queued.
    pub async fn cancel(&self, fact: &RoleFact) -> bool {
        let mut ops = self.ops.lock().await;
        let before = ops.len();
        ops.retain(|queued| queued.fact() != fact);
        ops.len() != before
    }

    pub async fn drain(&self) -> Vec<FactOp> {
        self.ops.lock().await.drain(..).collect()
    }

    pub async fn len(&self) -> usize {
        self.ops.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

/// One async mutex per id; idle entries are pruned on the next lock.
#[derive(Default)]
struct KeyedLocks {
    inner: Mutex<HashMap<i64, Arc<Mutex<()>>>>,
}

impl KeyedLocks {
    async fn lock(&self, id: i64) -> OwnedMutexGuard<()> {
        let cell = {
            let mut map = self.inner.lock().await;
            map.retain(|_, cell| Arc::strong_count(cell) > 1);
            map.entry(id).or_default().clone()
        };
        cell.lock_owned().await
    }
}

/// Keeps the fact store in step with organization changes. Handlers for one
/// user are serialized by a user lock; approver facts of one request are
/// recomputed under a request lock, always taken after any user lock.
pub struct SyncEngine {
    pub(crate) store: Arc<dyn FactStore>,
    pub(crate) directory: Arc<dyn Directory>,
    pub(crate) hierarchy: HierarchyResolver,
    pub(crate) fan_out: FanOut,
    write_timeout: Duration,
    outbox: Outbox,
    locks: KeyedLocks,
    request_locks: KeyedLocks,
}

impl SyncEngine {
    pub fn new(
        store: Arc<dyn FactStore>,
        directory: Arc<dyn Directory>,
        cfg: &settings::Authz,
    ) -> Self {
        Self {
            store,
            hierarchy: HierarchyResolver::new(directory.clone()),
            directory,
            fan_out: cfg.fan_out,
            write_timeout: cfg.write_timeout(),
            outbox: Outbox::new(cfg.outbox_capacity),
            locks: KeyedLocks::default(),
            request_locks: KeyedLocks::default(),
        }
    }

    pub fn fan_out(&self) -> FanOut {
        self.fan_out
    }

    pub async fn deferred_count(&self) -> usize {
        self.outbox.len().await
    }

    // ---------- event handlers ----------

    pub async fn on_company_created(&self, company: &Company) -> SyncReport {
        tracing::info!(company_id = company.id, "syncing new company");
        self.apply(plan::company_created(company)).await
    }

    pub async fn on_user_created(&self, user: &User) -> SyncReport {
        let _guard = self.locks.lock(user.id).await;
        tracing::info!(user_id = user.id, company_id = user.company_id, "syncing new user");

        let mut report = SyncReport::default();
        let members = self
            .lookup(
                "company members",
                &mut report,
                self.directory.users_in_company(user.company_id),
            )
            .await
            .unwrap_or_default();
        let manager = self.resolve_manager(user, &mut report).await;

        let ops = plan::user_created(user, &members, manager.as_ref(), self.fan_out);
        report.merge(self.apply(ops).await);
        report
    }

    /// Dispatches a user change to the role and manager handlers.
    pub async fn on_user_updated(&self, old: &User, new: &User) -> SyncReport {
        let _guard = self.locks.lock(new.id).await;
        let mut report = self.role_changed(old, new).await;
        report.merge(self.manager_changed(old, new).await);
        report
    }

    pub async fn on_user_role_changed(&self, old: &User, new: &User) -> SyncReport {
        let _guard = self.locks.lock(new.id).await;
        self.role_changed(old, new).await
    }

    pub async fn on_user_manager_changed(&self, old: &User, new: &User) -> SyncReport {
        let _guard = self.locks.lock(new.id).await;
        self.manager_changed(old, new).await
    }

    pub async fn on_time_off_request_created(&self, request: &TimeOffRequest) -> SyncReport {
        let _guard = self.locks.lock(request.user_id).await;
        let _request_guard = self.request_locks.lock(request.id).await;
        tracing::info!(
            request_id = request.id,
            user_id = request.user_id,
            "syncing new time-off request"
        );

        let mut report = SyncReport::default();
        let owner = self
            .lookup("request owner", &mut report, self.directory.user(request.user_id))
            .await
            .flatten();
        let Some(owner) = owner else {
            tracing::warn!(request_id = request.id, "request owner not found, writing ownership only");
            report.incomplete = true;
            let owner_fact = RoleFact::new(
                EntityRef::user(request.user_id),
                Role::Owner,
                EntityRef::request(request.id),
            );
            report.merge(self.apply(vec![FactOp::Insert(owner_fact)]).await);
            return report;
        };

        let chain = self
            .lookup("manager chain", &mut report, self.hierarchy.manager_chain(&owner))
            .await
            .unwrap_or_default();
        let ceos = self
            .lookup("company ceos", &mut report, self.hierarchy.ceos_of(owner.company_id))
            .await
            .unwrap_or_default();

        report.merge(
            self.apply(plan::request_created(request, &chain, &ceos))
                .await,
        );
        report
    }

    /// Re-applies writes parked in the outbox. Writes failing again go back.
    pub async fn retry_deferred(&self) -> SyncReport {
        let ops = self.outbox.drain().await;
        if ops.is_empty() {
            return SyncReport::default();
        }
        tracing::info!(count = ops.len(), "retrying deferred fact writes");
        self.apply(ops).await
    }

    // ---------- handler bodies (caller holds the user lock) ----------

    async fn role_changed(&self, old: &User, new: &User) -> SyncReport {
        let mut report = SyncReport::default();
        if old.is_ceo() == new.is_ceo() {
            return report;
        }
        tracing::info!(
            user_id = new.id,
            from = %old.role,
            to = %new.role,
            "syncing ceo role change"
        );

        let members = self
            .lookup(
                "company members",
                &mut report,
                self.directory.users_in_company(new.company_id),
            )
            .await;
        let ops = plan::role_changed(old, new, members.as_deref().unwrap_or_default(), self.fan_out);
        report.merge(self.apply(ops).await);

        // the set of CEOs approving every request in the company changed
        for member in members.unwrap_or_default() {
            report.merge(self.refresh_approvers(member.id).await);
        }
        report
    }

    async fn manager_changed(&self, old: &User, new: &User) -> SyncReport {
        let mut report = SyncReport::default();
        if old.manager_id == new.manager_id {
            return report;
        }
        tracing::info!(
            user_id = new.id,
            from = ?old.manager_id,
            to = ?new.manager_id,
            "syncing manager change"
        );

        let manager = self.resolve_manager(new, &mut report).await;
        report.merge(
            self.apply(plan::manager_changed(old, new, manager.as_ref()))
                .await,
        );

        // approvers of the user's requests and of everyone below them
        report.merge(self.refresh_approvers(new.id).await);
        let reports = self
            .lookup("reports", &mut report, self.hierarchy.all_reports(new.id))
            .await
            .unwrap_or_default();
        for below in reports {
            report.merge(self.refresh_approvers(below.id).await);
        }
        report
    }

    async fn resolve_manager(&self, user: &User, report: &mut SyncReport) -> Option<User> {
        let manager_id = user.manager_id?;
        let manager = self
            .lookup("manager", report, self.directory.user(manager_id))
            .await
            .flatten();
        if manager.is_none() && !report.incomplete {
            tracing::debug!(user_id = user.id, manager_id, "manager does not exist, skipping pair");
        }
        manager
    }

    /// Brings the approver facts of every request owned by `owner_id` in
    /// line with the current chain and CEOs.
    async fn refresh_approvers(&self, owner_id: UserId) -> SyncReport {
        let mut report = SyncReport::default();
        let Some(requests) = self
            .lookup("requests", &mut report, self.directory.requests_for_user(owner_id))
            .await
        else {
            return report;
        };
        for request in &requests {
            let _guard = self.request_locks.lock(request.id).await;
            report.merge(self.refresh_request(request).await);
        }
        report
    }

    /// Recomputes one request's approvers from a fresh directory read; the
    /// caller holds the request lock. Skipped when a lookup fails, so a
    /// partial view never retracts approvers.
    async fn refresh_request(&self, request: &TimeOffRequest) -> SyncReport {
        let mut report = SyncReport::default();
        let Some(Some(owner)) = self
            .lookup("request owner", &mut report, self.directory.user(request.user_id))
            .await
        else {
            return report;
        };
        let Some(chain) = self
            .lookup("manager chain", &mut report, self.hierarchy.manager_chain(&owner))
            .await
        else {
            return report;
        };
        let Some(ceos) = self
            .lookup("company ceos", &mut report, self.hierarchy.ceos_of(owner.company_id))
            .await
        else {
            return report;
        };
        let pattern = FactPattern::any()
            .role(Role::Approver)
            .resource(EntityRef::request(request.id));
        let Some(current) = self
            .lookup("current approvers", &mut report, self.timed_query(&pattern))
            .await
        else {
            return report;
        };

        let expected = plan::approver_facts(request, &chain, &ceos);
        let ops = plan::diff(&current, &expected);
        if !ops.is_empty() {
            tracing::debug!(request_id = request.id, changes = ops.len(), "refreshing approvers");
            report.merge(self.apply(ops).await);
        }
        report
    }

    // ---------- plumbing ----------

    /// Runs a lookup; a failure is logged and marks the report incomplete.
    pub(crate) async fn lookup<T, F>(
        &self,
        what: &str,
        report: &mut SyncReport,
        fut: F,
    ) -> Option<T>
    where
        F: Future<Output = Result<T, AuthzError>>,
    {
        match fut.await {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!(lookup = what, error = %e, "sync lookup failed");
                report.incomplete = true;
                None
            }
        }
    }

    pub(crate) async fn timed_query(
        &self,
        pattern: &FactPattern,
    ) -> Result<std::collections::BTreeSet<RoleFact>, AuthzError> {
        tokio::time::timeout(self.write_timeout, self.store.query(pattern))
            .await
            .map_err(|_| AuthzError::Timeout("query".into()))?
    }

    async fn write(&self, op: &FactOp) -> Result<(), AuthzError> {
        let fut = async {
            match op {
                FactOp::Insert(fact) => self.store.insert(fact).await,
                FactOp::Delete(fact) => self.store.delete(fact).await,
            }
        };
        tokio::time::timeout(self.write_timeout, fut)
            .await
            .map_err(|_| AuthzError::Timeout(op.to_string()))?
    }

    /// Applies each op on its own; a failure defers that op and moves on.
    pub async fn apply(&self, ops: Vec<FactOp>) -> SyncReport {
        let mut report = SyncReport::default();
        for op in ops {
            match self.write(&op).await {
                Ok(()) => {
                    report.applied += 1;
                    // an older deferred op on this fact is now stale
                    if self.outbox.cancel(op.fact()).await {
                        tracing::debug!(%op, "superseded deferred write cancelled");
                    }
                }
                Err(e) => {
                    tracing::warn!(%op, error = %e, "fact write failed, sync deferred");
                    report.failed += 1;
                    self.outbox.push(op).await;
                }
            }
        }
        report
    }

    /// Inserts `facts` in one batch, falling back to one write per fact.
    pub async fn apply_batch(&self, facts: Vec<RoleFact>) -> SyncReport {
        if facts.is_empty() {
            return SyncReport::default();
        }
        let batch = tokio::time::timeout(self.write_timeout, self.store.insert_batch(&facts)).await;
        match batch {
            Ok(Ok(())) => {
                for fact in &facts {
                    self.outbox.cancel(fact).await;
                }
                SyncReport {
                    applied: facts.len(),
                    ..SyncReport::default()
                }
            }
            Ok(Err(e)) => {
                tracing::warn!(count = facts.len(), error = %e, "batch insert failed, writing facts one by one");
                self.apply(facts.into_iter().map(FactOp::Insert).collect()).await
            }
            Err(_) => {
                tracing::warn!(count = facts.len(), "batch insert timed out, writing facts one by one");
                self.apply(facts.into_iter().map(FactOp::Insert).collect()).await
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::authz::engine::PolicyEvaluator;
    use crate::authz::store::MemoryFactStore;
    use crate::authz::testing::{FlakyStore, MemoryDirectory};
    use crate::authz::types::{Action, Resource};
    use crate::model::{RequestStatus, UserRole};
    use std::sync::atomic::Ordering;

    struct Org {
        dir: Arc<MemoryDirectory>,
        store: Arc<FlakyStore>,
        sync: SyncEngine,
        eval: PolicyEvaluator,
    }

    fn org(fan_out: FanOut) -> Org {
        let dir = MemoryDirectory::new();
        let store = FlakyStore::new();
        let cfg = settings::Authz {
            fan_out,
            write_timeout_ms: 200,
            ..Default::default()
        };
        Org {
            sync: SyncEngine::new(store.clone(), dir.clone(), &cfg),
            eval: PolicyEvaluator::new(store.clone(), Duration::from_millis(200)),
            dir,
            store,
        }
    }

    impl Org {
        async fn hire(&self, company: i64, name: &str, role: UserRole, manager: Option<i64>) -> User {
            let user = self.dir.add_user(company, name, role, manager);
            let report = self.sync.on_user_created(&user).await;
            assert!(report.is_clean(), "{report:?}");
            user
        }

        async fn request(&self, owner: &User) -> TimeOffRequest {
            let request = self.dir.add_request(owner.id);
            self.sync.on_time_off_request_created(&request).await;
            request
        }

        async fn can(&self, actor: &User, action: Action, resource: Resource) -> bool {
            self.eval.authorize(actor.id, action, &resource).await
        }
    }

    fn profile(user: &User) -> Resource {
        Resource::Profile { owner: user.id }
    }

    fn pending(request: &TimeOffRequest) -> Resource {
        Resource::TimeOffRequest {
            id: request.id,
            status: RequestStatus::Pending,
        }
    }

    #[tokio::test]
    async fn test_acme_scenario_in_both_modes() {
        for mode in [FanOut::Materialized, FanOut::Derived] {
            let org = org(mode);
            let acme = org.dir.add_company("Acme");
            org.sync.on_company_created(&acme).await;
            let john = org.hire(acme.id, "John", UserRole::Ceo, None).await;
            let sarah = org.hire(acme.id, "Sarah", UserRole::Manager, Some(john.id)).await;
            let alice = org.hire(acme.id, "Alice", UserRole::Employee, Some(sarah.id)).await;
            let bob = org.hire(acme.id, "Bob", UserRole::Employee, Some(sarah.id)).await;

            assert!(org.can(&sarah, Action::ViewSensitive, profile(&alice)).await);
            assert!(org.can(&john, Action::ViewSensitive, profile(&alice)).await);
            assert!(org.can(&bob, Action::ViewBasic, profile(&alice)).await);
            assert!(!org.can(&bob, Action::ViewSensitive, profile(&alice)).await);
            assert!(!org.can(&alice, Action::ViewSensitive, profile(&sarah)).await);

            let req = org.request(&alice).await;
            assert!(org.can(&sarah, Action::Approve, pending(&req)).await, "{mode:?}");
            assert!(org.can(&john, Action::Approve, pending(&req)).await);
            assert!(!org.can(&alice, Action::Approve, pending(&req)).await);
            assert!(!org.can(&bob, Action::Approve, pending(&req)).await);
            assert!(!org.can(&bob, Action::View, pending(&req)).await);
            assert!(org.can(&alice, Action::View, pending(&req)).await);
        }
    }

    #[tokio::test]
    async fn test_ceo_sees_later_hires() {
        for mode in [FanOut::Materialized, FanOut::Derived] {
            let org = org(mode);
            let acme = org.dir.add_company("Acme");
            let john = org.hire(acme.id, "John", UserRole::Ceo, None).await;
            let late = org.hire(acme.id, "Late", UserRole::Employee, None).await;
            assert!(org.can(&john, Action::ViewSensitive, profile(&late)).await);
            assert!(org.can(&late, Action::ViewBasic, profile(&john)).await);
        }
    }

    #[tokio::test]
    async fn test_companies_are_isolated() {
        for mode in [FanOut::Materialized, FanOut::Derived] {
            let org = org(mode);
            let acme = org.dir.add_company("Acme");
            let globex = org.dir.add_company("Globex");
            let john = org.hire(acme.id, "John", UserRole::Ceo, None).await;
            let hank = org.hire(globex.id, "Hank", UserRole::Ceo, None).await;
            assert!(!org.can(&john, Action::ViewBasic, profile(&hank)).await);
            assert!(!org.can(&hank, Action::ViewSensitive, profile(&john)).await);
            assert!(!org.can(&hank, Action::View, Resource::Company { id: acme.id }).await);
        }
    }

    #[tokio::test]
    async fn test_manager_reassignment_moves_access_and_approvers() {
        let org = org(FanOut::Materialized);
        let acme = org.dir.add_company("Acme");
        let john = org.hire(acme.id, "John", UserRole::Ceo, None).await;
        let sarah = org.hire(acme.id, "Sarah", UserRole::Manager, Some(john.id)).await;
        let mike = org.hire(acme.id, "Mike", UserRole::Manager, Some(john.id)).await;
        let alice = org.hire(acme.id, "Alice", UserRole::Employee, Some(sarah.id)).await;
        let intern = org.hire(acme.id, "Ivy", UserRole::Employee, Some(alice.id)).await;
        let alice_req = org.request(&alice).await;
        let ivy_req = org.request(&intern).await;
        assert!(org.can(&sarah, Action::Approve, pending(&ivy_req)).await);

        let mut moved = alice.clone();
        moved.manager_id = Some(mike.id);
        let old = org.dir.update_user(moved.clone());
        let report = org.sync.on_user_updated(&old, &moved).await;
        assert!(report.is_clean());

        assert!(!org.can(&sarah, Action::ViewSensitive, profile(&alice)).await);
        assert!(org.can(&mike, Action::ViewSensitive, profile(&alice)).await);
        assert!(!org.can(&sarah, Action::Approve, pending(&alice_req)).await);
        assert!(org.can(&mike, Action::Approve, pending(&alice_req)).await);
        assert!(org.can(&john, Action::Approve, pending(&alice_req)).await);
        // transitive reports follow
        assert!(!org.can(&sarah, Action::Approve, pending(&ivy_req)).await);
        assert!(org.can(&mike, Action::Approve, pending(&ivy_req)).await);
        assert!(org.can(&alice, Action::Approve, pending(&ivy_req)).await);
    }

    #[tokio::test]
    async fn test_ceo_round_trip_restores_fact_set() {
        for mode in [FanOut::Materialized, FanOut::Derived] {
            let org = org(mode);
            let acme = org.dir.add_company("Acme");
            let john = org.hire(acme.id, "John", UserRole::Ceo, None).await;
            let alice = org.hire(acme.id, "Alice", UserRole::Employee, Some(john.id)).await;
            let bob = org.hire(acme.id, "Bob", UserRole::Employee, Some(john.id)).await;
            let req = org.request(&bob).await;
            let before = org.store.inner.query(&FactPattern::any()).await.unwrap();

            let mut promoted = alice.clone();
            promoted.role = UserRole::Ceo;
            let old = org.dir.update_user(promoted.clone());
            org.sync.on_user_role_changed(&old, &promoted).await;
            assert!(org.can(&promoted, Action::ViewSensitive, profile(&bob)).await);
            assert!(org.can(&promoted, Action::Approve, pending(&req)).await);

            let demoted = alice.clone();
            let old = org.dir.update_user(demoted.clone());
            org.sync.on_user_role_changed(&old, &demoted).await;
            assert!(!org.can(&demoted, Action::ViewSensitive, profile(&bob)).await);
            assert!(!org.can(&demoted, Action::Approve, pending(&req)).await);

            let after = org.store.inner.query(&FactPattern::any()).await.unwrap();
            assert_eq!(before, after, "{mode:?}");
        }
    }

    #[tokio::test]
    async fn test_failed_write_does_not_stop_the_rest() {
        let org = org(FanOut::Materialized);
        let acme = org.dir.add_company("Acme");
        let john = org.hire(acme.id, "John", UserRole::Ceo, None).await;

        org.store.fail_role(Some(Role::Coworker));
        let alice = org.dir.add_user(acme.id, "Alice", UserRole::Employee, Some(john.id));
        let report = org.sync.on_user_created(&alice).await;
        assert_eq!(report.failed, 2);
        assert!(report.applied >= 4);
        assert_eq!(org.sync.deferred_count().await, 2);
        // the manager pair landed despite the coworker failures
        assert!(org.can(&john, Action::ViewSensitive, profile(&alice)).await);

        org.store.fail_role(None);
        let retry = org.sync.retry_deferred().await;
        assert_eq!(retry.applied, 2);
        assert_eq!(org.sync.deferred_count().await, 0);
        assert!(org
            .store
            .inner
            .contains(&RoleFact::new(
                EntityRef::user(john.id),
                Role::Coworker,
                EntityRef::profile(alice.id)
            ))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_directory_outage_marks_report_incomplete() {
        let org = org(FanOut::Materialized);
        let acme = org.dir.add_company("Acme");
        let alice = org.dir.add_user(acme.id, "Alice", UserRole::Employee, None);
        org.dir.fail_lookups.store(true, Ordering::SeqCst);

        let report = org.sync.on_user_created(&alice).await;
        assert!(report.incomplete);
        // ownership and membership need no lookup
        assert!(report.applied >= 2);
        assert!(org.can(&alice, Action::ViewSensitive, profile(&alice)).await);
    }

    #[tokio::test]
    async fn test_outbox_is_bounded_and_coalesces() {
        let outbox = Outbox::new(2);
        let f = |id| RoleFact::new(EntityRef::user(id), Role::Owner, EntityRef::profile(id));
        outbox.push(FactOp::Insert(f(1))).await;
        outbox.push(FactOp::Delete(f(1))).await;
        assert_eq!(outbox.len().await, 1);

        outbox.push(FactOp::Insert(f(2))).await;
        outbox.push(FactOp::Insert(f(3))).await;
        let ops = outbox.drain().await;
        assert_eq!(ops, vec![FactOp::Insert(f(2)), FactOp::Insert(f(3))]);
        assert!(outbox.is_empty().await);
    }

    #[tokio::test]
    async fn test_apply_batch_falls_back_per_fact() {
        let store = FlakyStore::new();
        store.fail_role(Some(Role::Coworker));
        let sync = SyncEngine::new(
            store.clone(),
            MemoryDirectory::new(),
            &settings::Authz::default(),
        );
        let facts = vec![
            RoleFact::new(EntityRef::user(1), Role::Owner, EntityRef::profile(1)),
            RoleFact::new(EntityRef::user(1), Role::Coworker, EntityRef::profile(2)),
        ];
        let report = sync.apply_batch(facts).await;
        assert_eq!(report.applied, 1);
        assert_eq!(report.failed, 1);

        let plain = SyncEngine::new(
            Arc::new(MemoryFactStore::new()),
            MemoryDirectory::new(),
            &settings::Authz::default(),
        );
        let report = plain
            .apply_batch(vec![RoleFact::new(
                EntityRef::user(1),
                Role::Owner,
                EntityRef::profile(1),
            )])
            .await;
        assert_eq!(report.applied, 1);
    }

    #[tokio::test]
    async fn test_concurrent_updates_for_one_user_serialize() {
        let org = Arc::new(org(FanOut::Materialized));
        let acme = org.dir.add_company("Acme");
        let john = org.hire(acme.id, "John", UserRole::Ceo, None).await;
        let alice = org.hire(acme.id, "Alice", UserRole::Employee, None).await;

        let mut with_manager = alice.clone();
        with_manager.manager_id = Some(john.id);
        org.dir.update_user(with_manager.clone());

        let a = {
            let org = org.clone();
            let (old, new) = (alice.clone(), with_manager.clone());
            tokio::spawn(async move { org.sync.on_user_manager_changed(&old, &new).await })
        };
        let b = {
            let org = org.clone();
            let (old, new) = (alice.clone(), with_manager.clone());
            tokio::spawn(async move { org.sync.on_user_updated(&old, &new).await })
        };
        assert!(a.await.unwrap().is_clean());
        assert!(b.await.unwrap().is_clean());
        assert!(org.can(&john, Action::ViewSensitive, profile(&alice)).await);
    }

    #[tokio::test]
    async fn test_later_write_cancels_deferred_op() {
        let org = org(FanOut::Materialized);
        let acme = org.dir.add_company("Acme");
        let john = org.hire(acme.id, "John", UserRole::Ceo, None).await;
        let sarah = org.hire(acme.id, "Sarah", UserRole::Manager, Some(john.id)).await;
        let mike = org.hire(acme.id, "Mike", UserRole::Manager, Some(john.id)).await;

        org.store.fail_role(Some(Role::Manager));
        let alice = org.dir.add_user(acme.id, "Alice", UserRole::Employee, Some(sarah.id));
        let report = org.sync.on_user_created(&alice).await;
        assert_eq!(report.failed, 1);
        assert_eq!(org.sync.deferred_count().await, 1);
        org.store.fail_role(None);

        let mut moved = alice.clone();
        moved.manager_id = Some(mike.id);
        let old = org.dir.update_user(moved.clone());
        assert!(org.sync.on_user_updated(&old, &moved).await.is_clean());
        assert_eq!(org.sync.deferred_count().await, 0);

        let retry = org.sync.retry_deferred().await;
        assert_eq!(retry, SyncReport::default());
        assert!(!org.can(&sarah, Action::ViewSensitive, profile(&alice)).await);
        assert!(org.can(&mike, Action::ViewSensitive, profile(&alice)).await);
    }

    #[tokio::test]
    async fn test_outbox_cancel() {
        let outbox = Outbox::new(4);
        let f = |id| RoleFact::new(EntityRef::user(id), Role::Owner, EntityRef::profile(id));
        outbox.push(FactOp::Insert(f(1))).await;
        outbox.push(FactOp::Delete(f(2))).await;

        assert!(outbox.cancel(&f(1)).await);
        assert!(!outbox.cancel(&f(1)).await);
        assert!(!outbox.cancel(&f(3)).await);
        assert_eq!(outbox.drain().await, vec![FactOp::Delete(f(2))]);
    }

    #[tokio::test]
    async fn test_concurrent_changes_on_different_users_keep_approvers() {
        let org = Arc::new(org(FanOut::Materialized));
        let acme = org.dir.add_company("Acme");
        let john = org.hire(acme.id, "John", UserRole::Ceo, None).await;
        let sarah = org.hire(acme.id, "Sarah", UserRole::Manager, Some(john.id)).await;
        let mike = org.hire(acme.id, "Mike", UserRole::Manager, Some(john.id)).await;
        let alice = org.hire(acme.id, "Alice", UserRole::Employee, Some(sarah.id)).await;
        let bob = org.hire(acme.id, "Bob", UserRole::Employee, None).await;
        let req = org.request(&alice).await;

        let mut moved = alice.clone();
        moved.manager_id = Some(mike.id);
        let old_alice = org.dir.update_user(moved.clone());
        let mut promoted = bob.clone();
        promoted.role = UserRole::Ceo;
        let old_bob = org.dir.update_user(promoted.clone());

        let a = {
            let org = org.clone();
            tokio::spawn(async move { org.sync.on_user_updated(&old_alice, &moved).await })
        };
        let b = {
            let org = org.clone();
            tokio::spawn(async move { org.sync.on_user_updated(&old_bob, &promoted).await })
        };
        assert!(a.await.unwrap().is_clean());
        assert!(b.await.unwrap().is_clean());

        let approvers = org
            .eval
            .expand(Action::Approve, &pending(&req))
            .await
            .unwrap();
        assert_eq!(
            approvers,
            vec![
                EntityRef::user(john.id),
                EntityRef::user(mike.id),
                EntityRef::user(bob.id)
            ]
        );
    }
}
