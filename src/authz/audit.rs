use std::collections::BTreeSet;

use serde::Serialize;

use crate::authz::errors::AuthzError;
use crate::authz::plan::{self, FactOp};
use crate::authz::sync::{SyncEngine, SyncReport};
use crate::authz::types::{EntityRef, FactPattern, RoleFact};
use crate::model::{Company, CompanyId, TimeOffRequest, User};

/// Drift between the facts a company implies and the facts stored for it.
#[derive(Debug, Clone, Default, Serialize)]
pub struct AuditReport {
    pub company_id: CompanyId,
    pub expected: usize,
    pub missing: Vec<RoleFact>,
    pub stale: Vec<RoleFact>,
    /// Writes done to repair the drift; zero for a plain audit.
    pub repair: SyncReport,
}

impl AuditReport {
    pub fn is_consistent(&self) -> bool {
        self.missing.is_empty() && self.stale.is_empty()
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ReconcileSummary {
    pub companies: usize,
    pub failed_companies: usize,
    pub missing: usize,
    pub stale: usize,
    pub repair: SyncReport,
}

struct CompanySnapshot {
    members: Vec<User>,
    requests: Vec<(TimeOffRequest, User)>,
}

impl SyncEngine {
    async fn snapshot(&self, company_id: CompanyId) -> Result<CompanySnapshot, AuthzError> {
        let members = self.directory.users_in_company(company_id).await?;
        let mut requests = Vec::new();
        for member in &members {
            for request in self.directory.requests_for_user(member.id).await? {
                requests.push((request, member.clone()));
            }
        }
        Ok(CompanySnapshot { members, requests })
    }

    async fn expected_facts(
        &self,
        company_id: CompanyId,
        snapshot: &CompanySnapshot,
    ) -> Result<BTreeSet<RoleFact>, AuthzError> {
        let members = &snapshot.members;
        let ceos: Vec<User> = members.iter().filter(|u| u.is_ceo()).cloned().collect();

        let mut expected = BTreeSet::new();
        expected.insert(plan::organization_fact(&Company {
            id: company_id,
            name: String::new(),
            created_at: 0,
        }));

        for member in members {
            let manager = match member.manager_id {
                Some(id) => match members.iter().find(|m| m.id == id) {
                    Some(m) => Some(m.clone()),
                    None => self.directory.user(id).await?,
                },
                None => None,
            };
            expected.extend(plan::membership_facts(member, manager.as_ref()));
            expected.extend(plan::fan_out_facts(member, members, self.fan_out));
        }

        for (request, owner) in &snapshot.requests {
            let chain = self.hierarchy.manager_chain(owner).await?;
            expected.extend(plan::request_facts(request, &chain, &ceos));
        }
        Ok(expected)
    }

    /// Every stored fact touching the company, its members or their requests.
    async fn observed_facts(
        &self,
        company_id: CompanyId,
        snapshot: &CompanySnapshot,
    ) -> Result<BTreeSet<RoleFact>, AuthzError> {
        let company = EntityRef::company(company_id);
        let mut patterns = vec![
            FactPattern::any().resource(company.clone()),
            FactPattern::any().subject(company),
        ];
        for member in &snapshot.members {
            patterns.push(FactPattern::any().subject(EntityRef::user(member.id)));
            patterns.push(FactPattern::any().resource(EntityRef::profile(member.id)));
        }
        for (request, _) in &snapshot.requests {
            patterns.push(FactPattern::any().resource(EntityRef::request(request.id)));
        }

        let mut observed = BTreeSet::new();
        for pattern in &patterns {
            observed.extend(self.timed_query(pattern).await?);
        }
        Ok(observed)
    }

    /// Compares expected and stored facts for one company without writing.
    pub async fn audit_company(&self, company_id: CompanyId) -> Result<AuditReport, AuthzError> {
        let snapshot = self.snapshot(company_id).await?;
        let expected = self.expected_facts(company_id, &snapshot).await?;
        let observed = self.observed_facts(company_id, &snapshot).await?;

        Ok(AuditReport {
            company_id,
            expected: expected.len(),
            missing: expected.difference(&observed).cloned().collect(),
            stale: observed.difference(&expected).cloned().collect(),
            repair: SyncReport::default(),
        })
    }

    /// Audits one company and writes the missing facts and removes the stale ones.
    pub async fn reconcile_company(&self, company_id: CompanyId) -> Result<AuditReport, AuthzError> {
        let mut report = self.audit_company(company_id).await?;
        if report.is_consistent() {
            tracing::debug!(company_id, facts = report.expected, "facts consistent");
            return Ok(report);
        }

        tracing::info!(
            company_id,
            missing = report.missing.len(),
            stale = report.stale.len(),
            "repairing fact drift"
        );
        let mut repair = self
            .apply(report.stale.iter().cloned().map(FactOp::Delete).collect())
            .await;
        repair.merge(self.apply_batch(report.missing.clone()).await);
        report.repair = repair;
        Ok(report)
    }

    /// Reconciles every company. A company whose audit fails is logged and
    /// skipped; only failing to list companies is an error.
    pub async fn reconcile_all(&self) -> Result<ReconcileSummary, AuthzError> {
        let mut summary = ReconcileSummary::default();
        for company in self.directory.companies().await? {
            summary.companies += 1;
            match self.reconcile_company(company.id).await {
                Ok(report) => {
                    summary.missing += report.missing.len();
                    summary.stale += report.stale.len();
                    summary.repair.merge(report.repair);
                }
                Err(e) => {
                    tracing::warn!(company_id = company.id, error = %e, "reconcile failed");
                    summary.failed_companies += 1;
                }
            }
        }
        tracing::info!(
            companies = summary.companies,
            missing = summary.missing,
            stale = summary.stale,
            "reconcile finished"
        );
        Ok(summary)
    }
}
