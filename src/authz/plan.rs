//! Pure functions from organization state to the role facts it implies.
//! Sync handlers turn these into insert/delete operations; the audit
//! compares them with what the store holds.

use std::collections::BTreeSet;
use std::fmt;

use crate::authz::types::{EntityRef, Role, RoleFact};
use crate::model::{Company, TimeOffRequest, User};
use crate::settings::FanOut;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FactOp {
    Insert(RoleFact),
    Delete(RoleFact),
}

impl FactOp {
    pub fn fact(&self) -> &RoleFact {
        match self {
            FactOp::Insert(fact) | FactOp::Delete(fact) => fact,
        }
    }
}

impl fmt::Display for FactOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FactOp::Insert(fact) => write!(f, "+({fact})"),
            FactOp::Delete(fact) => write!(f, "-({fact})"),
        }
    }
}

fn user_ref(user: &User) -> EntityRef {
    EntityRef::user(user.id)
}

fn profile_ref(user: &User) -> EntityRef {
    EntityRef::profile(user.id)
}

pub fn organization_fact(company: &Company) -> RoleFact {
    let company = EntityRef::company(company.id);
    RoleFact::new(company.clone(), Role::Organization, company)
}

/// Ownership, company membership and the manager pair of one user.
pub fn membership_facts(user: &User, manager: Option<&User>) -> Vec<RoleFact> {
    let company = EntityRef::company(user.company_id);
    let mut facts = vec![
        RoleFact::new(user_ref(user), Role::Owner, profile_ref(user)),
        RoleFact::new(user_ref(user), Role::Employee, company.clone()),
    ];
    if user.is_ceo() {
        facts.push(RoleFact::new(user_ref(user), Role::Ceo, company));
    }
    if let Some(manager) = manager.filter(|m| m.id != user.id) {
        facts.extend(manager_pair(user, manager));
    }
    facts
}

fn manager_pair(user: &User, manager: &User) -> [RoleFact; 2] {
    [
        RoleFact::new(user_ref(user), Role::Employee, user_ref(manager)),
        RoleFact::new(user_ref(manager), Role::Manager, profile_ref(user)),
    ]
}

/// Per-profile coworker and ceo facts between `user` and the other members.
/// Empty in derived mode.
pub fn fan_out_facts(user: &User, members: &[User], fan_out: FanOut) -> Vec<RoleFact> {
    if fan_out == FanOut::Derived {
        return Vec::new();
    }
    let mut facts = Vec::new();
    for other in members.iter().filter(|o| o.id != user.id) {
        facts.push(RoleFact::new(user_ref(user), Role::Coworker, profile_ref(other)));
        facts.push(RoleFact::new(user_ref(other), Role::Coworker, profile_ref(user)));
        if user.is_ceo() {
            facts.push(RoleFact::new(user_ref(user), Role::Ceo, profile_ref(other)));
        }
        if other.is_ceo() {
            facts.push(RoleFact::new(user_ref(other), Role::Ceo, profile_ref(user)));
        }
    }
    facts
}

/// Everyone who may approve a request: the owner's full manager chain and
/// every CEO of the company, a requesting CEO included.
pub fn approvers(chain: &[User], ceos: &[User]) -> BTreeSet<EntityRef> {
    chain.iter().chain(ceos.iter()).map(user_ref).collect()
}

pub fn approver_facts(request: &TimeOffRequest, chain: &[User], ceos: &[User]) -> BTreeSet<RoleFact> {
    let resource = EntityRef::request(request.id);
    approvers(chain, ceos)
        .into_iter()
        .map(|a| RoleFact::new(a, Role::Approver, resource.clone()))
        .collect()
}

pub fn request_facts(request: &TimeOffRequest, chain: &[User], ceos: &[User]) -> Vec<RoleFact> {
    let mut facts = vec![RoleFact::new(
        EntityRef::user(request.user_id),
        Role::Owner,
        EntityRef::request(request.id),
    )];
    facts.extend(approver_facts(request, chain, ceos));
    facts
}

fn inserts(facts: impl IntoIterator<Item = RoleFact>) -> Vec<FactOp> {
    let mut seen = BTreeSet::new();
    facts
        .into_iter()
        .filter(|f| seen.insert(f.clone()))
        .map(FactOp::Insert)
        .collect()
}

pub fn company_created(company: &Company) -> Vec<FactOp> {
    vec![FactOp::Insert(organization_fact(company))]
}

/// `members` may include `user` itself.
pub fn user_created(
    user: &User,
    members: &[User],
    manager: Option<&User>,
    fan_out: FanOut,
) -> Vec<FactOp> {
    let mut facts = membership_facts(user, manager);
    facts.extend(fan_out_facts(user, members, fan_out));
    inserts(facts)
}

/// Crossing the ceo boundary adds or retracts the company ceo fact and, in
/// materialized mode, the ceo fact over every other member's profile.
pub fn role_changed(old: &User, new: &User, members: &[User], fan_out: FanOut) -> Vec<FactOp> {
    if old.is_ceo() == new.is_ceo() {
        return Vec::new();
    }
    let mut facts = vec![RoleFact::new(
        user_ref(new),
        Role::Ceo,
        EntityRef::company(new.company_id),
    )];
    if fan_out == FanOut::Materialized {
        facts.extend(
            members
                .iter()
                .filter(|o| o.id != new.id)
                .map(|o| RoleFact::new(user_ref(new), Role::Ceo, profile_ref(o))),
        );
    }
    if new.is_ceo() {
        inserts(facts)
    } else {
        facts.into_iter().map(FactOp::Delete).collect()
    }
}

/// Retracts the old employee/manager pair and inserts the new one.
/// `new_manager` is `None` when the user no longer has a (resolvable) manager.
pub fn manager_changed(old: &User, new: &User, new_manager: Option<&User>) -> Vec<FactOp> {
    if old.manager_id == new.manager_id {
        return Vec::new();
    }
    let mut ops = Vec::new();
    if let Some(old_manager) = old.manager_id {
        ops.push(FactOp::Delete(RoleFact::new(
            user_ref(new),
            Role::Employee,
            EntityRef::user(old_manager),
        )));
        ops.push(FactOp::Delete(RoleFact::new(
            EntityRef::user(old_manager),
            Role::Manager,
            profile_ref(new),
        )));
    }
    if let Some(manager) = new_manager.filter(|m| m.id != new.id) {
        ops.extend(manager_pair(new, manager).into_iter().map(FactOp::Insert));
    }
    ops
}

pub fn request_created(request: &TimeOffRequest, chain: &[User], ceos: &[User]) -> Vec<FactOp> {
    inserts(request_facts(request, chain, ceos))
}

/// Operations turning `actual` into `expected`: deletes first, then inserts.
pub fn diff(actual: &BTreeSet<RoleFact>, expected: &BTreeSet<RoleFact>) -> Vec<FactOp> {
    actual
        .difference(expected)
        .cloned()
        .map(FactOp::Delete)
        .chain(expected.difference(actual).cloned().map(FactOp::Insert))
        .collect()
}
