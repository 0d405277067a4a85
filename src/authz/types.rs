use serde::{Deserialize, Serialize, Serializer};
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::str::FromStr;

use crate::authz::errors::AuthzError;
use crate::model::{CompanyId, RequestId, RequestStatus, UserId};

/// Kinds of things that appear on either side of a role fact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EntityKind {
    User,
    Profile,
    Company,
    TimeOffRequest,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::User => "User",
            EntityKind::Profile => "Profile",
            EntityKind::Company => "Company",
            EntityKind::TimeOffRequest => "TimeOffRequest",
        }
    }
}

impl FromStr for EntityKind {
    type Err = AuthzError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "User" => Ok(EntityKind::User),
            "Profile" => Ok(EntityKind::Profile),
            "Company" => Ok(EntityKind::Company),
            "TimeOffRequest" => Ok(EntityKind::TimeOffRequest),
            other => Err(AuthzError::InvalidReference(format!(
                "unknown entity type `{other}`"
            ))),
        }
    }
}

/// Reference to an entity: "Kind/id", e.g. "Profile/42".
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntityRef {
    pub kind: EntityKind,
    pub id: String,
}

impl EntityRef {
    pub fn new(kind: EntityKind, id: impl Into<String>) -> Self {
        Self {
            kind,
            id: id.into(),
        }
    }

    pub fn user(id: UserId) -> Self {
        Self::new(EntityKind::User, id.to_string())
    }

    /// A user's profile shares the user's id.
    pub fn profile(owner: UserId) -> Self {
        Self::new(EntityKind::Profile, owner.to_string())
    }

    pub fn company(id: CompanyId) -> Self {
        Self::new(EntityKind::Company, id.to_string())
    }

    pub fn request(id: RequestId) -> Self {
        Self::new(EntityKind::TimeOffRequest, id.to_string())
    }

    pub fn parse(s: &str) -> Option<Self> {
        let (kind, id) = s.split_once('/')?;
        if kind.is_empty() || id.is_empty() || id.contains('/') {
            return None;
        }
        Some(Self {
            kind: kind.parse().ok()?,
            id: id.to_string(),
        })
    }

    /// Numeric id for references created from database rows.
    pub fn numeric_id(&self) -> Option<i64> {
        self.id.parse().ok()
    }
}

impl fmt::Display for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.kind.as_str(), self.id)
    }
}

impl Serialize for EntityRef {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Owner,
    Employee,
    Manager,
    Ceo,
    Coworker,
    Approver,
    Organization,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Owner => "owner",
            Role::Employee => "employee",
            Role::Manager => "manager",
            Role::Ceo => "ceo",
            Role::Coworker => "coworker",
            Role::Approver => "approver",
            Role::Organization => "organization",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = AuthzError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "owner" => Ok(Role::Owner),
            "employee" => Ok(Role::Employee),
            "manager" => Ok(Role::Manager),
            "ceo" => Ok(Role::Ceo),
            "coworker" => Ok(Role::Coworker),
            "approver" => Ok(Role::Approver),
            "organization" => Ok(Role::Organization),
            other => Err(AuthzError::InvalidReference(format!("unknown role `{other}`"))),
        }
    }
}

/// `subject` holds `role` over `resource`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct RoleFact {
    pub subject: EntityRef,
    pub role: Role,
    pub resource: EntityRef,
}

impl RoleFact {
    pub fn new(subject: EntityRef, role: Role, resource: EntityRef) -> Self {
        Self {
            subject,
            role,
            resource,
        }
    }
}

impl fmt::Display for RoleFact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.subject, self.role, self.resource)
    }
}

/// Flat tuple form of a fact, used on the wire and in the `role_facts` table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlatFact {
    pub subject_type: String,
    pub subject_id: String,
    pub role: String,
    pub resource_type: String,
    pub resource_id: String,
}

impl From<&RoleFact> for FlatFact {
    fn from(fact: &RoleFact) -> Self {
        Self {
            subject_type: fact.subject.kind.as_str().to_string(),
            subject_id: fact.subject.id.clone(),
            role: fact.role.as_str().to_string(),
            resource_type: fact.resource.kind.as_str().to_string(),
            resource_id: fact.resource.id.clone(),
        }
    }
}

impl TryFrom<FlatFact> for RoleFact {
    type Error = AuthzError;

    fn try_from(flat: FlatFact) -> Result<Self, Self::Error> {
        if flat.subject_id.is_empty() || flat.resource_id.is_empty() {
            return Err(AuthzError::InvalidReference(
                "fact ids must not be empty".into(),
            ));
        }
        Ok(RoleFact {
            subject: EntityRef::new(flat.subject_type.parse()?, flat.subject_id),
            role: flat.role.parse()?,
            resource: EntityRef::new(flat.resource_type.parse()?, flat.resource_id),
        })
    }
}

/// Matches one side of a fact.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum RefPattern {
    #[default]
    Any,
    Kind(EntityKind),
    Exact(EntityRef),
}

impl RefPattern {
    pub fn matches(&self, entity: &EntityRef) -> bool {
        match self {
            RefPattern::Any => true,
            RefPattern::Kind(kind) => entity.kind == *kind,
            RefPattern::Exact(exact) => exact == entity,
        }
    }

    /// Accepts "*", "Kind", "Kind/*" or "Kind/id".
    pub fn parse(s: &str) -> Result<Self, AuthzError> {
        if s == "*" {
            return Ok(RefPattern::Any);
        }
        match s.split_once('/') {
            None => Ok(RefPattern::Kind(s.parse()?)),
            Some((kind, "*")) => Ok(RefPattern::Kind(kind.parse()?)),
            Some(_) => EntityRef::parse(s).map(RefPattern::Exact).ok_or_else(|| {
                AuthzError::InvalidReference(format!(
                    "invalid entity reference `{s}` (expected \"Kind/id\")"
                ))
            }),
        }
    }
}

/// Query over the fact set; unset parts match anything.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FactPattern {
    pub subject: RefPattern,
    pub role: Option<Role>,
    pub resource: RefPattern,
}

impl FactPattern {
    pub fn any() -> Self {
        Self::default()
    }

    pub fn exact(fact: &RoleFact) -> Self {
        Self {
            subject: RefPattern::Exact(fact.subject.clone()),
            role: Some(fact.role),
            resource: RefPattern::Exact(fact.resource.clone()),
        }
    }

    pub fn subject(mut self, subject: EntityRef) -> Self {
        self.subject = RefPattern::Exact(subject);
        self
    }

    pub fn role(mut self, role: Role) -> Self {
        self.role = Some(role);
        self
    }

    pub fn resource(mut self, resource: EntityRef) -> Self {
        self.resource = RefPattern::Exact(resource);
        self
    }

    pub fn resource_kind(mut self, kind: EntityKind) -> Self {
        self.resource = RefPattern::Kind(kind);
        self
    }

    pub fn matches(&self, fact: &RoleFact) -> bool {
        self.subject.matches(&fact.subject)
            && self.role.map_or(true, |r| r == fact.role)
            && self.resource.matches(&fact.resource)
    }
}

/// Fact set indexed by subject and by resource for fast lookup.
#[derive(Debug, Clone, Default)]
pub struct FactIndex {
    by_resource: HashMap<EntityRef, BTreeSet<RoleFact>>,
    by_subject: HashMap<EntityRef, BTreeSet<RoleFact>>,
}

impl FactIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns false if the fact was already present.
    pub fn insert(&mut self, fact: RoleFact) -> bool {
        let added = self
            .by_subject
            .entry(fact.subject.clone())
            .or_default()
            .insert(fact.clone());
        if added {
            self.by_resource
                .entry(fact.resource.clone())
                .or_default()
                .insert(fact);
        }
        added
    }

    /// Returns false if the fact was not present.
    pub fn remove(&mut self, fact: &RoleFact) -> bool {
        let removed = remove_from(&mut self.by_subject, &fact.subject, fact);
        if removed {
            remove_from(&mut self.by_resource, &fact.resource, fact);
        }
        removed
    }

    pub fn contains(&self, fact: &RoleFact) -> bool {
        self.by_subject
            .get(&fact.subject)
            .is_some_and(|facts| facts.contains(fact))
    }

    pub fn query(&self, pattern: &FactPattern) -> BTreeSet<RoleFact> {
        let candidates: Box<dyn Iterator<Item = &RoleFact>> =
            match (&pattern.resource, &pattern.subject) {
                (RefPattern::Exact(resource), _) => Box::new(
                    self.by_resource
                        .get(resource)
                        .into_iter()
                        .flat_map(|facts| facts.iter()),
                ),
                (_, RefPattern::Exact(subject)) => Box::new(
                    self.by_subject
                        .get(subject)
                        .into_iter()
                        .flat_map(|facts| facts.iter()),
                ),
                _ => Box::new(self.by_subject.values().flat_map(|facts| facts.iter())),
            };
        candidates
            .filter(|fact| pattern.matches(fact))
            .cloned()
            .collect()
    }

    pub fn fact_count(&self) -> usize {
        self.by_subject.values().map(|v| v.len()).sum()
    }
}

fn remove_from(
    map: &mut HashMap<EntityRef, BTreeSet<RoleFact>>,
    key: &EntityRef,
    fact: &RoleFact,
) -> bool {
    let Some(facts) = map.get_mut(key) else {
        return false;
    };
    let removed = facts.remove(fact);
    if facts.is_empty() {
        map.remove(key);
    }
    removed
}

/// Operations the policy evaluator understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    ViewBasic,
    ViewSensitive,
    View,
    Approve,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::ViewBasic => "view_basic",
            Action::ViewSensitive => "view_sensitive",
            Action::View => "view",
            Action::Approve => "approve",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Action {
    type Err = AuthzError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "view_basic" => Ok(Action::ViewBasic),
            "view_sensitive" => Ok(Action::ViewSensitive),
            "view" => Ok(Action::View),
            "approve" => Ok(Action::Approve),
            other => Err(AuthzError::InvalidReference(format!(
                "unknown action `{other}`"
            ))),
        }
    }
}

/// Object of an authorization check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resource {
    Profile { owner: UserId },
    TimeOffRequest { id: RequestId, status: RequestStatus },
    Company { id: CompanyId },
}

impl Resource {
    pub fn entity_ref(&self) -> EntityRef {
        match self {
            Resource::Profile { owner } => EntityRef::profile(*owner),
            Resource::TimeOffRequest { id, .. } => EntityRef::request(*id),
            Resource::Company { id } => EntityRef::company(*id),
        }
    }
}

// ---------- API request/response types ----------

#[derive(Debug, Deserialize)]
pub struct CheckRequest {
    /// e.g. "User/7"
    pub principal: String,
    /// e.g. "view_sensitive"
    pub action: String,
    /// e.g. "Profile/12" or "TimeOffRequest/3"
    pub resource: String,
}

#[derive(Debug, Serialize)]
pub struct CheckResponse {
    pub allowed: bool,
}

#[derive(Debug, Deserialize)]
pub struct ExpandRequest {
    pub action: String,
    pub resource: String,
}

#[derive(Debug, Serialize)]
pub struct ExpandResponse {
    pub subjects: Vec<String>,
}

/// Query string of `GET /v1/facts`; each part accepts a `RefPattern`.
#[derive(Debug, Default, Deserialize)]
pub struct FactQuery {
    pub subject: Option<String>,
    pub role: Option<String>,
    pub resource: Option<String>,
}

impl FactQuery {
    pub fn to_pattern(&self) -> Result<FactPattern, AuthzError> {
        Ok(FactPattern {
            subject: self
                .subject
                .as_deref()
                .map(RefPattern::parse)
                .transpose()?
                .unwrap_or_default(),
            role: self.role.as_deref().map(str::parse).transpose()?,
            resource: self
                .resource
                .as_deref()
                .map(RefPattern::parse)
                .transpose()?
                .unwrap_or_default(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fact(subject: EntityRef, role: Role, resource: EntityRef) -> RoleFact {
        RoleFact::new(subject, role, resource)
    }

    #[test]
    fn test_entity_ref_parse() {
        let r = EntityRef::parse("Profile/42").unwrap();
        assert_eq!(r.kind, EntityKind::Profile);
        assert_eq!(r.id, "42");
        assert_eq!(r.numeric_id(), Some(42));
        assert_eq!(r.to_string(), "Profile/42");

        assert!(EntityRef::parse("noslash").is_none());
        assert!(EntityRef::parse("/42").is_none());
        assert!(EntityRef::parse("Profile/").is_none());
        assert!(EntityRef::parse("Vm/1").is_none());
        assert!(EntityRef::parse("User/1/2").is_none());
    }

    #[test]
    fn test_flat_fact_conversion() {
        let f = fact(EntityRef::user(3), Role::Manager, EntityRef::profile(7));
        let flat = FlatFact::from(&f);
        assert_eq!(flat.subject_type, "User");
        assert_eq!(flat.role, "manager");
        assert_eq!(flat.resource_id, "7");
        assert_eq!(RoleFact::try_from(flat).unwrap(), f);

        let bad = FlatFact {
            subject_type: "User".into(),
            subject_id: "3".into(),
            role: "overlord".into(),
            resource_type: "Profile".into(),
            resource_id: "7".into(),
        };
        assert!(matches!(
            RoleFact::try_from(bad),
            Err(AuthzError::InvalidReference(_))
        ));
    }

    #[test]
    fn test_ref_pattern_parse() {
        assert_eq!(RefPattern::parse("*").unwrap(), RefPattern::Any);
        assert_eq!(
            RefPattern::parse("Profile").unwrap(),
            RefPattern::Kind(EntityKind::Profile)
        );
        assert_eq!(
            RefPattern::parse("Company/*").unwrap(),
            RefPattern::Kind(EntityKind::Company)
        );
        assert_eq!(
            RefPattern::parse("User/9").unwrap(),
            RefPattern::Exact(EntityRef::user(9))
        );
        assert!(RefPattern::parse("Widget/1").is_err());
    }

    #[test]
    fn test_fact_index_is_a_set() {
        let mut idx = FactIndex::new();
        let f = fact(EntityRef::user(1), Role::Owner, EntityRef::profile(1));
        assert!(idx.insert(f.clone()));
        assert!(!idx.insert(f.clone()));
        assert_eq!(idx.fact_count(), 1);

        assert!(idx.remove(&f));
        assert!(!idx.remove(&f));
        assert_eq!(idx.fact_count(), 0);
        assert!(idx.query(&FactPattern::any()).is_empty());
    }

    #[test]
    fn test_fact_index_query_patterns() {
        let mut idx = FactIndex::new();
        idx.insert(fact(EntityRef::user(1), Role::Owner, EntityRef::profile(1)));
        idx.insert(fact(EntityRef::user(2), Role::Manager, EntityRef::profile(1)));
        idx.insert(fact(EntityRef::user(2), Role::Employee, EntityRef::company(5)));
        idx.insert(fact(EntityRef::user(1), Role::Employee, EntityRef::company(5)));

        let on_profile = idx.query(&FactPattern::any().resource(EntityRef::profile(1)));
        assert_eq!(on_profile.len(), 2);

        let by_user_two = idx.query(&FactPattern::any().subject(EntityRef::user(2)));
        assert_eq!(by_user_two.len(), 2);

        let memberships = idx.query(
            &FactPattern::any()
                .role(Role::Employee)
                .resource_kind(EntityKind::Company),
        );
        assert_eq!(memberships.len(), 2);

        let managers = idx.query(&FactPattern::any().role(Role::Manager));
        assert_eq!(managers.len(), 1);
        assert!(idx.contains(&fact(
            EntityRef::user(2),
            Role::Manager,
            EntityRef::profile(1)
        )));
    }

    #[test]
    fn test_fact_query_to_pattern() {
        let q = FactQuery {
            subject: Some("User/4".into()),
            role: Some("approver".into()),
            resource: Some("TimeOffRequest".into()),
        };
        let p = q.to_pattern().unwrap();
        assert_eq!(p.subject, RefPattern::Exact(EntityRef::user(4)));
        assert_eq!(p.role, Some(Role::Approver));
        assert_eq!(p.resource, RefPattern::Kind(EntityKind::TimeOffRequest));

        assert_eq!(FactQuery::default().to_pattern().unwrap(), FactPattern::any());
    }

    #[test]
    fn test_role_fact_serializes_with_string_refs() {
        let manager = fact(EntityRef::user(2), Role::Manager, EntityRef::profile(1));
        assert_eq!(
            serde_json::to_value(&manager).unwrap(),
            serde_json::json!({ "subject": "User/2", "role": "manager", "resource": "Profile/1" })
        );
        assert_eq!(
            serde_json::to_string(&EntityRef::request(7)).unwrap(),
            "\"TimeOffRequest/7\""
        );
    }
}
