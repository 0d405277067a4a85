//! HR operations. Each one checks authorization through the core, persists
//! through `storage`, and then hands the change to the sync engine. Sync
//! problems never fail the operation; they are deferred and reconciled.

use chrono::{Local, NaiveDate};
use sea_orm::DatabaseConnection;
use serde::{Deserialize, Serialize};

use crate::authz::types::{Action, Resource};
use crate::authz::Authz;
use crate::errors::OrgError;
use crate::model::{
    Company, CompanyId, NewTimeOffRequest, NewUser, Profile, RequestId, RequestStatus,
    TimeOffRequest, User, UserId, UserRole,
};
use crate::storage;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileUpdate {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub location: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestInput {
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    pub reason: Option<String>,
}

/// A request with the names callers display next to it.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestView {
    #[serde(flatten)]
    pub request: TimeOffRequest,
    pub user_name: String,
    pub user_email: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub approver_name: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Approve,
    Reject,
}

impl Decision {
    fn status(self) -> RequestStatus {
        match self {
            Decision::Approve => RequestStatus::Approved,
            Decision::Reject => RequestStatus::Rejected,
        }
    }

    fn verb(self) -> &'static str {
        match self {
            Decision::Approve => "approve",
            Decision::Reject => "reject",
        }
    }
}

#[derive(Clone)]
pub struct HrService {
    db: DatabaseConnection,
    authz: Authz,
}

fn required(value: &str, what: &str) -> Result<(), OrgError> {
    if value.trim().is_empty() {
        return Err(OrgError::BadRequest(format!("{what} is required")));
    }
    Ok(())
}

fn parse_date(value: &str) -> Result<NaiveDate, OrgError> {
    // accept full timestamps too, only the date part matters
    let day = value.get(..10).unwrap_or(value);
    NaiveDate::parse_from_str(day, "%Y-%m-%d")
        .map_err(|_| OrgError::BadRequest("Invalid date format".into()))
}

/// Validates a request's dates against `today`.
pub fn validate_dates(
    input: &RequestInput,
    today: NaiveDate,
) -> Result<(NaiveDate, NaiveDate), OrgError> {
    let (Some(start), Some(end)) = (input.start_date.as_deref(), input.end_date.as_deref()) else {
        return Err(OrgError::BadRequest(
            "Start date and end date are required".into(),
        ));
    };
    let start = parse_date(start)?;
    let end = parse_date(end)?;
    if start > end {
        return Err(OrgError::BadRequest(
            "End date must be on or after start date".into(),
        ));
    }
    if start < today {
        return Err(OrgError::BadRequest(
            "Cannot request time off for past dates".into(),
        ));
    }
    Ok((start, end))
}

impl HrService {
    pub fn new(db: DatabaseConnection, authz: Authz) -> Self {
        Self { db, authz }
    }

    pub fn authz(&self) -> &Authz {
        &self.authz
    }

    // ---------- companies ----------

    pub async fn create_company(&self, name: &str) -> Result<Company, OrgError> {
        required(name, "Company name")?;
        let company = storage::create_company(&self.db, name.trim()).await?;
        tracing::info!(company_id = company.id, name = %company.name, "company created");
        self.authz.sync.on_company_created(&company).await;
        Ok(company)
    }

    pub async fn list_companies(&self) -> Result<Vec<Company>, OrgError> {
        storage::list_companies(&self.db).await
    }

    pub async fn get_company(&self, id: CompanyId) -> Result<Company, OrgError> {
        storage::get_company(&self.db, id)
            .await?
            .ok_or_else(|| OrgError::NotFound("Company".into()))
    }

    /// Basic profiles of a company's members, for members of that company.
    pub async fn company_users(
        &self,
        actor: &User,
        company_id: CompanyId,
    ) -> Result<Vec<Profile>, OrgError> {
        self.get_company(company_id).await?;
        let company = Resource::Company { id: company_id };
        if !self.authz.authorize(actor.id, Action::View, &company).await {
            return Err(OrgError::Forbidden("Access denied".into()));
        }
        let members = storage::users_in_company(&self.db, company_id).await?;
        Ok(members.iter().map(User::basic_profile).collect())
    }

    // ---------- users ----------

    pub async fn create_user(&self, input: NewUser) -> Result<User, OrgError> {
        required(&input.email, "Email")?;
        required(&input.first_name, "First name")?;
        required(&input.last_name, "Last name")?;

        if storage::get_user_by_email(&self.db, &input.email)
            .await?
            .is_some()
        {
            return Err(OrgError::Conflict("User already exists".into()));
        }
        if storage::get_company(&self.db, input.company_id)
            .await?
            .is_none()
        {
            return Err(OrgError::BadRequest("Company not found".into()));
        }
        if let Some(manager_id) = input.manager_id {
            self.check_manager(input.company_id, None, manager_id).await?;
        }

        let user = storage::create_user(&self.db, input).await?;
        tracing::info!(user_id = user.id, company_id = user.company_id, role = %user.role, "user created");
        self.authz.sync.on_user_created(&user).await;
        Ok(user)
    }

    pub async fn find_user(&self, id: UserId) -> Result<Option<User>, OrgError> {
        storage::get_user(&self.db, id).await
    }

    pub async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, OrgError> {
        storage::get_user_by_email(&self.db, email).await
    }

    async fn user(&self, id: UserId) -> Result<User, OrgError> {
        self.find_user(id)
            .await?
            .ok_or_else(|| OrgError::NotFound("User".into()))
    }

    /// The profile view `actor` may see of `user`; `None` when neither.
    async fn visible_profile(&self, actor: &User, user: &User) -> Option<Profile> {
        let resource = Resource::Profile { owner: user.id };
        if self
            .authz
            .authorize(actor.id, Action::ViewSensitive, &resource)
            .await
        {
            Some(user.sensitive_profile())
        } else if self.authz.authorize(actor.id, Action::ViewBasic, &resource).await {
            Some(user.basic_profile())
        } else {
            None
        }
    }

    /// Company members visible to `actor`, with sensitive fields where allowed.
    pub async fn list_users(&self, actor: &User) -> Result<Vec<Profile>, OrgError> {
        let members = storage::users_in_company(&self.db, actor.company_id).await?;
        let mut profiles = Vec::with_capacity(members.len());
        for member in &members {
            if let Some(profile) = self.visible_profile(actor, member).await {
                profiles.push(profile);
            }
        }
        Ok(profiles)
    }

    pub async fn get_user(&self, actor: &User, id: UserId) -> Result<Profile, OrgError> {
        let user = self.user(id).await?;
        self.visible_profile(actor, &user)
            .await
            .ok_or_else(|| OrgError::Forbidden("Access denied".into()))
    }

    pub async fn update_profile(
        &self,
        actor: &User,
        id: UserId,
        update: ProfileUpdate,
    ) -> Result<Profile, OrgError> {
        let user = self.user(id).await?;
        if actor.id != user.id {
            return Err(OrgError::Forbidden(
                "You can only update your own profile".into(),
            ));
        }
        if let Some(name) = &update.first_name {
            required(name, "First name")?;
        }
        if let Some(name) = &update.last_name {
            required(name, "Last name")?;
        }
        let updated = storage::update_user_profile(
            &self.db,
            id,
            update.first_name,
            update.last_name,
            update.location,
        )
        .await?;
        Ok(updated.sensitive_profile())
    }

    /// Role and manager changes need a CEO who can see the target's
    /// sensitive profile.
    async fn require_admin(&self, actor: &User, target: &User) -> Result<(), OrgError> {
        let resource = Resource::Profile { owner: target.id };
        if !actor.is_ceo()
            || !self
                .authz
                .authorize(actor.id, Action::ViewSensitive, &resource)
                .await
        {
            return Err(OrgError::Forbidden(
                "Only the CEO can change roles and managers".into(),
            ));
        }
        Ok(())
    }

    /// Rejects managers outside the company and links that would form a loop.
    async fn check_manager(
        &self,
        company_id: CompanyId,
        user_id: Option<UserId>,
        manager_id: UserId,
    ) -> Result<User, OrgError> {
        if Some(manager_id) == user_id {
            return Err(OrgError::BadRequest("A user cannot manage themselves".into()));
        }
        let manager = self
            .find_user(manager_id)
            .await?
            .filter(|m| m.company_id == company_id)
            .ok_or_else(|| OrgError::BadRequest("Manager not found in company".into()))?;
        if let Some(user_id) = user_id {
            let chain = self.authz.hierarchy.manager_chain(&manager).await?;
            if chain.iter().any(|u| u.id == user_id) {
                return Err(OrgError::BadRequest(
                    "Manager change would create a reporting cycle".into(),
                ));
            }
        }
        Ok(manager)
    }

    pub async fn change_role(
        &self,
        actor: &User,
        id: UserId,
        role: UserRole,
    ) -> Result<User, OrgError> {
        let target = self.user(id).await?;
        self.require_admin(actor, &target).await?;
        self.reassign(id, Some(role), None).await
    }

    pub async fn change_manager(
        &self,
        actor: &User,
        id: UserId,
        manager_id: Option<UserId>,
    ) -> Result<User, OrgError> {
        let target = self.user(id).await?;
        self.require_admin(actor, &target).await?;
        self.reassign(id, None, Some(manager_id)).await
    }

    /// Applies a role and/or manager change without an actor check and syncs
    /// facts. `manager: Some(None)` removes the manager.
    pub async fn reassign(
        &self,
        id: UserId,
        role: Option<UserRole>,
        manager: Option<Option<UserId>>,
    ) -> Result<User, OrgError> {
        let old = self.user(id).await?;
        let manager = manager.filter(|m| *m != old.manager_id);
        if let Some(Some(manager_id)) = manager {
            self.check_manager(old.company_id, Some(id), manager_id)
                .await?;
        }

        let mut new = old.clone();
        if let Some(role) = role.filter(|r| *r != old.role) {
            new = storage::update_user_role(&self.db, id, role).await?;
        }
        if let Some(manager_id) = manager {
            new = storage::update_user_manager(&self.db, id, manager_id).await?;
        }

        if new != old {
            tracing::info!(
                user_id = id,
                role = %new.role,
                manager_id = ?new.manager_id,
                "user reassigned"
            );
            self.authz.sync.on_user_updated(&old, &new).await;
        }
        Ok(new)
    }

    pub async fn reports(
        &self,
        actor: &User,
        id: UserId,
        transitive: bool,
    ) -> Result<Vec<Profile>, OrgError> {
        let user = self.user(id).await?;
        let resource = Resource::Profile { owner: user.id };
        if !self
            .authz
            .authorize(actor.id, Action::ViewSensitive, &resource)
            .await
        {
            return Err(OrgError::Forbidden(
                "You are not authorized to view reports for this user".into(),
            ));
        }
        let reports = if transitive {
            self.authz.hierarchy.all_reports(user.id).await?
        } else {
            self.authz.hierarchy.direct_reports(user.id).await?
        };
        Ok(reports.iter().map(User::sensitive_profile).collect())
    }

    // ---------- time-off requests ----------

    async fn view_of(&self, request: TimeOffRequest) -> Result<RequestView, OrgError> {
        let owner = self.find_user(request.user_id).await?;
        let approver = match request.approved_by {
            Some(id) => self.find_user(id).await?,
            None => None,
        };
        Ok(RequestView {
            user_name: owner.as_ref().map(User::full_name).unwrap_or_default(),
            user_email: owner.map(|u| u.email).unwrap_or_default(),
            approver_name: approver.as_ref().map(User::full_name),
            request,
        })
    }

    async fn views_of(&self, requests: Vec<TimeOffRequest>) -> Result<Vec<RequestView>, OrgError> {
        let mut views = Vec::with_capacity(requests.len());
        for request in requests {
            views.push(self.view_of(request).await?);
        }
        Ok(views)
    }

    fn resource(request: &TimeOffRequest) -> Resource {
        Resource::TimeOffRequest {
            id: request.id,
            status: request.status,
        }
    }

    /// Requests in the actor's company the actor may view.
    pub async fn list_requests(&self, actor: &User) -> Result<Vec<RequestView>, OrgError> {
        let requests = storage::requests_in_company(&self.db, actor.company_id).await?;
        let visible = self
            .authz
            .evaluator
            .authorize_many(actor.id, Action::View, requests, Self::resource)
            .await;
        self.views_of(visible).await
    }

    pub async fn my_requests(&self, actor: &User) -> Result<Vec<TimeOffRequest>, OrgError> {
        storage::requests_for_user(&self.db, actor.id).await
    }

    /// Pending requests in the actor's company the actor may approve.
    pub async fn pending_requests(&self, actor: &User) -> Result<Vec<RequestView>, OrgError> {
        let pending: Vec<_> = storage::requests_in_company(&self.db, actor.company_id)
            .await?
            .into_iter()
            .filter(|r| r.status == RequestStatus::Pending)
            .collect();
        let approvable = self
            .authz
            .evaluator
            .authorize_many(actor.id, Action::Approve, pending, Self::resource)
            .await;
        self.views_of(approvable).await
    }

    pub async fn create_request(
        &self,
        actor: &User,
        input: RequestInput,
    ) -> Result<TimeOffRequest, OrgError> {
        let (start_date, end_date) = validate_dates(&input, Local::now().date_naive())?;
        let request = storage::create_time_off_request(
            &self.db,
            NewTimeOffRequest {
                user_id: actor.id,
                start_date,
                end_date,
                reason: input.reason.unwrap_or_default(),
            },
        )
        .await?;
        tracing::info!(request_id = request.id, user_id = actor.id, "time-off request created");
        self.authz.sync.on_time_off_request_created(&request).await;
        Ok(request)
    }

    async fn request(&self, id: RequestId) -> Result<TimeOffRequest, OrgError> {
        storage::get_time_off_request(&self.db, id)
            .await?
            .ok_or_else(|| OrgError::NotFound("Time-off request".into()))
    }

    pub async fn get_request(&self, actor: &User, id: RequestId) -> Result<RequestView, OrgError> {
        let request = self.request(id).await?;
        if !self
            .authz
            .authorize(actor.id, Action::View, &Self::resource(&request))
            .await
        {
            return Err(OrgError::Forbidden("Access denied".into()));
        }
        self.view_of(request).await
    }

    /// Approves or rejects. Viewing is checked first, then the status, then
    /// the approve permission, so a processed request reports 400, not 403.
    pub async fn decide_request(
        &self,
        actor: &User,
        id: RequestId,
        decision: Decision,
    ) -> Result<RequestView, OrgError> {
        let request = self.request(id).await?;
        let denied = || {
            OrgError::Forbidden(format!(
                "You are not authorized to {} this request",
                decision.verb()
            ))
        };
        let resource = Self::resource(&request);
        if !self.authz.authorize(actor.id, Action::View, &resource).await {
            return Err(denied());
        }
        if request.status != RequestStatus::Pending {
            return Err(OrgError::BadRequest(
                "Request has already been processed".into(),
            ));
        }
        if !self.authz.authorize(actor.id, Action::Approve, &resource).await {
            return Err(denied());
        }

        let decided =
            storage::set_request_status(&self.db, id, decision.status(), actor.id).await?;
        tracing::info!(
            request_id = id,
            decided_by = actor.id,
            status = decided.status.as_str(),
            "time-off request decided"
        );
        self.view_of(decided).await
    }
}
