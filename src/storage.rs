use crate::entities;
use crate::errors::OrgError;
use crate::model::{
    Company, CompanyId, NewTimeOffRequest, NewUser, RequestId, RequestStatus, TimeOffRequest,
    User, UserId, UserRole,
};
use crate::settings::Database as DbCfg;
use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Database, DatabaseConnection, EntityTrait, IntoActiveModel,
    QueryFilter, QueryOrder, Set,
};
use sea_orm_migration::MigratorTrait;

pub async fn init(cfg: &DbCfg) -> Result<DatabaseConnection, OrgError> {
    let db = Database::connect(&cfg.url).await?;
    migration::Migrator::up(&db, None).await?;
    Ok(db)
}

// ---------- companies ----------

pub async fn create_company(db: &DatabaseConnection, name: &str) -> Result<Company, OrgError> {
    let company = entities::company::ActiveModel {
        name: Set(name.to_string()),
        created_at: Set(Utc::now().timestamp()),
        ..Default::default()
    };
    Ok(company.insert(db).await?.into())
}

pub async fn get_company(
    db: &DatabaseConnection,
    id: CompanyId,
) -> Result<Option<Company>, OrgError> {
    Ok(entities::Company::find_by_id(id)
        .one(db)
        .await?
        .map(Company::from))
}

pub async fn get_company_by_name(
    db: &DatabaseConnection,
    name: &str,
) -> Result<Option<Company>, OrgError> {
    use entities::company::Column;

    Ok(entities::Company::find()
        .filter(Column::Name.eq(name))
        .one(db)
        .await?
        .map(Company::from))
}

pub async fn list_companies(db: &DatabaseConnection) -> Result<Vec<Company>, OrgError> {
    use entities::company::Column;

    let models = entities::Company::find()
        .order_by_asc(Column::Name)
        .all(db)
        .await?;
    Ok(models.into_iter().map(Company::from).collect())
}

// ---------- users ----------

pub async fn create_user(db: &DatabaseConnection, input: NewUser) -> Result<User, OrgError> {
    let user = entities::user::ActiveModel {
        company_id: Set(input.company_id),
        email: Set(input.email),
        first_name: Set(input.first_name),
        last_name: Set(input.last_name),
        location: Set(input.location),
        manager_id: Set(input.manager_id),
        salary: Set(input.salary),
        ssn: Set(input.ssn),
        role: Set(input.role.as_str().to_string()),
        created_at: Set(Utc::now().timestamp()),
        ..Default::default()
    };
    Ok(user.insert(db).await?.into())
}

pub async fn get_user(db: &DatabaseConnection, id: UserId) -> Result<Option<User>, OrgError> {
    Ok(entities::User::find_by_id(id).one(db).await?.map(User::from))
}

pub async fn get_user_by_email(
    db: &DatabaseConnection,
    email: &str,
) -> Result<Option<User>, OrgError> {
    use entities::user::Column;

    Ok(entities::User::find()
        .filter(Column::Email.eq(email))
        .one(db)
        .await?
        .map(User::from))
}

pub async fn users_in_company(
    db: &DatabaseConnection,
    company_id: CompanyId,
) -> Result<Vec<User>, OrgError> {
    use entities::user::Column;

    let models = entities::User::find()
        .filter(Column::CompanyId.eq(company_id))
        .order_by_asc(Column::Id)
        .all(db)
        .await?;
    Ok(models.into_iter().map(User::from).collect())
}

pub async fn direct_reports(
    db: &DatabaseConnection,
    manager_id: UserId,
) -> Result<Vec<User>, OrgError> {
    use entities::user::Column;

    let models = entities::User::find()
        .filter(Column::ManagerId.eq(manager_id))
        .order_by_asc(Column::Id)
        .all(db)
        .await?;
    Ok(models.into_iter().map(User::from).collect())
}

async fn find_user_model(
    db: &DatabaseConnection,
    id: UserId,
) -> Result<entities::user::Model, OrgError> {
    entities::User::find_by_id(id)
        .one(db)
        .await?
        .ok_or_else(|| OrgError::NotFound(format!("User {id}")))
}

/// Updates the self-editable profile fields.
pub async fn update_user_profile(
    db: &DatabaseConnection,
    id: UserId,
    first_name: Option<String>,
    last_name: Option<String>,
    location: Option<String>,
) -> Result<User, OrgError> {
    let mut user = find_user_model(db, id).await?.into_active_model();
    if let Some(first_name) = first_name {
        user.first_name = Set(first_name);
    }
    if let Some(last_name) = last_name {
        user.last_name = Set(last_name);
    }
    if location.is_some() {
        user.location = Set(location);
    }
    Ok(user.update(db).await?.into())
}

pub async fn update_user_role(
    db: &DatabaseConnection,
    id: UserId,
    role: UserRole,
) -> Result<User, OrgError> {
    let mut user = find_user_model(db, id).await?.into_active_model();
    user.role = Set(role.as_str().to_string());
    Ok(user.update(db).await?.into())
}

pub async fn update_user_manager(
    db: &DatabaseConnection,
    id: UserId,
    manager_id: Option<UserId>,
) -> Result<User, OrgError> {
    let mut user = find_user_model(db, id).await?.into_active_model();
    user.manager_id = Set(manager_id);
    Ok(user.update(db).await?.into())
}

// ---------- time-off requests ----------

pub async fn create_time_off_request(
    db: &DatabaseConnection,
    input: NewTimeOffRequest,
) -> Result<TimeOffRequest, OrgError> {
    let now = Utc::now().timestamp();
    let request = entities::time_off_request::ActiveModel {
        user_id: Set(input.user_id),
        start_date: Set(input.start_date),
        end_date: Set(input.end_date),
        reason: Set(input.reason),
        status: Set(RequestStatus::Pending.as_str().to_string()),
        approved_by: Set(None),
        created_at: Set(now),
        updated_at: Set(now),
        ..Default::default()
    };
    Ok(request.insert(db).await?.into())
}

pub async fn get_time_off_request(
    db: &DatabaseConnection,
    id: RequestId,
) -> Result<Option<TimeOffRequest>, OrgError> {
    Ok(entities::TimeOffRequest::find_by_id(id)
        .one(db)
        .await?
        .map(TimeOffRequest::from))
}

/// Requests owned by `user_id`, newest first.
pub async fn requests_for_user(
    db: &DatabaseConnection,
    user_id: UserId,
) -> Result<Vec<TimeOffRequest>, OrgError> {
    use entities::time_off_request::Column;

    let models = entities::TimeOffRequest::find()
        .filter(Column::UserId.eq(user_id))
        .order_by_desc(Column::CreatedAt)
        .order_by_desc(Column::Id)
        .all(db)
        .await?;
    Ok(models.into_iter().map(TimeOffRequest::from).collect())
}

/// Requests of every member of the company, newest first.
pub async fn requests_in_company(
    db: &DatabaseConnection,
    company_id: CompanyId,
) -> Result<Vec<TimeOffRequest>, OrgError> {
    use entities::time_off_request::Column;

    let member_ids: Vec<UserId> = users_in_company(db, company_id)
        .await?
        .into_iter()
        .map(|u| u.id)
        .collect();
    if member_ids.is_empty() {
        return Ok(Vec::new());
    }

    let models = entities::TimeOffRequest::find()
        .filter(Column::UserId.is_in(member_ids))
        .order_by_desc(Column::CreatedAt)
        .order_by_desc(Column::Id)
        .all(db)
        .await?;
    Ok(models.into_iter().map(TimeOffRequest::from).collect())
}

pub async fn set_request_status(
    db: &DatabaseConnection,
    id: RequestId,
    status: RequestStatus,
    decided_by: UserId,
) -> Result<TimeOffRequest, OrgError> {
    let mut request = entities::TimeOffRequest::find_by_id(id)
        .one(db)
        .await?
        .ok_or_else(|| OrgError::NotFound(format!("Time-off request {id}")))?
        .into_active_model();
    request.status = Set(status.as_str().to_string());
    request.approved_by = Set(Some(decided_by));
    request.updated_at = Set(Utc::now().timestamp());
    Ok(request.update(db).await?.into())
}
