//! Domain records of the HR service and the profile views handed out to
//! callers depending on what they are authorized to see.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::entities;

pub type UserId = i64;
pub type CompanyId = i64;
pub type RequestId = i64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserRole {
    #[default]
    Employee,
    Manager,
    Ceo,
}

impl UserRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserRole::Employee => "employee",
            UserRole::Manager => "manager",
            UserRole::Ceo => "ceo",
        }
    }
}

impl fmt::Display for UserRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for UserRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "employee" => Ok(UserRole::Employee),
            "manager" => Ok(UserRole::Manager),
            "ceo" => Ok(UserRole::Ceo),
            other => Err(format!("unknown user role `{other}`")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestStatus {
    #[default]
    Pending,
    Approved,
    Rejected,
}

impl RequestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestStatus::Pending => "pending",
            RequestStatus::Approved => "approved",
            RequestStatus::Rejected => "rejected",
        }
    }
}

impl FromStr for RequestStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(RequestStatus::Pending),
            "approved" => Ok(RequestStatus::Approved),
            "rejected" => Ok(RequestStatus::Rejected),
            other => Err(format!("unknown request status `{other}`")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Company {
    pub id: CompanyId,
    pub name: String,
    pub created_at: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: UserId,
    pub company_id: CompanyId,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub location: Option<String>,
    pub manager_id: Option<UserId>,
    pub salary: Option<i64>,
    pub ssn: Option<String>,
    pub role: UserRole,
    pub created_at: i64,
}

impl User {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }

    pub fn is_ceo(&self) -> bool {
        self.role == UserRole::Ceo
    }

    /// Fields every member of the company may see.
    pub fn basic_profile(&self) -> Profile {
        Profile {
            id: self.id,
            first_name: self.first_name.clone(),
            last_name: self.last_name.clone(),
            location: self.location.clone(),
            manager_id: self.manager_id,
            role: self.role,
            salary: None,
            ssn: None,
        }
    }

    /// Basic fields plus compensation and identity data.
    pub fn sensitive_profile(&self) -> Profile {
        Profile {
            salary: self.salary,
            ssn: self.ssn.clone(),
            ..self.basic_profile()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    pub id: UserId,
    pub first_name: String,
    pub last_name: String,
    pub location: Option<String>,
    pub manager_id: Option<UserId>,
    pub role: UserRole,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub salary: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ssn: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewUser {
    pub company_id: CompanyId,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub manager_id: Option<UserId>,
    #[serde(default)]
    pub salary: Option<i64>,
    #[serde(default)]
    pub ssn: Option<String>,
    #[serde(default)]
    pub role: UserRole,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeOffRequest {
    pub id: RequestId,
    pub user_id: UserId,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub reason: String,
    pub status: RequestStatus,
    pub approved_by: Option<UserId>,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewTimeOffRequest {
    pub user_id: UserId,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub reason: String,
}

impl From<entities::company::Model> for Company {
    fn from(m: entities::company::Model) -> Self {
        Self {
            id: m.id,
            name: m.name,
            created_at: m.created_at,
        }
    }
}

impl From<entities::user::Model> for User {
    fn from(m: entities::user::Model) -> Self {
        let role = m.role.parse().unwrap_or_else(|e| {
            tracing::warn!(user_id = m.id, error = %e, "falling back to employee role");
            UserRole::Employee
        });
        Self {
            id: m.id,
            company_id: m.company_id,
            email: m.email,
            first_name: m.first_name,
            last_name: m.last_name,
            location: m.location,
            manager_id: m.manager_id,
            salary: m.salary,
            ssn: m.ssn,
            role,
            created_at: m.created_at,
        }
    }
}

impl From<entities::time_off_request::Model> for TimeOffRequest {
    fn from(m: entities::time_off_request::Model) -> Self {
        let status = m.status.parse().unwrap_or_else(|e| {
            tracing::warn!(request_id = m.id, error = %e, "treating request as pending");
            RequestStatus::Pending
        });
        Self {
            id: m.id,
            user_id: m.user_id,
            start_date: m.start_date,
            end_date: m.end_date,
            reason: m.reason,
            status,
            approved_by: m.approved_by,
            created_at: m.created_at,
            updated_at: m.updated_at,
        }
    }
}
