use crate::hr::HrService;
use crate::model::{NewUser, User, UserRole};
use miette::{IntoDiagnostic, Result};
use serde::{Deserialize, Serialize};
use std::fs;

/// Company definition from JSON file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompanyDefinition {
    /// Company name (unique identifier)
    pub name: String,
    #[serde(default)]
    pub users: Vec<UserDefinition>,
}

/// User definition from JSON file
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserDefinition {
    /// Email (unique identifier)
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    #[serde(default)]
    pub role: UserRole,
    /// Email of the manager; must be defined in the same company
    #[serde(default)]
    pub manager: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub salary: Option<i64>,
    #[serde(default)]
    pub ssn: Option<String>,
}

/// Root structure of the organization JSON file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrgFile {
    pub companies: Vec<CompanyDefinition>,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SeedSummary {
    pub created: usize,
    pub updated: usize,
    pub unchanged: usize,
}

/// Load companies and users from a JSON file (idempotent). Existing users
/// are matched by email and only their role and manager are reconciled.
pub async fn seed_from_file(hr: &HrService, file_path: &str) -> Result<SeedSummary> {
    tracing::info!("Loading organization from {}", file_path);

    let content = fs::read_to_string(file_path)
        .into_diagnostic()
        .map_err(|e| miette::miette!("Failed to read organization file at '{}': {}", file_path, e))?;

    let org: OrgFile = serde_json::from_str(&content)
        .into_diagnostic()
        .map_err(|e| {
            miette::miette!(
                "Failed to parse organization JSON file: {}\n\nExpected format:\n{{\n  \"companies\": [\n    {{\n      \"name\": \"Acme\",\n      \"users\": [\n        {{ \"email\": \"john@acme.test\", \"firstName\": \"John\", \"lastName\": \"Smith\", \"role\": \"ceo\" }},\n        {{ \"email\": \"sarah@acme.test\", \"firstName\": \"Sarah\", \"lastName\": \"Lee\", \"role\": \"manager\", \"manager\": \"john@acme.test\" }}\n      ]\n    }}\n  ]\n}}",
                e
            )
        })?;

    seed(hr, &org).await
}

pub async fn seed(hr: &HrService, org: &OrgFile) -> Result<SeedSummary> {
    let mut summary = SeedSummary::default();
    for company_def in &org.companies {
        seed_company(hr, company_def, &mut summary).await?;
    }

    tracing::info!(
        "Organization seed complete: {} created, {} updated, {} unchanged",
        summary.created,
        summary.updated,
        summary.unchanged
    );
    Ok(summary)
}

async fn seed_company(
    hr: &HrService,
    def: &CompanyDefinition,
    summary: &mut SeedSummary,
) -> Result<()> {
    let existing = hr
        .list_companies()
        .await
        .into_diagnostic()?
        .into_iter()
        .find(|c| c.name == def.name);
    let company = match existing {
        Some(company) => company,
        None => {
            tracing::info!("Creating company: {}", def.name);
            hr.create_company(&def.name).await.into_diagnostic()?
        }
    };

    // Users are created once their manager exists, so facts can link them.
    let mut pending: Vec<&UserDefinition> = def.users.iter().collect();
    while !pending.is_empty() {
        let mut deferred = Vec::new();
        let before = pending.len();
        for user_def in pending {
            let manager = match &user_def.manager {
                Some(email) => match hr.find_user_by_email(email).await.into_diagnostic()? {
                    Some(manager) => Some(manager),
                    None => {
                        deferred.push(user_def);
                        continue;
                    }
                },
                None => None,
            };
            let result = seed_user(hr, company.id, user_def, manager.as_ref()).await?;
            match result {
                SeedResult::Created => summary.created += 1,
                SeedResult::Updated => summary.updated += 1,
                SeedResult::Unchanged => summary.unchanged += 1,
            }
        }
        if deferred.len() == before {
            let emails: Vec<&str> = deferred.iter().map(|u| u.email.as_str()).collect();
            return Err(miette::miette!(
                "Unresolvable managers in company '{}' for: {}",
                def.name,
                emails.join(", ")
            ));
        }
        pending = deferred;
    }
    Ok(())
}

#[derive(Debug)]
enum SeedResult {
    Created,
    Updated,
    Unchanged,
}

/// Sync a single user (idempotent)
async fn seed_user(
    hr: &HrService,
    company_id: i64,
    def: &UserDefinition,
    manager: Option<&User>,
) -> Result<SeedResult> {
    let manager_id = manager.map(|m| m.id);
    let existing = hr.find_user_by_email(&def.email).await.into_diagnostic()?;

    match existing {
        None => {
            tracing::info!("Creating user: {}", def.email);
            hr.create_user(NewUser {
                company_id,
                email: def.email.clone(),
                first_name: def.first_name.clone(),
                last_name: def.last_name.clone(),
                location: def.location.clone(),
                manager_id,
                salary: def.salary,
                ssn: def.ssn.clone(),
                role: def.role,
            })
            .await
            .into_diagnostic()?;
            Ok(SeedResult::Created)
        }
        Some(user) if user.role != def.role || user.manager_id != manager_id => {
            tracing::info!("Updating user: {}", def.email);
            hr.reassign(user.id, Some(def.role), Some(manager_id))
                .await
                .into_diagnostic()?;
            Ok(SeedResult::Updated)
        }
        Some(_) => Ok(SeedResult::Unchanged),
    }
}
