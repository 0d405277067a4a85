use orgauthz::hr::{HrService, RequestInput};
use orgauthz::model::{Company, CompanyId, NewUser, TimeOffRequest, User, UserId, UserRole};

/// Builder for creating test users through the HR service, so facts are synced
pub struct UserBuilder {
    first_name: String,
    company_id: CompanyId,
    role: UserRole,
    manager_id: Option<UserId>,
    salary: Option<i64>,
}

impl UserBuilder {
    pub fn new(first_name: &str, company: &Company) -> Self {
        Self {
            first_name: first_name.to_string(),
            company_id: company.id,
            role: UserRole::Employee,
            manager_id: None,
            salary: Some(75_000),
        }
    }

    pub fn ceo(mut self) -> Self {
        self.role = UserRole::Ceo;
        self
    }

    pub fn manager(mut self) -> Self {
        self.role = UserRole::Manager;
        self
    }

    pub fn reports_to(mut self, manager: &User) -> Self {
        self.manager_id = Some(manager.id);
        self
    }

    pub fn with_salary(mut self, salary: i64) -> Self {
        self.salary = Some(salary);
        self
    }

    pub fn input(&self) -> NewUser {
        NewUser {
            company_id: self.company_id,
            email: format!(
                "{}.{}@example.test",
                self.first_name.to_lowercase(),
                self.company_id
            ),
            first_name: self.first_name.clone(),
            last_name: "Tester".to_string(),
            location: Some("Remote".to_string()),
            manager_id: self.manager_id,
            salary: self.salary,
            ssn: Some("123-45-6789".to_string()),
            role: self.role,
        }
    }

    pub async fn create(self, hr: &HrService) -> User {
        hr.create_user(self.input())
            .await
            .expect("Failed to create test user")
    }
}

pub async fn company(hr: &HrService, name: &str) -> Company {
    hr.create_company(name)
        .await
        .expect("Failed to create test company")
}

/// Date string `days` from today
pub fn days_from_now(days: i64) -> String {
    (chrono::Local::now().date_naive() + chrono::Duration::days(days))
        .format("%Y-%m-%d")
        .to_string()
}

pub async fn time_off(hr: &HrService, owner: &User) -> TimeOffRequest {
    hr.create_request(
        owner,
        RequestInput {
            start_date: Some(days_from_now(7)),
            end_date: Some(days_from_now(9)),
            reason: Some("Vacation".to_string()),
        },
    )
    .await
    .expect("Failed to create time-off request")
}

/// The John / Sarah / Alice organization, plus a peer of Alice
pub struct Acme {
    pub company: Company,
    pub john: User,
    pub sarah: User,
    pub alice: User,
    pub bob: User,
}

impl Acme {
    pub async fn create(hr: &HrService) -> Self {
        let company = company(hr, "Acme").await;
        let john = UserBuilder::new("John", &company)
            .ceo()
            .with_salary(250_000)
            .create(hr)
            .await;
        let sarah = UserBuilder::new("Sarah", &company)
            .manager()
            .reports_to(&john)
            .create(hr)
            .await;
        let alice = UserBuilder::new("Alice", &company)
            .reports_to(&sarah)
            .create(hr)
            .await;
        let bob = UserBuilder::new("Bob", &company)
            .reports_to(&sarah)
            .create(hr)
            .await;
        Self {
            company,
            john,
            sarah,
            alice,
            bob,
        }
    }
}
