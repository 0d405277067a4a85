pub mod company;
pub mod role_fact;
pub mod sync_run;
pub mod time_off_request;
pub mod user;

pub use company::Entity as Company;
pub use role_fact::Entity as RoleFact;
pub use sync_run::Entity as SyncRun;
pub use time_off_request::Entity as TimeOffRequest;
pub use user::Entity as User;
