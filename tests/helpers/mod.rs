#![allow(dead_code)]

pub mod builders;
pub mod db;

pub use builders::{company, days_from_now, time_off, Acme, UserBuilder};
pub use db::{TestDb, TestOrg};
