//! orgauthz - HR service with an in-house organizational authorization core
//!
//! This library provides the HR domain, the authorization core (fact store,
//! hierarchy resolver, policy evaluator, sync engine) and the HTTP layer.
//! It exposes all modules for testing purposes.

pub mod authz;
pub mod directory;
pub mod entities;
pub mod errors;
pub mod hr;
pub mod jobs;
pub mod model;
pub mod seed;
pub mod settings;
pub mod storage;
pub mod web;
