pub mod actor;
pub mod command;
pub mod config;
pub mod jobs;
pub mod logging;
pub mod models;
pub mod persistence;
pub mod policy;
pub mod readiness;
pub mod registry;
pub mod resource_manager;
pub mod sqlite;
