pub mod config;
pub mod deploy_tracker;
pub mod registry;
