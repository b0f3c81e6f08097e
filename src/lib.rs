pub mod clients;
pub mod db;
pub mod governor;
pub mod provisioning;
pub mod server;
pub mod services;
pub mod web;
