pub mod bot_service;
pub mod user_service;
