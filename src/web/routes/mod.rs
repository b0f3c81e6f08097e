pub mod bot_routes;
pub mod webhook_routes;
