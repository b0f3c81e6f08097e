pub mod bot;
pub mod user;
