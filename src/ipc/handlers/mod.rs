pub mod auth;
pub mod backup;
pub mod confirm;
pub mod core;
pub mod exchange;
pub mod records;
pub mod users;
