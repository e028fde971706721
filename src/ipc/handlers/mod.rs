pub mod auth;
pub mod core;
pub mod groups;
pub mod students;
pub mod users;
