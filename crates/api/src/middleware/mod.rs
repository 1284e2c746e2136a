pub mod auth;
pub mod signed;
