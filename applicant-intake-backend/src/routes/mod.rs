pub mod admin_dashboard;
pub mod admin_login;
pub mod assets;
pub mod index;
