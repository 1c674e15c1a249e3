pub mod admin_dashboard;
pub mod application_form;
pub mod login_gate;
