//! Allow-list check in front of the admin dashboard.
//!
//! This is not a security boundary. Nothing remembers a successful login and the dashboard
//! route is reachable without one. Real protection needs an external identity provider.

use applicant_intake_config::AdminPrincipal;
use serde::Deserialize;

pub const INVALID_CREDENTIALS: &str = "Invalid username or password";

#[derive(Clone, Debug, Default, Deserialize)]
pub struct Credentials {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
}

pub trait Authenticator: Send + Sync {
    fn authenticate(&self, credentials: &Credentials) -> bool;
}

/// Accepts exactly the configured username and password pairs.
#[derive(Clone, Debug, Default)]
pub struct AllowList {
    principals: Vec<AdminPrincipal>,
}

impl AllowList {
    #[must_use]
    pub const fn new(principals: Vec<AdminPrincipal>) -> Self {
        Self { principals }
    }
}

impl Authenticator for AllowList {
    fn authenticate(&self, credentials: &Credentials) -> bool {
        if credentials.username.is_empty() || credentials.password.is_empty() {
            return false;
        }
        self.principals.iter().any(|principal| {
            principal.username == credentials.username && principal.password == credentials.password
        })
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum LoginOutcome {
    /// Continue to the dashboard.
    Granted,
    Denied(&'static str),
}

pub fn check(authenticator: &dyn Authenticator, credentials: &Credentials) -> LoginOutcome {
    if authenticator.authenticate(credentials) {
        LoginOutcome::Granted
    } else {
        LoginOutcome::Denied(INVALID_CREDENTIALS)
    }
}
