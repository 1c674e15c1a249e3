use std::sync::Arc;

use axum::extract::State;
use axum::response::{Html, IntoResponse, Redirect, Response};
use handlebars::Handlebars;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::components::login_gate::{check, Authenticator, Credentials, LoginOutcome};
use crate::error::AppError;
use crate::session::Session;
use crate::templating::{render, ADMIN_LOGIN};
use crate::{CsrfSafeForm, CsrfToken};

#[derive(Deserialize)]
pub struct LoginPayload {
    csrf_token: String,
    #[serde(default)]
    username: String,
    #[serde(default)]
    password: String,
}

impl CsrfToken for LoginPayload {
    fn csrf_token(&self) -> &str {
        &self.csrf_token
    }
}

#[derive(Serialize)]
struct LoginPage<'a> {
    username: &'a str,
    error: Option<&'a str>,
}

pub async fn admin_login_page(
    State(handlebars): State<Arc<Handlebars<'static>>>,
    session: Session,
) -> (Session, Result<Html<String>, AppError>) {
    let result = render(
        &handlebars,
        ADMIN_LOGIN,
        "Admin Login",
        &session,
        LoginPage {
            username: "",
            error: None,
        },
    );
    (session, result)
}

pub async fn admin_login(
    State(authenticator): State<Arc<dyn Authenticator>>,
    State(handlebars): State<Arc<Handlebars<'static>>>,
    CsrfSafeForm { session, value }: CsrfSafeForm<LoginPayload>,
) -> (Session, Response) {
    let credentials = Credentials {
        username: value.username,
        password: value.password,
    };
    match check(authenticator.as_ref(), &credentials) {
        LoginOutcome::Granted => {
            info!("admin {} logged in", credentials.username);
            (session, Redirect::to("/admin-dashboard").into_response())
        }
        LoginOutcome::Denied(message) => {
            warn!("rejected admin login for {:?}", credentials.username);
            let result = render(
                &handlebars,
                ADMIN_LOGIN,
                "Admin Login",
                &session,
                LoginPage {
                    username: &credentials.username,
                    error: Some(message),
                },
            );
            (session, result.into_response())
        }
    }
}
