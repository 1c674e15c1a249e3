use core::time::Duration;
use std::sync::Arc;

use applicant_intake_store::Course;
use axum::extract::State;
use axum::response::{Html, IntoResponse, Redirect, Response};
use handlebars::Handlebars;
use serde::{Deserialize, Serialize};

use crate::components::application_form::{Draft, FormState};
use crate::error::AppError;
use crate::session::Session;
use crate::templating::{render, APPLICATION_FORM};
use crate::views::Views;
use crate::{CsrfSafeForm, CsrfToken};

pub const SUBMIT_SUCCESS: &str = "Your application has been submitted successfully.";

#[derive(Deserialize)]
pub struct ApplicationPayload {
    csrf_token: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    email: String,
    #[serde(default)]
    phone: String,
    #[serde(default)]
    course: String,
    #[serde(default)]
    message: String,
}

impl CsrfToken for ApplicationPayload {
    fn csrf_token(&self) -> &str {
        &self.csrf_token
    }
}

impl From<ApplicationPayload> for Draft {
    fn from(payload: ApplicationPayload) -> Self {
        Self {
            name: payload.name,
            email: payload.email,
            phone: payload.phone,
            course: payload.course,
            message: payload.message,
        }
    }
}

#[derive(Serialize)]
struct CourseOption {
    name: &'static str,
    selected: bool,
}

#[derive(Serialize)]
struct FormPage<'a> {
    #[serde(flatten)]
    state: &'a FormState,
    courses: Vec<CourseOption>,
    success: &'static str,
    /// How long the browser keeps the success banner on screen.
    banner_millis: u64,
}

fn render_form(
    handlebars: &Handlebars<'_>,
    session: &Session,
    state: &FormState,
    banner: Duration,
) -> Result<Html<String>, AppError> {
    let courses = Course::ALL
        .into_iter()
        .map(|course| CourseOption {
            name: course.as_str(),
            selected: state.draft.course == course.as_str(),
        })
        .collect();
    render(
        handlebars,
        APPLICATION_FORM,
        "Apply",
        session,
        FormPage {
            state,
            courses,
            success: SUBMIT_SUCCESS,
            banner_millis: u64::try_from(banner.as_millis()).unwrap_or(u64::MAX),
        },
    )
}

pub async fn index(
    State(views): State<Arc<Views>>,
    State(handlebars): State<Arc<Handlebars<'static>>>,
    session: Session,
) -> (Session, Result<Html<String>, AppError>) {
    let form = views.form(session.id());
    let result = render_form(
        &handlebars,
        &session,
        &form.state(),
        views.settings().banner,
    );
    (session, result)
}

/// Submits the posted application. Redirects back on success so a reload does not resubmit.
pub async fn apply(
    State(views): State<Arc<Views>>,
    State(handlebars): State<Arc<Handlebars<'static>>>,
    CsrfSafeForm { session, value }: CsrfSafeForm<ApplicationPayload>,
) -> (Session, Response) {
    let form = views.form(session.id());
    form.set_draft(value.into());
    if form.submit().await.is_ok() {
        return (session, Redirect::to("/").into_response());
    }
    // the failure is part of the form state now
    let result = render_form(
        &handlebars,
        &session,
        &form.state(),
        views.settings().banner,
    );
    (session, result.into_response())
}
