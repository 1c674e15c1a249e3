use axum::response::Html;
use handlebars::Handlebars;
use serde::Serialize;

use crate::error::AppError;
use crate::session::Session;

pub const APPLICATION_FORM: &str = "application_form";
pub const ADMIN_LOGIN: &str = "admin_login";
pub const ADMIN_DASHBOARD: &str = "admin_dashboard";

/// Registers the page layout and every page. Values are html-escaped.
pub fn setup_handlebars() -> Result<Handlebars<'static>, AppError> {
    let mut handlebars = Handlebars::new();
    handlebars.register_partial("layout", include_str!("../templates/layout.hbs"))?;
    handlebars.register_template_string(
        APPLICATION_FORM,
        include_str!("../templates/application_form.hbs"),
    )?;
    handlebars.register_template_string(ADMIN_LOGIN, include_str!("../templates/admin_login.hbs"))?;
    handlebars.register_template_string(
        ADMIN_DASHBOARD,
        include_str!("../templates/admin_dashboard.hbs"),
    )?;
    Ok(handlebars)
}

#[derive(Serialize)]
pub struct Page<'a, T> {
    pub title: &'a str,
    pub csrf_token: &'a str,
    #[serde(flatten)]
    pub inner: T,
}

pub fn render<T: Serialize>(
    handlebars: &Handlebars<'_>,
    template_name: &str,
    title: &str,
    session: &Session,
    inner: T,
) -> Result<Html<String>, AppError> {
    Ok(Html(handlebars.render(
        template_name,
        &Page {
            title,
            csrf_token: session.csrf_token(),
            inner,
        },
    )?))
}
