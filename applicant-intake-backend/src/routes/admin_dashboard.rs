use core::convert::Infallible;
use std::sync::Arc;

use applicant_intake_store::{Application, RecordId};
use axum::extract::State;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{Html, Redirect};
use futures_util::stream::{self, Stream};
use handlebars::Handlebars;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::components::admin_dashboard::DashboardState;
use crate::error::AppError;
use crate::session::Session;
use crate::templating::{render, ADMIN_DASHBOARD};
use crate::views::Views;
use crate::{CsrfSafeForm, CsrfToken};

const DASHBOARD: &str = "/admin-dashboard";

pub const NO_MESSAGE: &str = "No message available.";

#[derive(Serialize)]
struct Row<'a> {
    #[serde(flatten)]
    application: &'a Application,
    pending: bool,
}

/// What the page and the event stream show of a dashboard.
#[derive(Serialize)]
pub struct DashboardView<'a> {
    loading: bool,
    error: Option<&'a str>,
    read_error: Option<&'a str>,
    rows: Vec<Row<'a>>,
    selected: Option<&'a Application>,
    no_message: &'static str,
}

impl<'a> From<&'a DashboardState> for DashboardView<'a> {
    fn from(state: &'a DashboardState) -> Self {
        Self {
            loading: state.loading,
            error: state.error.as_deref(),
            read_error: state.read_error.as_deref(),
            rows: state
                .records
                .iter()
                .map(|application| Row {
                    application,
                    pending: state.is_pending(&application.id),
                })
                .collect(),
            selected: state.selected(),
            no_message: NO_MESSAGE,
        }
    }
}

#[derive(Deserialize)]
pub struct RecordPayload {
    csrf_token: String,
    #[serde(default)]
    id: String,
}

impl CsrfToken for RecordPayload {
    fn csrf_token(&self) -> &str {
        &self.csrf_token
    }
}

#[derive(Deserialize)]
pub struct ClosePayload {
    csrf_token: String,
}

impl CsrfToken for ClosePayload {
    fn csrf_token(&self) -> &str {
        &self.csrf_token
    }
}

pub async fn dashboard(
    State(views): State<Arc<Views>>,
    State(handlebars): State<Arc<Handlebars<'static>>>,
    session: Session,
) -> (Session, Result<Html<String>, AppError>) {
    let dashboard = views.dashboard(session.id());
    if !dashboard.wait_loaded(views.settings().initial_load).await {
        debug!("rendering the dashboard before the first snapshot");
    }
    let state = dashboard.state();
    let result = render(
        &handlebars,
        ADMIN_DASHBOARD,
        "Admin Dashboard",
        &session,
        DashboardView::from(&state),
    );
    (session, result)
}

pub async fn show(
    State(views): State<Arc<Views>>,
    CsrfSafeForm { session, value }: CsrfSafeForm<RecordPayload>,
) -> (Session, Result<Redirect, AppError>) {
    let result = RecordId::new(value.id).map_err(AppError::from).map(|id| {
        views.dashboard(session.id()).show_message(&id);
        Redirect::to(DASHBOARD)
    });
    (session, result)
}

pub async fn close(
    State(views): State<Arc<Views>>,
    CsrfSafeForm { session, value: _ }: CsrfSafeForm<ClosePayload>,
) -> (Session, Redirect) {
    views.dashboard(session.id()).close_message();
    (session, Redirect::to(DASHBOARD))
}

pub async fn delete(
    State(views): State<Arc<Views>>,
    CsrfSafeForm { session, value }: CsrfSafeForm<RecordPayload>,
) -> (Session, Result<Redirect, AppError>) {
    let result = async {
        let id = RecordId::new(value.id)?;
        // a failed delete is shown on the dashboard itself
        let _deleted = views.dashboard(session.id()).delete(&id).await;
        Ok::<Redirect, AppError>(Redirect::to(DASHBOARD))
    }
    .await;
    (session, result)
}

/// Streams the visitor's dashboard as json whenever it changes.
pub async fn events(
    State(views): State<Arc<Views>>,
    session: Session,
) -> (Session, Sse<impl Stream<Item = Result<Event, Infallible>>>) {
    let dashboard = views.dashboard(session.id());
    let receiver = dashboard.watch();
    let stream = stream::unfold(
        (dashboard, receiver, true),
        |(dashboard, mut receiver, first)| async move {
            if !first && receiver.changed().await.is_err() {
                return None;
            }
            let data = {
                let state = receiver.borrow_and_update();
                serde_json::to_string(&DashboardView::from(&*state))
            };
            match data {
                Ok(data) => Some((
                    Ok(Event::default().event("dashboard").data(data)),
                    (dashboard, receiver, false),
                )),
                Err(error) => {
                    warn!("failed to encode dashboard state: {error}");
                    None
                }
            }
        },
    );
    (session, Sse::new(stream).keep_alive(KeepAlive::default()))
}
