//! Web server for the applicant intake form and its admin dashboard.

pub mod components;
pub mod error;
pub mod routes;
pub mod session;
pub mod telemetry;
pub mod templating;
pub mod views;

use std::sync::Arc;

use applicant_intake_config::{Config, StoreConfig};
use applicant_intake_store::{FirebaseStore, MemoryStore, RecordStore};
use axum::extract::{FromRef, FromRequest};
use axum::routing::{get, post};
use axum::{async_trait, RequestExt as _, Router};
use axum_extra::extract::cookie::Key;
use handlebars::Handlebars;
use serde::de::DeserializeOwned;
use session::{CookiePolicy, Session};
use tower::ServiceBuilder;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::request_id::{MakeRequestUuid, SetRequestIdLayer};
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::{error, info};

use crate::components::login_gate::{AllowList, Authenticator};
use crate::error::AppError;
use crate::routes::admin_dashboard::{close, delete, events, show};
use crate::routes::admin_login::{admin_login, admin_login_page};
use crate::routes::index::{apply, index};
use crate::routes::assets::{dashboardjs, indexcss};
use crate::templating::setup_handlebars;
use crate::views::{ViewSettings, Views};

#[derive(Clone, FromRef)]
pub struct MyState {
    views: Arc<Views>,
    authenticator: Arc<dyn Authenticator>,
    handlebars: Arc<Handlebars<'static>>,
    key: Key,
    cookies: CookiePolicy,
}

impl MyState {
    pub fn new(
        store: Arc<dyn RecordStore>,
        authenticator: Arc<dyn Authenticator>,
        settings: ViewSettings,
    ) -> Result<Self, AppError> {
        Ok(Self {
            views: Arc::new(Views::new(store, settings)),
            authenticator,
            handlebars: Arc::new(setup_handlebars()?),
            key: Key::generate(),
            cookies: CookiePolicy::default(),
        })
    }

    #[must_use]
    pub fn with_cookie_policy(mut self, cookies: CookiePolicy) -> Self {
        self.cookies = cookies;
        self
    }

    pub fn from_config(config: &Config) -> Result<Self, AppError> {
        Self::new(
            build_store(&config.store)?,
            Arc::new(AllowList::new(config.admins.clone())),
            ViewSettings::from(config),
        )
        .map(|state| {
            state.with_cookie_policy(CookiePolicy {
                secure: config.secure_cookies,
            })
        })
    }

    #[must_use]
    pub const fn views(&self) -> &Arc<Views> {
        &self.views
    }
}

pub fn build_store(config: &StoreConfig) -> Result<Arc<dyn RecordStore>, AppError> {
    Ok(match config {
        StoreConfig::Memory => {
            info!("keeping applications in memory, they are lost on restart");
            Arc::new(MemoryStore::new())
        }
        StoreConfig::Firebase {
            database_url,
            auth_token,
        } => {
            info!("using the realtime database at {database_url}");
            Arc::new(FirebaseStore::new(database_url, auth_token.clone())?)
        }
    })
}

pub trait CsrfToken {
    fn csrf_token(&self) -> &str;
}

/// A posted form whose csrf token matched the session it came with.
pub struct CsrfSafeForm<T: CsrfToken> {
    pub session: Session,
    pub value: T,
}

#[async_trait]
impl<T> FromRequest<MyState> for CsrfSafeForm<T>
where
    T: DeserializeOwned + CsrfToken + Send,
{
    type Rejection = (Session, AppError);

    async fn from_request(
        mut req: axum::extract::Request,
        state: &MyState,
    ) -> Result<Self, Self::Rejection> {
        let session = match req
            .extract_parts_with_state::<Session, MyState>(state)
            .await
        {
            Ok(session) => session,
            Err(infallible) => match infallible {},
        };

        let value = match axum::Form::<T>::from_request(req, state).await {
            Ok(axum::Form(value)) => value,
            Err(rejection) => return Err((session, AppError::from(rejection))),
        };
        if value.csrf_token() != session.csrf_token() {
            return Err((session, AppError::WrongCsrfToken));
        }
        Ok(Self { session, value })
    }
}

pub fn app(state: MyState) -> Router<()> {
    Router::new()
        .route("/", get(index).post(apply))
        .route("/index.css", get(indexcss))
        .route("/dashboard.js", get(dashboardjs))
        .route("/admin-login", get(admin_login_page).post(admin_login))
        .route("/admin-dashboard", get(routes::admin_dashboard::dashboard))
        .route("/admin-dashboard/show", post(show))
        .route("/admin-dashboard/close", post(close))
        .route("/admin-dashboard/delete", post(delete))
        .route("/admin-dashboard/events", get(events))
        .with_state(state)
        // layers are in reverse order
        .layer(
            ServiceBuilder::new()
                .layer(
                    TraceLayer::new_for_http()
                        .make_span_with(DefaultMakeSpan::default().include_headers(true))
                        .on_response(DefaultOnResponse::default().include_headers(true)),
                )
                .layer(CatchPanicLayer::new()),
        )
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
}

#[allow(clippy::redundant_pub_crate)]
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(error) = tokio::signal::ctrl_c().await {
            error!("failed to listen for Ctrl+C: {error}");
            core::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(error) => {
                error!("failed to listen for SIGTERM: {error}");
                core::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = core::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
    info!("shutting down");
}
