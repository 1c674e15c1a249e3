use applicant_intake_config::ConfigError;
use applicant_intake_store::{StoreError, TransportError};
use axum::extract::rejection::FormRejection;
use axum::response::IntoResponse;
use http::StatusCode;
use tracing::{error, warn};

#[derive(thiserror::Error, Debug)]
pub enum AppError {
    #[error("form submission error: {0}")]
    FormRejection(#[from] FormRejection),
    #[error("template error: {0}")]
    Render(#[from] handlebars::RenderError),
    #[error("template registration error: {0}")]
    Template(#[from] handlebars::TemplateError),
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("store connection error: {0}")]
    Transport(#[from] TransportError),
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("wrong csrf token")]
    WrongCsrfToken,
}

impl AppError {
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        match self {
            Self::FormRejection(_) | Self::WrongCsrfToken | Self::Store(StoreError::InvalidKey(_)) => {
                StatusCode::BAD_REQUEST
            }
            Self::Render(_)
            | Self::Template(_)
            | Self::Store(_)
            | Self::Transport(_)
            | Self::Config(_)
            | Self::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let status = self.status();
        if status.is_server_error() {
            error!("{self}");
        } else {
            warn!("{self}");
        }
        // plain text so nothing from the error is interpreted as markup
        (status, format!("Something went wrong: {self}")).into_response()
    }
}
