use std::sync::OnceLock;

use axum::response::{IntoResponse, Response};
use axum_extra::response::{Css, JavaScript};
use axum_extra::{headers, TypedHeader};
use http::{header, StatusCode};
use sha2::{Digest as _, Sha256};

/// A file compiled into the binary, revalidated by its content hash.
struct Asset {
    body: &'static str,
    etag: OnceLock<String>,
}

static INDEX_CSS: Asset = Asset::new(include_str!("../../frontend/index.css"));
static DASHBOARD_JS: Asset = Asset::new(include_str!("../../frontend/dashboard.js"));

impl Asset {
    const fn new(body: &'static str) -> Self {
        Self {
            body,
            etag: OnceLock::new(),
        }
    }

    /// Strong etag derived from the content.
    fn etag(&self) -> &str {
        self.etag
            .get_or_init(|| format!("\"{:x}\"", Sha256::digest(self.body.as_bytes())))
    }

    fn respond<R: IntoResponse>(
        &'static self,
        if_none_match: Option<TypedHeader<headers::IfNoneMatch>>,
        wrap: impl FnOnce(&'static str) -> R,
    ) -> Response {
        let etag_string = self.etag();
        let modified = match (if_none_match, etag_string.parse::<headers::ETag>()) {
            (Some(TypedHeader(if_none_match)), Ok(etag)) => if_none_match.precondition_passes(&etag),
            _ => true,
        };
        // the url never changes, so browsers have to revalidate every time
        let headers = [
            (header::ETAG, etag_string.to_owned()),
            (header::CACHE_CONTROL, "no-cache".to_owned()),
        ];
        if modified {
            (headers, wrap(self.body)).into_response()
        } else {
            (StatusCode::NOT_MODIFIED, headers).into_response()
        }
    }
}

pub async fn indexcss(if_none_match: Option<TypedHeader<headers::IfNoneMatch>>) -> Response {
    INDEX_CSS.respond(if_none_match, Css)
}

pub async fn dashboardjs(if_none_match: Option<TypedHeader<headers::IfNoneMatch>>) -> Response {
    DASHBOARD_JS.respond(if_none_match, JavaScript)
}
