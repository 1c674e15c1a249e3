use core::time::Duration;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use http::header::{ACCEPT, CONTENT_TYPE, LOCATION};
use http::{Method, Request, Response, StatusCode, Uri};
use http_body_util::{BodyExt as _, Full};
use hyper::body::Incoming;
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::error::{StoreError, TransportError};
use crate::event_stream::{CollectionTree, EventStreamDecoder, TreeUpdate};
use crate::http_client::HttpClient;
use crate::model::{check_collection, Application, RecordId};
use crate::{record_path, RecordStore, StoreEvent, Subscription};

const MAX_REDIRECTS: usize = 5;

/// How long a failed subscription waits before reconnecting.
#[derive(Clone, Copy, Debug)]
pub struct Backoff {
    pub initial: Duration,
    pub max: Duration,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            initial: Duration::from_secs(1),
            max: Duration::from_secs(30),
        }
    }
}

struct Inner {
    database_url: String,
    auth_token: Option<String>,
    client: HttpClient,
}

/// Record store backed by a hosted realtime database, spoken to over its REST interface.
#[derive(Clone)]
pub struct FirebaseStore {
    inner: Arc<Inner>,
    backoff: Backoff,
}

#[derive(Deserialize)]
struct ErrorBody {
    error: String,
}

impl FirebaseStore {
    pub fn new(database_url: &str, auth_token: Option<String>) -> Result<Self, TransportError> {
        let database_url = database_url.trim_end_matches('/').to_owned();
        // fail at startup rather than on the first request
        database_url.parse::<Uri>()?;
        Ok(Self {
            inner: Arc::new(Inner {
                database_url,
                auth_token,
                client: HttpClient::new(),
            }),
            backoff: Backoff::default(),
        })
    }

    #[must_use]
    pub const fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    fn url(&self, path: &str, shallow: bool) -> Result<Uri, TransportError> {
        let mut query = Vec::new();
        if let Some(auth_token) = &self.inner.auth_token {
            query.push(("auth", auth_token.as_str()));
        }
        if shallow {
            query.push(("shallow", "true"));
        }
        let query = serde_urlencoded::to_string(query)?;
        let url = if query.is_empty() {
            format!("{}/{path}.json", self.inner.database_url)
        } else {
            format!("{}/{path}.json?{query}", self.inner.database_url)
        };
        Ok(url.parse()?)
    }

    async fn request(
        &self,
        method: Method,
        mut uri: Uri,
        body: Bytes,
        accept: &'static str,
    ) -> Result<Response<Incoming>, TransportError> {
        for _ in 0..=MAX_REDIRECTS {
            let request = Request::builder()
                .method(method.clone())
                .uri(uri.clone())
                .header(ACCEPT, accept)
                .header(CONTENT_TYPE, "application/json")
                .body(Full::new(body.clone()))?;
            let response = self.inner.client.send(request).await?;
            if response.status().is_redirection() {
                if let Some(location) = response.headers().get(LOCATION) {
                    uri = Uri::try_from(location.as_bytes())?;
                    debug!("following redirect to {uri}");
                    continue;
                }
            }
            return check_status(response).await;
        }
        Err(TransportError::TooManyRedirects)
    }

    async fn read_body(&self, method: Method, uri: Uri, body: Bytes) -> Result<Bytes, TransportError> {
        let response = self.request(method, uri, body, "application/json").await?;
        Ok(response.into_body().collect().await?.to_bytes())
    }

    /// Streams one connection's worth of events. `Ok` means the subscriber went away.
    async fn stream_once(
        &self,
        collection: &str,
        events: &mpsc::Sender<StoreEvent>,
        delay: &mut Duration,
    ) -> Result<(), TransportError> {
        let uri = self.url(collection, false)?;
        let response = self
            .request(Method::GET, uri, Bytes::new(), "text/event-stream")
            .await?;
        info!("subscribed to {collection}");
        let mut body = response.into_body();
        let mut decoder = EventStreamDecoder::default();
        let mut tree = CollectionTree::default();
        while let Some(frame) = body.frame().await {
            let Ok(data) = frame?.into_data() else {
                continue;
            };
            for event in decoder.push(&data) {
                if tree.apply(&event)? == TreeUpdate::Changed {
                    *delay = self.backoff.initial;
                    if events.send(StoreEvent::Snapshot(tree.snapshot())).await.is_err() {
                        return Ok(());
                    }
                }
            }
        }
        Err(TransportError::StreamClosed("connection ended".to_owned()))
    }

    async fn listen(self, collection: String, events: mpsc::Sender<StoreEvent>) {
        let mut delay = self.backoff.initial;
        loop {
            match self.stream_once(&collection, &events, &mut delay).await {
                Ok(()) => return,
                Err(error) => {
                    warn!("subscription to {collection} failed, retrying in {delay:?}: {error}");
                    let event = StoreEvent::ReadFailed(StoreError::read(collection.clone(), error));
                    if events.send(event).await.is_err() {
                        return;
                    }
                    tokio::time::sleep(delay).await;
                    delay = (delay * 2).min(self.backoff.max);
                }
            }
        }
    }
}

async fn check_status(response: Response<Incoming>) -> Result<Response<Incoming>, TransportError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        return Err(TransportError::PermissionDenied);
    }
    let body = response.into_body().collect().await?.to_bytes();
    let message = serde_json::from_slice::<ErrorBody>(&body).map_or_else(
        |_error| String::from_utf8_lossy(&body).into_owned(),
        |error_body| error_body.error,
    );
    Err(TransportError::Status { status, message })
}

#[async_trait]
impl RecordStore for FirebaseStore {
    async fn create(
        &self,
        collection: &str,
        id: &RecordId,
        record: &Application,
    ) -> Result<(), StoreError> {
        check_collection(collection)?;
        let path = record_path(collection, id);
        let result = async {
            let body = Bytes::from(serde_json::to_vec(record)?);
            let uri = self.url(&path, false)?;
            self.read_body(Method::PUT, uri, body).await?;
            Ok::<(), TransportError>(())
        }
        .await;
        result.map_err(|error| StoreError::write(path, error))
    }

    async fn exists(&self, collection: &str, id: &RecordId) -> Result<bool, StoreError> {
        check_collection(collection)?;
        let path = record_path(collection, id);
        let result = async {
            let uri = self.url(&path, true)?;
            let body = self.read_body(Method::GET, uri, Bytes::new()).await?;
            let value: serde_json::Value = serde_json::from_slice(&body)?;
            Ok::<bool, TransportError>(!value.is_null())
        }
        .await;
        result.map_err(|error| StoreError::read(path, error))
    }

    fn subscribe(&self, collection: &str) -> Subscription {
        let store = self.clone();
        let collection = collection.to_owned();
        Subscription::spawn(move |events| store.listen(collection, events))
    }

    async fn remove(&self, collection: &str, id: &RecordId) -> Result<(), StoreError> {
        check_collection(collection)?;
        let path = record_path(collection, id);
        let result = async {
            let uri = self.url(&path, false)?;
            self.read_body(Method::DELETE, uri, Bytes::new()).await?;
            Ok::<(), TransportError>(())
        }
        .await;
        result.map_err(|error| StoreError::write(path, error))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn urls_carry_auth_and_shallow_parameters() {
        let store = FirebaseStore::new(
            "https://example-default-rtdb.firebaseio.com/",
            Some("a b&c".to_owned()),
        )
        .unwrap();
        let uri = store.url("students/IT1234", true).unwrap();
        assert_eq!(
            uri.to_string(),
            "https://example-default-rtdb.firebaseio.com/students/IT1234.json?auth=a+b%26c&shallow=true"
        );

        let store = FirebaseStore::new("http://127.0.0.1:9000", None).unwrap();
        assert_eq!(
            store.url("students", false).unwrap().to_string(),
            "http://127.0.0.1:9000/students.json"
        );
    }

    #[test]
    fn invalid_database_url_is_rejected() {
        assert!(FirebaseStore::new("not a url", None).is_err());
    }
}
