use std::sync::Arc;

use bytes::Bytes;
use http::header::HOST;
use http::uri::Scheme;
use http::{HeaderValue, Request, Response, Uri};
use http_body_util::Full;
use hyper::body::Incoming;
use hyper_util::rt::TokioIo;
use tokio::net::TcpStream;
use tokio_rustls::rustls::pki_types::ServerName;
use tokio_rustls::rustls::{ClientConfig, RootCertStore};
use tokio_rustls::TlsConnector;
use tracing::debug;

use crate::error::TransportError;

/// Minimal HTTP/1.1 client, one connection per request.
///
/// Streaming subscriptions keep their connection for as long as the response body is
/// being read, so pooling would not buy much here.
#[derive(Clone)]
pub struct HttpClient {
    connector: TlsConnector,
}

impl HttpClient {
    pub fn new() -> Self {
        let mut root_cert_store = RootCertStore::empty();
        root_cert_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        let config = ClientConfig::builder()
            .with_root_certificates(root_cert_store)
            .with_no_client_auth();
        Self {
            connector: TlsConnector::from(Arc::new(config)),
        }
    }

    pub async fn send(
        &self,
        request: Request<Full<Bytes>>,
    ) -> Result<Response<Incoming>, TransportError> {
        let (mut parts, body) = request.into_parts();
        let uri = parts.uri.clone();
        let Some(host) = uri.host() else {
            return Err(TransportError::ServerName(uri.to_string()));
        };
        let https = uri.scheme() == Some(&Scheme::HTTPS);
        let port = uri.port_u16().unwrap_or(if https { 443 } else { 80 });

        // send the origin form and name the authority in the host header
        if let Some(authority) = uri.authority() {
            parts.headers.insert(
                HOST,
                HeaderValue::from_str(authority.as_str()).map_err(http::Error::from)?,
            );
        }
        parts.uri = match uri.path_and_query() {
            Some(path_and_query) => Uri::builder()
                .path_and_query(path_and_query.clone())
                .build()?,
            None => Uri::from_static("/"),
        };
        let request = Request::from_parts(parts, body);

        let stream = TcpStream::connect((host, port)).await?;
        if https {
            let server_name = ServerName::try_from(host.to_owned())
                .map_err(|_error| TransportError::ServerName(host.to_owned()))?;
            let stream = self.connector.connect(server_name, stream).await?;
            send_over(TokioIo::new(stream), request).await
        } else {
            send_over(TokioIo::new(stream), request).await
        }
    }
}

async fn send_over<I>(
    io: I,
    request: Request<Full<Bytes>>,
) -> Result<Response<Incoming>, TransportError>
where
    I: hyper::rt::Read + hyper::rt::Write + Unpin + Send + 'static,
{
    let (mut sender, connection) = hyper::client::conn::http1::handshake(io).await?;
    tokio::spawn(async move {
        if let Err(error) = connection.await {
            debug!("store connection ended: {error}");
        }
    });
    Ok(sender.send_request(request).await?)
}
