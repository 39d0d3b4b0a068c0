//! HTTP server module
//!
//! Accepts HTTP/1.1 connections, converts each request into a
//! [`GatewayRequest`], resolves its route and runs it through the pipeline
//! for the route's access level.

use crate::config::Config;
use crate::handlers::{AppContext, GatewaySettings, Operation};
use crate::pipeline::{GatewayRequest, GatewayResponse, ResponseBody, UsageLimiter};
use crate::registration::FileRegistrationStore;
use crate::router::{Route, RouterError};
use crate::s3::ByteStream;
use bytes::Bytes;
use futures::TryStreamExt;
use http_body_util::combinators::UnsyncBoxBody;
use http_body_util::{BodyExt, Empty, Full, StreamBody};
use hyper::body::{Frame, Incoming};
use hyper::header::{HeaderName, HeaderValue, CONTENT_LENGTH};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tracing::{debug, info};

/// Response body handed to hyper
pub type HttpBody = UnsyncBoxBody<Bytes, io::Error>;

const CORS_HEADERS: [(&str, &str); 4] = [
    ("access-control-allow-origin", "*"),
    (
        "access-control-allow-headers",
        "Authorization, Content-Type, X-Gateway-Upload, X-Gateway-Upload-Segment",
    ),
    (
        "access-control-allow-methods",
        "GET, POST, PUT, DELETE, OPTIONS",
    ),
    ("access-control-expose-headers", "X-Gateway-Page"),
];

/// Server errors
#[derive(Error, Debug)]
pub enum ServerError {
    #[error("Failed to bind to address: {0}")]
    BindError(String),

    #[error("Server error: {0}")]
    RuntimeError(String),
}

/// HTTP Server
pub struct Server {
    addr: SocketAddr,
    ctx: Arc<AppContext>,
    shutdown_tx: Option<oneshot::Sender<()>>,
    server_handle: Option<tokio::task::JoinHandle<()>>,
}

impl Server {
    /// Build the server and its shared context from configuration
    pub fn from_config(config: &Config) -> Result<Self, ServerError> {
        Self::new(&config.server.address, Arc::new(build_context(config)?))
    }

    pub fn new(address: &str, ctx: Arc<AppContext>) -> Result<Self, ServerError> {
        let addr: SocketAddr = address
            .parse()
            .map_err(|e| ServerError::BindError(format!("{}: {}", address, e)))?;

        Ok(Self {
            addr,
            ctx,
            shutdown_tx: None,
            server_handle: None,
        })
    }

    /// Bind and serve in the background, returning the bound address
    pub async fn start(&mut self) -> Result<SocketAddr, ServerError> {
        let listener = TcpListener::bind(self.addr)
            .await
            .map_err(|e| ServerError::BindError(format!("{}: {}", self.addr, e)))?;
        let addr = listener
            .local_addr()
            .map_err(|e| ServerError::RuntimeError(e.to_string()))?;

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        self.shutdown_tx = Some(shutdown_tx);
        self.server_handle = Some(tokio::spawn(accept_loop(
            listener,
            self.ctx.clone(),
            shutdown_rx,
        )));

        info!(address = %addr, "Gateway listening");
        Ok(addr)
    }

    pub async fn shutdown(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.server_handle.take() {
            let _ = handle.await;
        }
    }

    /// Serve until Ctrl-C
    pub async fn run(&mut self) -> Result<(), ServerError> {
        self.start().await?;

        tokio::signal::ctrl_c()
            .await
            .map_err(|e| ServerError::RuntimeError(e.to_string()))?;

        info!("Shutting down server");
        self.shutdown().await;
        Ok(())
    }
}

/// Wire the registration store, S3 connection pool and usage limiter
pub fn build_context(config: &Config) -> Result<AppContext, ServerError> {
    let http_client = crate::s3::http_client(config.s3.connect_timeout(), config.s3.read_timeout())
        .map_err(|e| ServerError::RuntimeError(e.to_string()))?;
    let limiter = UsageLimiter::new(config.usage.interval(), config.usage.max_count);

    Ok(AppContext::new(
        Arc::new(FileRegistrationStore::new(&config.datastore.path)),
        http_client,
        Arc::new(limiter),
        GatewaySettings {
            upload_segment_size: config.upload.segment_size,
            log_s3_requests: config.s3.log_requests,
        },
    ))
}

async fn accept_loop(
    listener: TcpListener,
    ctx: Arc<AppContext>,
    mut shutdown_rx: oneshot::Receiver<()>,
) {
    loop {
        tokio::select! {
            _ = &mut shutdown_rx => break,
            result = listener.accept() => {
                let (stream, peer) = match result {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        debug!(error = %e, "Accept failed");
                        continue;
                    }
                };
                let ctx = ctx.clone();
                tokio::spawn(async move {
                    let service = service_fn(move |req| {
                        let ctx = ctx.clone();
                        async move { Ok::<_, Infallible>(handle(&ctx, req).await) }
                    });
                    if let Err(e) = http1::Builder::new()
                        .serve_connection(TokioIo::new(stream), service)
                        .await
                    {
                        debug!(peer = %peer, error = %e, "Connection closed with error");
                    }
                });
            }
        }
    }
}

/// Serve one request
pub async fn handle(ctx: &AppContext, req: Request<Incoming>) -> Response<HttpBody> {
    let started = Instant::now();
    let method = req.method().clone();
    let path = req.uri().path().to_string();

    let (route_name, response) = if method == Method::GET && path == "/health" {
        ("health", GatewayResponse::message(StatusCode::OK, "ok"))
    } else if method == Method::OPTIONS {
        ("preflight", GatewayResponse::ok())
    } else {
        match Route::resolve(&method, &path) {
            Ok(route) => {
                let request = into_gateway_request(req);
                let operation = Operation::new(ctx, &route);
                let response = ctx
                    .pipeline(route.access())
                    .run(request, &operation)
                    .await;
                (route.kind.name(), response)
            }
            Err(RouterError::InvalidId) => (
                "unknown",
                GatewayResponse::message(StatusCode::BAD_REQUEST, "Invalid id."),
            ),
            Err(RouterError::NotFound) => (
                "unknown",
                GatewayResponse::message(StatusCode::NOT_FOUND, "Not found."),
            ),
        }
    };

    let elapsed = started.elapsed();
    crate::metrics::record_request(route_name, response.status.as_u16(), elapsed.as_secs_f64());
    info!(
        method = %method,
        path = %path,
        route = route_name,
        status = response.status.as_u16(),
        elapsed_ms = elapsed.as_millis() as u64,
        "Request"
    );

    into_http_response(response)
}

fn into_gateway_request(req: Request<Incoming>) -> GatewayRequest {
    let (parts, body) = req.into_parts();
    let stream: ByteStream = Box::pin(body.into_data_stream().map_err(io::Error::other));

    let mut request = GatewayRequest::new(parts.method, parts.uri.path()).with_body(stream);
    request.query = GatewayRequest::parse_query(parts.uri.query());
    request.headers = parts.headers;
    request
}

fn into_http_response(response: GatewayResponse) -> Response<HttpBody> {
    let mut headers = response.headers;
    let body: HttpBody = match response.body {
        ResponseBody::Empty => Empty::<Bytes>::new()
            .map_err(|never| match never {})
            .boxed_unsync(),
        ResponseBody::Full(bytes) => Full::new(bytes)
            .map_err(|never| match never {})
            .boxed_unsync(),
        ResponseBody::Stream { stream, length } => {
            if let Some(length) = length {
                headers.insert(CONTENT_LENGTH, HeaderValue::from(length));
            }
            StreamBody::new(stream.map_ok(Frame::data)).boxed_unsync()
        }
    };

    for (name, value) in CORS_HEADERS {
        headers.insert(
            HeaderName::from_static(name),
            HeaderValue::from_static(value),
        );
    }

    let mut http_response = Response::new(body);
    *http_response.status_mut() = response.status;
    *http_response.headers_mut() = headers;
    http_response
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registration::MemoryRegistrationStore;
    use std::time::Duration;

    fn context() -> Arc<AppContext> {
        Arc::new(AppContext::new(
            Arc::new(MemoryRegistrationStore::new()),
            reqwest::Client::new(),
            Arc::new(UsageLimiter::new(Duration::from_secs(10), 1000)),
            GatewaySettings::default(),
        ))
    }

    #[test]
    fn test_server_new() {
        assert!(Server::new("127.0.0.1:0", context()).is_ok());
    }

    #[test]
    fn test_server_invalid_address() {
        assert!(Server::new("invalid", context()).is_err());
    }

    #[test]
    fn test_server_from_default_config() {
        assert!(Server::from_config(&Config::default()).is_ok());
    }

    #[test]
    fn test_cors_headers_on_every_response() {
        let response = into_http_response(GatewayResponse::message(
            StatusCode::NOT_FOUND,
            "Not found.",
        ));
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(
            response.headers()["access-control-allow-origin"],
            HeaderValue::from_static("*")
        );
    }

    #[tokio::test]
    async fn test_streamed_body_sets_length() {
        let stream: ByteStream = Box::pin(futures::stream::once(async {
            Ok(Bytes::from_static(b"abc"))
        }));
        let response = into_http_response(GatewayResponse::stream(stream, Some(3)));
        assert_eq!(response.headers()[CONTENT_LENGTH], HeaderValue::from(3u64));

        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(body.as_ref(), b"abc");
    }
}
