//! Reverse proxy server
//!
//! Sits between the application and the language server. Every connection is
//! served as HTTP/1.1 or h2c depending on what the client speaks; requests go
//! upstream unchanged. Responses the [`CaptureHook`] wants are buffered,
//! captured and replayed with their trailers so gRPC status codes survive.

use crate::config::HookConfig;
use crate::models::ResponseFlow;
use crate::proxy::hook::CaptureHook;
use anyhow::Context;
use bytes::Bytes;
use http::header::CONTENT_TYPE;
use http::{HeaderMap, Request, Response, StatusCode, Uri};
use http_body_util::combinators::UnsyncBoxBody;
use http_body_util::{BodyExt, Full, StreamBody};
use hyper::body::{Frame, Incoming};
use hyper::service::service_fn;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto;
use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;

pub type ProxyBody = UnsyncBoxBody<Bytes, hyper::Error>;

type UpstreamClient = Client<HttpConnector, ProxyBody>;

struct ProxyState {
    upstream: String,
    client: UpstreamClient,
    hook: Arc<CaptureHook>,
}

/// A bound proxy listener, ready to serve.
pub struct ProxyServer {
    listener: TcpListener,
    state: Arc<ProxyState>,
}

impl ProxyServer {
    pub async fn bind(config: &HookConfig, hook: Arc<CaptureHook>) -> anyhow::Result<Self> {
        let upstream = config.upstream.trim_end_matches('/').to_string();
        upstream
            .parse::<Uri>()
            .with_context(|| format!("invalid upstream URL {upstream:?}"))?;

        let listener = TcpListener::bind(&config.listen)
            .await
            .with_context(|| format!("binding {}", config.listen))?;

        let mut connector = HttpConnector::new();
        connector.set_nodelay(true);
        let client = Client::builder(TokioExecutor::new())
            .http2_only(config.upstream_http2)
            .build(connector);

        Ok(Self {
            listener,
            state: Arc::new(ProxyState {
                upstream,
                client,
                hook,
            }),
        })
    }

    pub fn local_addr(&self) -> anyhow::Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept connections until `shutdown` resolves.
    pub async fn serve<F>(self, shutdown: F) -> anyhow::Result<()>
    where
        F: Future<Output = ()>,
    {
        let addr = self.local_addr()?;
        tracing::info!(
            "Capture proxy listening on {} -> {}",
            addr,
            self.state.upstream
        );

        tokio::pin!(shutdown);
        loop {
            let (socket, peer_addr) = tokio::select! {
                _ = &mut shutdown => break,
                accepted = self.listener.accept() => match accepted {
                    Ok(conn) => conn,
                    Err(e) => {
                        tracing::error!("Accept error: {}", e);
                        continue;
                    }
                },
            };

            tracing::debug!("Connection from {}", peer_addr);
            let _ = socket.set_nodelay(true);
            let state = self.state.clone();
            tokio::spawn(async move {
                let service = service_fn(move |req| {
                    let state = state.clone();
                    async move { Ok::<_, Infallible>(handle_request(req, state).await) }
                });
                if let Err(e) = auto::Builder::new(TokioExecutor::new())
                    .serve_connection(TokioIo::new(socket), service)
                    .await
                {
                    let err_str = e.to_string().to_lowercase();
                    if err_str.contains("connection closed")
                        || err_str.contains("connection reset")
                        || err_str.contains("broken pipe")
                    {
                        tracing::debug!("Connection closed by client: {}", e);
                    } else {
                        tracing::warn!("Error serving connection from {}: {}", peer_addr, e);
                    }
                }
            });
        }

        tracing::info!("Capture proxy stopped");
        Ok(())
    }
}

/// Bind and serve until Ctrl+C.
pub async fn run_server(config: &HookConfig, hook: Arc<CaptureHook>) -> anyhow::Result<()> {
    let server = ProxyServer::bind(config, hook).await?;
    server
        .serve(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await
}

async fn handle_request(req: Request<Incoming>, state: Arc<ProxyState>) -> Response<ProxyBody> {
    let method = req.method().to_string();
    let path = req.uri().path().to_string();
    state.hook.on_request(&method, &path);

    let target = match upstream_uri(&state.upstream, req.uri()) {
        Ok(uri) => uri,
        Err(e) => {
            tracing::warn!("Cannot map {} to upstream: {}", req.uri(), e);
            return status_response(StatusCode::BAD_REQUEST, "Invalid request target");
        }
    };

    let (mut parts, body) = req.into_parts();
    parts.uri = target;
    // HTTP/1.1 clients send Host; let the client derive it from the upstream URI.
    parts.headers.remove(http::header::HOST);
    let upstream_req = Request::from_parts(parts, body.boxed_unsync());

    let response = match state.client.request(upstream_req).await {
        Ok(resp) => resp,
        Err(e) => {
            tracing::error!("Upstream request for {} failed: {}", path, e);
            return status_response(StatusCode::BAD_GATEWAY, "Unable to reach upstream server");
        }
    };

    if !state.hook.wants_response(&path) {
        return response.map(|b| b.boxed_unsync());
    }

    let (parts, body) = response.into_parts();
    let collected = match body.collect().await {
        Ok(collected) => collected,
        Err(e) => {
            tracing::error!("Failed to read upstream response for {}: {}", path, e);
            return status_response(StatusCode::BAD_GATEWAY, "Upstream response interrupted");
        }
    };
    let trailers = collected.trailers().cloned();
    let data = collected.to_bytes();

    let content_type = parts
        .headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let status = parts.status.as_u16();
    let hook = state.hook.clone();
    let captured = data.clone();
    let capture = tokio::task::spawn_blocking(move || {
        hook.on_response(&ResponseFlow {
            method: &method,
            path: &path,
            status,
            content_type: content_type.as_deref(),
            body: &captured,
        })
    })
    .await;
    if let Err(e) = capture {
        tracing::error!("Capture task failed: {}", e);
    }

    Response::from_parts(parts, replay_body(data, trailers))
}

fn upstream_uri(upstream: &str, original: &Uri) -> Result<Uri, http::uri::InvalidUri> {
    let path_and_query = original
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");
    format!("{upstream}{path_and_query}").parse()
}

fn replay_body(data: Bytes, trailers: Option<HeaderMap>) -> ProxyBody {
    let mut frames = Vec::with_capacity(2);
    if !data.is_empty() {
        frames.push(Ok::<_, hyper::Error>(Frame::data(data)));
    }
    if let Some(trailers) = trailers {
        frames.push(Ok(Frame::trailers(trailers)));
    }
    StreamBody::new(futures::stream::iter(frames)).boxed_unsync()
}

fn status_response(status: StatusCode, message: &'static str) -> Response<ProxyBody> {
    let body = Full::new(Bytes::from_static(message.as_bytes()))
        .map_err(|never| -> hyper::Error { match never {} })
        .boxed_unsync();
    let mut resp = Response::new(body);
    *resp.status_mut() = status;
    resp.headers_mut().insert(
        CONTENT_TYPE,
        http::HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    resp
}
