//! HTTP endpoint for Prometheus scrapes and liveness probes.

use crate::metrics::MetricsCollector;
use bytes::Bytes;
use http_body_util::Full;
use hyper::header::{CONTENT_TYPE, HeaderValue};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use prometheus_client::encoding::text::encode;
use std::convert::Infallible;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

const PROMETHEUS_CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

/// Serves the collector's registry over HTTP/1.
pub struct MetricsServer {
    listener: TcpListener,
    endpoint: Arc<Endpoint>,
}

/// What a request can reach.
struct Endpoint {
    metrics_path: String,
    collector: MetricsCollector,
}

impl MetricsServer {
    /// Bind `address`; metrics are served under `path`.
    pub async fn bind(address: SocketAddr, path: String, collector: MetricsCollector) -> io::Result<Self> {
        let listener = TcpListener::bind(address).await?;
        Ok(Self {
            listener,
            endpoint: Arc::new(Endpoint {
                metrics_path: path,
                collector,
            }),
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept scrapes until `shutdown` fires.
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        if let Ok(address) = self.listener.local_addr() {
            info!(%address, path = %self.endpoint.metrics_path, "metrics server listening");
        }

        loop {
            let stream = tokio::select! {
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, _)) => stream,
                    Err(e) => {
                        warn!(error = %e, "metrics accept failed");
                        continue;
                    }
                },
                _ = shutdown.recv() => break,
            };
            tokio::spawn(serve(stream, Arc::clone(&self.endpoint)));
        }

        debug!("metrics server stopped");
    }
}

async fn serve(stream: TcpStream, endpoint: Arc<Endpoint>) {
    let service = service_fn(move |req: Request<Incoming>| {
        let endpoint = Arc::clone(&endpoint);
        async move { Ok::<_, Infallible>(endpoint.respond(req.method(), req.uri().path())) }
    });

    if let Err(e) = http1::Builder::new()
        .serve_connection(TokioIo::new(stream), service)
        .await
    {
        debug!(error = %e, "metrics connection closed with error");
    }
}

impl Endpoint {
    fn respond(&self, method: &Method, path: &str) -> Response<Full<Bytes>> {
        debug!(%method, path, "metrics request");

        if method != Method::GET {
            return text(StatusCode::METHOD_NOT_ALLOWED, "method not allowed\n".into());
        }

        match path {
            p if p == self.metrics_path => self.scrape(),
            "/health" | "/healthz" => text(StatusCode::OK, "ok\n".into()),
            "/" => text(
                StatusCode::OK,
                format!("sessionlb\n\n{} prometheus metrics\n/health liveness\n", self.metrics_path),
            ),
            _ => text(StatusCode::NOT_FOUND, "not found\n".into()),
        }
    }

    fn scrape(&self) -> Response<Full<Bytes>> {
        let mut body = String::new();
        if let Err(e) = encode(&mut body, self.collector.registry()) {
            error!(error = %e, "metrics encoding failed");
            return text(StatusCode::INTERNAL_SERVER_ERROR, "encoding failed\n".into());
        }
        let mut response = text(StatusCode::OK, body);
        response
            .headers_mut()
            .insert(CONTENT_TYPE, HeaderValue::from_static(PROMETHEUS_CONTENT_TYPE));
        response
    }
}

fn text(status: StatusCode, body: String) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::from(body)));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("text/plain"));
    response
}
