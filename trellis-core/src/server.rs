//! HTTP/1.1 server over hyper.

use crate::application::Application;
use crate::error::Result;
use crate::logging::{debug, info, warn};
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use tokio::net::TcpListener;

/// Serve `app` on `addr` until the process is interrupted
pub async fn serve(app: Application, addr: SocketAddr) -> Result<()> {
    let listener = TcpListener::bind(addr).await?;
    serve_with_shutdown(app, listener, async {
        if tokio::signal::ctrl_c().await.is_err() {
            std::future::pending::<()>().await;
        }
    })
    .await
}

/// Serve `app` on an already bound listener until `shutdown` resolves.
///
/// In-flight connections are left to finish on their own tasks.
pub async fn serve_with_shutdown(
    app: Application,
    listener: TcpListener,
    shutdown: impl Future<Output = ()>,
) -> Result<()> {
    info!(addr = %listener.local_addr()?, app = app.name(), "Server listening");
    tokio::pin!(shutdown);

    loop {
        let (stream, peer) = tokio::select! {
            accepted = listener.accept() => accepted?,
            _ = &mut shutdown => {
                info!("Server shutting down");
                return Ok(());
            }
        };

        let io = TokioIo::new(stream);
        let app = app.clone();
        tokio::spawn(async move {
            let service = service_fn(move |raw: hyper::Request<Incoming>| {
                let app = app.clone();
                async move { Ok::<_, Infallible>(handle_connection_request(&app, raw, peer).await) }
            });

            if let Err(err) = http1::Builder::new().serve_connection(io, service).await {
                debug!(peer = %peer, error = %err, "Connection closed with error");
            }
        });
    }
}

async fn handle_connection_request(
    app: &Application,
    raw: hyper::Request<Incoming>,
    peer: SocketAddr,
) -> hyper::Response<Full<Bytes>> {
    let (parts, body) = raw.into_parts();
    let body = match body.collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(err) => {
            warn!(peer = %peer, error = %err, "Failed to read request body");
            let mut response = hyper::Response::new(Full::new(Bytes::from_static(b"Bad Request")));
            *response.status_mut() = http::StatusCode::BAD_REQUEST;
            return response;
        }
    };

    app.dispatch(http::Request::from_parts(parts, body))
        .await
        .map(Full::new)
}
