// src/server/routes.rs
//
// Endpoint table and per-connection handling.

use std::net::SocketAddr;
use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;
use tokio::sync::watch;

use super::http::{
    read_request_head, write_empty, write_event, write_event_stream_head, write_json, HttpError,
    RequestHead,
};
use super::surface::DeliverySurface;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Route {
    Index,
    Snapshot,
    Stream,
    Status,
    Preflight,
    MethodNotAllowed,
    NotFound,
}

pub fn route(head: &RequestHead) -> Route {
    if head.method == "OPTIONS" {
        return Route::Preflight;
    }
    let path = match head.path.trim_end_matches('/') {
        "" => "/",
        p => p,
    };
    let target = match path {
        "/" => Route::Index,
        "/api/lidar" => Route::Snapshot,
        "/api/lidar/stream" => Route::Stream,
        "/api/status" => Route::Status,
        _ => return Route::NotFound,
    };
    if head.method == "GET" {
        target
    } else {
        Route::MethodNotAllowed
    }
}

fn index_body() -> serde_json::Value {
    serde_json::json!({
        "status": "running",
        "message": "TF-Luna bridge is active",
        "endpoints": {
            "/api/lidar": "Latest measurement (JSON)",
            "/api/lidar/stream": "Server-Sent Events stream of measurements",
            "/api/status": "Serial link health",
        }
    })
}

fn error_body(message: impl Into<String>) -> serde_json::Value {
    serde_json::json!({ "error": message.into() })
}

// ============================================================================
// Connection Handling
// ============================================================================

pub(crate) async fn handle_connection(
    mut stream: TcpStream,
    peer: SocketAddr,
    surface: DeliverySurface,
    shutdown: watch::Receiver<bool>,
) -> Result<(), HttpError> {
    let head = match read_request_head(&mut stream).await {
        Ok(head) => head,
        Err(HttpError::Closed) => return Ok(()),
        Err(e @ HttpError::Malformed(_)) => {
            write_json(&mut stream, 400, &error_body(e.to_string())).await?;
            return Err(e);
        }
        Err(e @ HttpError::TooLarge) => {
            write_json(&mut stream, 431, &error_body(e.to_string())).await?;
            return Err(e);
        }
        Err(e @ HttpError::Timeout) => {
            write_json(&mut stream, 408, &error_body(e.to_string())).await?;
            return Err(e);
        }
        Err(e) => return Err(e),
    };

    match route(&head) {
        Route::Index => write_json(&mut stream, 200, &index_body()).await?,
        Route::Snapshot => write_json(&mut stream, 200, &surface.snapshot()).await?,
        Route::Status => write_json(&mut stream, 200, &surface.health()).await?,
        Route::Stream => stream_snapshots(stream, peer, surface, shutdown).await?,
        Route::Preflight => write_empty(&mut stream, 204).await?,
        Route::MethodNotAllowed => {
            write_json(
                &mut stream,
                405,
                &error_body(format!("{} not allowed on {}", head.method, head.path)),
            )
            .await?
        }
        Route::NotFound => {
            write_json(
                &mut stream,
                404,
                &error_body(format!("no endpoint at {}", head.path)),
            )
            .await?
        }
    }
    Ok(())
}

/// Push a snapshot every stream interval until the client goes away or the
/// server shuts down. Link errors do not end the stream; they show up in the
/// `status` field.
async fn stream_snapshots(
    stream: TcpStream,
    peer: SocketAddr,
    surface: DeliverySurface,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), HttpError> {
    let (mut rd, mut wr) = stream.into_split();
    write_event_stream_head(&mut wr).await?;
    let mut sub = surface.subscribe();
    tlog!(
        "[http] {} subscribed to stream ({} open)",
        peer,
        surface.subscriber_count()
    );
    let mut scratch = [0u8; 256];
    let mut sent: u64 = 0;
    loop {
        tokio::select! {
            record = sub.next() => {
                if let Err(e) = write_event(&mut wr, &record).await {
                    tlog!("[http] {} stream write failed: {}", peer, e);
                    break;
                }
                sent += 1;
            }
            read = rd.read(&mut scratch) => match read {
                Ok(0) | Err(_) => break,
                // Anything a client sends after the request is ignored
                Ok(_) => {}
            },
            _ = shutdown.changed() => break,
        }
    }

    drop(sub);
    tlog!(
        "[http] {} stream closed after {} events ({} open)",
        peer,
        sent,
        surface.subscriber_count()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn head(method: &str, path: &str) -> RequestHead {
        RequestHead {
            method: method.to_string(),
            path: path.to_string(),
        }
    }

    #[test]
    fn test_route_table() {
        assert_eq!(route(&head("GET", "/")), Route::Index);
        assert_eq!(route(&head("GET", "/api/lidar")), Route::Snapshot);
        assert_eq!(route(&head("GET", "/api/lidar/")), Route::Snapshot);
        assert_eq!(route(&head("GET", "/api/lidar/stream")), Route::Stream);
        assert_eq!(route(&head("GET", "/api/status")), Route::Status);
        assert_eq!(route(&head("GET", "/api/radar")), Route::NotFound);
    }

    #[test]
    fn test_route_methods() {
        assert_eq!(route(&head("POST", "/api/lidar")), Route::MethodNotAllowed);
        assert_eq!(route(&head("DELETE", "/")), Route::MethodNotAllowed);
        assert_eq!(route(&head("POST", "/nowhere")), Route::NotFound);
        assert_eq!(route(&head("OPTIONS", "/api/lidar")), Route::Preflight);
    }
}
