// src/server/mod.rs
//
// HTTP delivery of the latest measurement: snapshot, event stream and
// link health. Consumers only ever read the store.

pub mod http;
pub mod routes;
pub mod surface;

pub use http::HttpError;
pub use surface::{DeliverySurface, HealthRecord, LinkInfo, SnapshotRecord, Subscription};

use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::watch;

/// Accept connections until `shutdown` flips (or its sender is dropped).
/// Each connection runs on its own task; open streams see the same signal
/// and end on their own.
pub async fn serve(listener: TcpListener, surface: DeliverySurface, mut shutdown: watch::Receiver<bool>) {
    if let Ok(addr) = listener.local_addr() {
        tlog!("[http] Listening on http://{}", addr);
    }

    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    let surface = surface.clone();
                    let shutdown = shutdown.clone();
                    tokio::spawn(async move {
                        match routes::handle_connection(stream, peer, surface, shutdown).await {
                            Ok(()) | Err(HttpError::Closed) => {}
                            Err(e) => tlog!("[http] {}: {}", peer, e),
                        }
                    });
                }
                Err(e) => {
                    // Usually fd exhaustion; back off instead of spinning
                    tlog!("[http] accept failed: {}", e);
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
            },
            _ = shutdown.changed() => break,
        }
    }

    tlog!("[http] Server stopped");
}
