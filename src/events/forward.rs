//! Bridge a node-local bus to a hub over HTTP
//!
//! Every event is POSTed to `{hub}/se/grid/events`. Delivery is best-effort:
//! failures are logged and never propagate. The hub side re-publishes onto
//! its own bus.

use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;
use url::Url;

use super::{EventBus, GridEvent};

/// Path the hub accepts forwarded events on
pub const EVENTS_PATH: &str = "/se/grid/events";

/// Forward events from `bus` to `hub` until `shutdown` fires
pub fn spawn(
    bus: &EventBus,
    hub: Url,
    client: reqwest::Client,
    shutdown: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    let mut rx = bus.subscribe();
    tokio::spawn(async move {
        let endpoint = match hub.join(EVENTS_PATH) {
            Ok(u) => u,
            Err(e) => {
                tracing::error!(hub = %hub, error = %e, "invalid hub url, not forwarding events");
                return;
            }
        };

        loop {
            let event = tokio::select! {
                () = shutdown.cancelled() => break,
                received = rx.recv() => match received {
                    Ok(event) => event,
                    Err(RecvError::Lagged(n)) => {
                        tracing::warn!(skipped = n, "event forwarder lagging");
                        continue;
                    }
                    Err(RecvError::Closed) => break,
                },
            };
            publish(&client, endpoint.clone(), event);
        }
        tracing::debug!("event forwarder stopped");
    })
}

/// Send one event without waiting for the result
fn publish(client: &reqwest::Client, endpoint: Url, event: GridEvent) {
    let client = client.clone();
    drop(tokio::spawn(async move {
        let result = client
            .post(endpoint)
            .json(&event)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status);
        if let Err(e) = result {
            tracing::warn!(event = event.name(), error = %e, "failed to forward grid event");
        } else {
            tracing::trace!(event = event.name(), "forwarded grid event");
        }
    }));
}
