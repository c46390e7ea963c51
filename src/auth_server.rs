use std::{net::SocketAddr, sync::Arc};

use axum::{
    extract::{Query, State},
    routing::get,
    Router,
};
use parking_lot::Mutex;
use tokio::sync::oneshot;

#[derive(::serde::Deserialize)]
struct Callback {
    code: Option<String>,
    error: Option<String>,
}

type Handoff = Arc<Mutex<Option<oneshot::Sender<String>>>>;

async fn callback(State(handoff): State<Handoff>, Query(query): Query<Callback>) -> &'static str {
    let Some(code) = query.code else {
        log::warn!(
            "authorization was not granted: {err}",
            err = query.error.as_deref().unwrap_or("no code")
        );
        return "Authorization failed, check the logs and try again.";
    };

    match handoff.lock().take() {
        Some(tx) => match tx.send(code) {
            Ok(()) => "Authorized! You can close this window.",
            Err(_) => "Already authorized, you can close this window.",
        },
        None => "Already authorized, you can close this window.",
    }
}

pub fn router(handoff: oneshot::Sender<String>) -> Router {
    Router::new()
        .route("/spotifyAuth", get(callback))
        .with_state(Arc::new(Mutex::new(Some(handoff))))
}

/// Serves the redirect target until the first authorization code arrives, then returns it.
pub async fn wait_for_code(port: u16) -> anyhow::Result<String> {
    let (tx, rx) = oneshot::channel();
    let (stop_tx, stop_rx) = oneshot::channel::<()>();

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    log::info!("waiting for the spotify redirect on {addr}");

    let server = tokio::spawn(async move {
        axum::serve(listener, router(tx))
            .with_graceful_shutdown(async move {
                let _ = stop_rx.await;
            })
            .await
    });

    let code = rx.await;
    let _ = stop_tx.send(());
    if let Ok(Err(err)) = server.await {
        log::warn!("callback server error: {err}");
    }

    code.map_err(|_| anyhow::anyhow!("the callback server stopped before a code arrived"))
}
