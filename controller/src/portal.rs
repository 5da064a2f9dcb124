use std::{
    net::SocketAddr,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use irrigation_common::{
    error::LinkError,
    hal::{Portal, WifiCredentials},
    storage,
};
use serde::{Deserialize, Serialize};
use tokio::runtime::Handle;
use tracing::{info, warn};

use crate::store::JsonFileStore;

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

#[derive(Debug, Serialize)]
struct NetworkView {
    #[serde(rename = "wifiSsid")]
    wifi_ssid: String,
    #[serde(rename = "wifiPassSet")]
    wifi_pass_set: bool,
}

#[derive(Debug, Deserialize)]
struct NetworkUpdate {
    #[serde(rename = "wifiSsid")]
    wifi_ssid: String,
    #[serde(rename = "wifiPass", default)]
    wifi_pass: String,
}

#[derive(Debug, Serialize)]
struct NetworkUpdateResponse {
    #[serde(rename = "restartRequired")]
    restart_required: bool,
}

#[derive(Clone)]
struct PortalState {
    store: JsonFileStore,
    restart: Arc<AtomicBool>,
}

/// Setup portal shared by every device incarnation. The HTTP server is
/// started once and keeps running across device restarts.
pub struct PortalServer {
    runtime: Handle,
    addr: SocketAddr,
    state: PortalState,
    started: AtomicBool,
}

impl PortalServer {
    pub fn new(runtime: Handle, port: u16, store: JsonFileStore) -> Arc<Self> {
        Arc::new(Self {
            runtime,
            addr: SocketAddr::from(([0, 0, 0, 0], port)),
            state: PortalState {
                store,
                restart: Arc::new(AtomicBool::new(false)),
            },
            started: AtomicBool::new(false),
        })
    }

    fn ensure_started(&self) -> Result<(), LinkError> {
        if self.started.load(Ordering::SeqCst) {
            return Ok(());
        }

        let listener = std::net::TcpListener::bind(self.addr)
            .map_err(|err| LinkError::Transport(format!("portal bind {}: {err}", self.addr)))?;
        listener
            .set_nonblocking(true)
            .map_err(|err| LinkError::Transport(err.to_string()))?;
        let listener = {
            let _guard = self.runtime.enter();
            tokio::net::TcpListener::from_std(listener)
                .map_err(|err| LinkError::Transport(err.to_string()))?
        };

        let app = router(self.state.clone());
        self.runtime.spawn(async move {
            if let Err(err) = axum::serve(listener, app).await {
                warn!("setup portal stopped: {err:#}");
            }
        });
        self.started.store(true, Ordering::SeqCst);
        info!("setup portal listening on http://{}", self.addr);
        Ok(())
    }
}

/// Per-device handle onto the shared [`PortalServer`].
pub struct HostPortal(pub Arc<PortalServer>);

impl Portal for HostPortal {
    fn start(&mut self) -> Result<(), LinkError> {
        // A save made while no device was in ApMode must not restart this one.
        self.0.state.restart.store(false, Ordering::SeqCst);
        self.0.ensure_started()
    }

    fn restart_requested(&mut self) -> bool {
        self.0.state.restart.swap(false, Ordering::SeqCst)
    }
}

fn router(state: PortalState) -> Router {
    Router::new()
        .route(
            "/api/network",
            get(handle_get_network).post(handle_post_network),
        )
        .with_state(state)
}

async fn handle_get_network(State(state): State<PortalState>) -> axum::response::Response {
    let store = state.store.clone();
    let loaded = tokio::task::spawn_blocking(move || storage::load_credentials(&store)).await;
    let credentials = match loaded {
        Ok(Ok(credentials)) => credentials,
        Ok(Err(err)) => {
            warn!("failed to load stored credentials: {err}");
            None
        }
        Err(err) => {
            warn!("credential load task failed: {err}");
            return error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to read network settings",
            );
        }
    };
    let view = match credentials {
        Some(credentials) => NetworkView {
            wifi_ssid: credentials.ssid,
            wifi_pass_set: !credentials.pass.is_empty(),
        },
        None => NetworkView {
            wifi_ssid: String::new(),
            wifi_pass_set: false,
        },
    };
    Json(view).into_response()
}

async fn handle_post_network(
    State(state): State<PortalState>,
    Json(update): Json<NetworkUpdate>,
) -> impl IntoResponse {
    let ssid = update.wifi_ssid.trim();
    if ssid.is_empty() {
        return error_response(StatusCode::BAD_REQUEST, "wifiSsid cannot be empty");
    }

    let credentials = WifiCredentials {
        ssid: ssid.to_string(),
        pass: update.wifi_pass,
    };
    let mut store = state.store.clone();
    let to_save = credentials.clone();
    let saved =
        tokio::task::spawn_blocking(move || storage::save_credentials(&mut store, &to_save)).await;
    match saved {
        Ok(Ok(())) => {}
        Ok(Err(err)) => {
            warn!("failed to persist network credentials: {err}");
            return error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to persist network settings",
            );
        }
        Err(err) => {
            warn!("credential save task failed: {err}");
            return error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to persist network settings",
            );
        }
    }

    info!("stored credentials for network `{}`, restart requested", credentials.ssid);
    state.restart.store(true, Ordering::SeqCst);
    Json(NetworkUpdateResponse {
        restart_required: true,
    })
    .into_response()
}

fn error_response(status: StatusCode, message: &str) -> axum::response::Response {
    (
        status,
        Json(ErrorBody {
            error: message.to_string(),
        }),
    )
        .into_response()
}
