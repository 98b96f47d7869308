use std::{io, sync::Arc, time::Duration};

use actix_web::{middleware::Logger, web, App, HttpServer};
use bandshare_domain::config::{ApiConfig, ConfigError};
use bandshare_domain::services::{
    rail::{PaymentRail, RailError},
    relay::RelayError,
    telemetry::{init_telemetry, TelemetryConfig, TelemetryError},
};
use bandshare_monitor::{HttpPayoutRail, HttpTrafficRelay};
use bandshare_storage::SeaOrmStorage;
use thiserror::Error;
use tracing::info;

use crate::{
    handlers::{
        data_shared_handler, earnings_handler, health_handler, json_config, metrics_handler,
        partner_request_handler, partner_stats_handler, payout_eligibility_handler,
        payout_history_handler, payout_request_handler, query_config, revoke_token_handler,
        start_sharing_handler, stop_sharing_handler,
    },
    state::AppState,
};

/// Rail timeout used when no payout rail is configured; only manual methods
/// are accepted then, so it never applies to a live call.
const FALLBACK_RAIL_TIMEOUT: Duration = Duration::from_secs(30);

/// Where a listener should bind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Listener<'a> {
    Tcp(&'a str),
    Unix(&'a str),
}

cfg_if::cfg_if! {
    if #[cfg(unix)] {
        macro_rules! bind_unix {
            ($server:expr, $path:expr) => {{
                cleanup_socket($path)?;
                $server.bind_uds($path)?
            }};
        }

        /// Removes a socket file left behind by an earlier run so the bind
        /// does not fail.
        fn cleanup_socket(path: &str) -> io::Result<()> {
            let socket_path = std::path::Path::new(path);
            if socket_path.exists() {
                std::fs::remove_file(socket_path)?;
            }
            Ok(())
        }
    } else {
        macro_rules! bind_unix {
            ($server:expr, $path:expr) => {{
                let _ = $server;
                return Err(BootstrapError::Io(io::Error::other(format!(
                    "unix socket '{}' requested but this platform does not support it",
                    $path
                ))));
            }};
        }
    }
}

macro_rules! bind_listener {
    ($server:expr, $listener:expr) => {{
        let server = $server;
        match $listener {
            Listener::Tcp(addr) => server.bind(addr)?,
            Listener::Unix(path) => bind_unix!(server, path),
        }
    }};
}

/// Partner and contributor routes, all under `/api`.
pub fn public_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api")
            .route("/health", web::get().to(health_handler))
            .route("/partner/request", web::post().to(partner_request_handler))
            .route("/partner/stats", web::get().to(partner_stats_handler))
            .route(
                "/payout/eligibility",
                web::get().to(payout_eligibility_handler),
            )
            .route("/payout/request", web::post().to(payout_request_handler))
            .route("/payout/history", web::get().to(payout_history_handler))
            .route("/bandwidth/start", web::post().to(start_sharing_handler))
            .route("/bandwidth/stop", web::post().to(stop_sharing_handler))
            .route("/bandwidth/data-shared", web::get().to(data_shared_handler))
            .route("/earnings", web::get().to(earnings_handler)),
    );
}

/// Operator routes served on the internal listener.
pub fn internal_routes(cfg: &mut web::ServiceConfig) {
    cfg.route("/metrics", web::get().to(metrics_handler)).route(
        "/api/tokens/{token}/revoke",
        web::post().to(revoke_token_handler),
    );
}

pub async fn run() -> Result<(), BootstrapError> {
    let config = ApiConfig::load_from_env()?;
    let telemetry_config = TelemetryConfig::from_env("API");
    let telemetry = init_telemetry(&telemetry_config)?;
    let storage = SeaOrmStorage::connect(config.database_url()).await?;

    let relay = Arc::new(HttpTrafficRelay::new(config.relay())?);
    let rail = config
        .payout_rail()
        .map(HttpPayoutRail::new)
        .transpose()?
        .map(|rail| Arc::new(rail) as Arc<dyn PaymentRail>);
    if rail.is_none() {
        info!("no payout rail configured; only manual payout methods are available");
    }
    let rail_timeout = config
        .payout_rail()
        .map(|rail| rail.timeout())
        .unwrap_or(FALLBACK_RAIL_TIMEOUT);

    let state = AppState::new(
        storage,
        relay,
        rail,
        config.relay(),
        rail_timeout,
        telemetry,
    );

    let include_metrics_on_public = !config.has_internal_listener();
    let public_state = state.clone();
    let public_server = HttpServer::new(move || {
        let mut app = App::new()
            .app_data(web::Data::new(public_state.clone()))
            .app_data(json_config())
            .app_data(query_config())
            .wrap(Logger::default())
            .configure(public_routes);
        if include_metrics_on_public {
            app = app.route("/metrics", web::get().to(metrics_handler));
        }
        app
    });
    let public_listener = public_listener(&config);
    info!(listener = ?public_listener, "public listener starting");
    let public_server = bind_listener!(public_server, public_listener).run();

    let internal_server = match internal_listener(&config)? {
        Some(listener) => {
            let internal_state = state.clone();
            let server = HttpServer::new(move || {
                App::new()
                    .app_data(web::Data::new(internal_state.clone()))
                    .app_data(json_config())
                    .wrap(Logger::default())
                    .configure(internal_routes)
            });
            info!(listener = ?listener, "internal listener starting");
            Some(bind_listener!(server, listener).run())
        }
        None => None,
    };

    if let Some(internal) = internal_server {
        tokio::try_join!(public_server, internal)?;
    } else {
        public_server.await?;
    }

    Ok(())
}

fn public_listener(config: &ApiConfig) -> Listener<'_> {
    match config.api_unix_socket() {
        Some(socket) => Listener::Unix(socket),
        None => Listener::Tcp(config.api_bind_address()),
    }
}

fn internal_listener(config: &ApiConfig) -> Result<Option<Listener<'_>>, BootstrapError> {
    if !config.has_internal_listener() {
        return Ok(None);
    }
    if let Some(socket) = config.internal_unix_socket() {
        return Ok(Some(Listener::Unix(socket)));
    }
    config
        .internal_bind_address()
        .map(|addr| Some(Listener::Tcp(addr)))
        .ok_or_else(|| {
            BootstrapError::Io(io::Error::other(
                "internal listener configured but no bind target provided",
            ))
        })
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error("config error: {0}")]
    Config(#[from] ConfigError),
    #[error("telemetry error: {0}")]
    Telemetry(#[from] TelemetryError),
    #[error("storage error: {0}")]
    Storage(#[from] bandshare_domain::storage::StorageError),
    #[error("relay client error: {0}")]
    Relay(#[from] RelayError),
    #[error("payout rail client error: {0}")]
    Rail(#[from] RailError),
    #[error(transparent)]
    Io(#[from] io::Error),
}
