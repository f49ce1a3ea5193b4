// Copyright (c) The opcat Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The serve command: an HTTP frontend over the catalog query surface.
//!
//! The query contract itself is transport-neutral; this module is the thin
//! transport this build ships. Each route maps 1:1 onto one operation of
//! [`CatalogQuery`], served from the on-disk cache beside the config
//! directory. The server drains in-flight requests on SIGINT/SIGTERM.

use camino::{Utf8Path, Utf8PathBuf};
use clap::{Args, ValueEnum};
use color_eyre::eyre::{eyre, Result};
use opcat::query::CatalogQuery;
use opcat_cache::{Backend, Cache};
use opcat_cmdlib::TerminationLog;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use axum::Router;
use serde::Serialize;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;

/// Which storage backend the serving cache uses.
#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum CacheFormat {
    /// One JSON file per bundle.
    Json,
    /// An embedded SQLite database.
    Sqlite,
}

#[derive(Args, Debug)]
pub struct ServeOptions {
    /// Declarative config directory to serve
    #[arg(value_name = "DIR")]
    dir: Utf8PathBuf,

    /// Port to listen on
    #[arg(short = 'p', long, default_value_t = 50051)]
    port: u16,

    /// Write the last fatal error to this path before exiting
    #[arg(long, value_name = "PATH")]
    termination_log: Option<Utf8PathBuf>,

    /// Directory for the serving cache (default: a temporary directory)
    #[arg(long, value_name = "PATH")]
    cache_dir: Option<Utf8PathBuf>,

    /// Cache backend format
    #[arg(long, value_enum, default_value = "json")]
    cache_format: CacheFormat,

    /// Build the cache and exit without serving
    #[arg(long)]
    cache_only: bool,

    /// Refuse to serve on a cache integrity failure instead of rebuilding
    #[arg(long)]
    cache_enforce_integrity: bool,
}

impl ServeOptions {
    pub fn exec(&self) -> Result<()> {
        let termination_log = TerminationLog::new(self.termination_log.clone());
        match self.run() {
            Ok(()) => Ok(()),
            Err(err) => {
                termination_log.record(&format!("{:#}", err));
                Err(err)
            }
        }
    }

    fn run(&self) -> Result<()> {
        // The cache must live outside the config directory, or its own body
        // would show up as catalog content.
        let mut _tmp_guard: Option<tempfile::TempDir> = None;
        let cache_dir: Utf8PathBuf = match &self.cache_dir {
            Some(dir) => {
                if dir.starts_with(&self.dir) {
                    return Err(eyre!(
                        "cache directory {} must not be inside the config directory {}",
                        dir,
                        self.dir
                    ));
                }
                dir.clone()
            }
            None => {
                let tmp = tempfile::tempdir()?;
                let dir = Utf8Path::from_path(tmp.path())
                    .ok_or_else(|| eyre!("temporary cache path is not UTF-8"))?
                    .join("cache");
                _tmp_guard = Some(tmp);
                dir
            }
        };

        match self.cache_format {
            CacheFormat::Json => self.serve_cache(Cache::json(cache_dir)),
            CacheFormat::Sqlite => self.serve_cache(Cache::sqlite(cache_dir)),
        }
    }

    fn serve_cache<B: Backend + 'static>(&self, cache: Cache<B>) -> Result<()> {
        if self.cache_only {
            cache.build(&self.dir)?;
            info!(cache = %cache.dir(), "cache built");
            return Ok(());
        }
        if self.cache_enforce_integrity {
            cache.check_integrity(&self.dir)?;
            cache.load()?;
        } else {
            cache.load_or_rebuild(&self.dir)?;
        }

        let state: AppState = Arc::new(cache);
        let runtime = tokio::runtime::Runtime::new()?;
        runtime.block_on(serve(state, self.port))
    }
}

type AppState = Arc<dyn CatalogQuery + Send + Sync>;

async fn serve(state: AppState, port: u16) -> Result<()> {
    let app = Router::new()
        .route("/api/v1/packages", get(list_packages))
        .route("/api/v1/packages/:name", get(get_package))
        .route("/api/v1/packages/:pkg/channels/:channel/head", get(get_channel_head))
        .route(
            "/api/v1/packages/:pkg/channels/:channel/bundles/:csv",
            get(get_bundle),
        )
        .route(
            "/api/v1/packages/:pkg/channels/:channel/replaces/:name",
            get(get_bundle_that_replaces),
        )
        .route("/api/v1/entries/replaces/:name", get(entries_that_replace))
        .route(
            "/api/v1/entries/provides/:group/:version/:kind",
            get(entries_that_provide),
        )
        .route(
            "/api/v1/entries/provides/:group/:version/:kind/latest",
            get(latest_entries_that_provide),
        )
        .route(
            "/api/v1/provides/:group/:version/:kind/default",
            get(default_bundle_that_provides),
        )
        .route("/api/v1/bundles", get(list_bundles))
        .with_state(state);

    let listener = TcpListener::bind(("0.0.0.0", port)).await?;
    info!(port, "serving catalog API");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("ctrl-c handler installs");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("signal handler installs")
            .recv()
            .await;
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("shutting down, draining in-flight requests");
}

fn reply<T: Serialize>(result: Result<T, opcat::Error>) -> Response {
    match result {
        Ok(value) => Json(value).into_response(),
        Err(err) => {
            let status = match &err {
                opcat::Error::NotFound(_) => StatusCode::NOT_FOUND,
                opcat::Error::Conflict(_) => StatusCode::CONFLICT,
                opcat::Error::Configuration(_) => StatusCode::BAD_REQUEST,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            };
            let body = Json(serde_json::json!({ "error": err.to_string() }));
            (status, body).into_response()
        }
    }
}

async fn list_packages(State(state): State<AppState>) -> Response {
    reply(state.list_packages())
}

async fn get_package(State(state): State<AppState>, Path(name): Path<String>) -> Response {
    reply(state.get_package(&name))
}

async fn get_channel_head(
    State(state): State<AppState>,
    Path((pkg, channel)): Path<(String, String)>,
) -> Response {
    reply(state.get_bundle_for_channel(&pkg, &channel))
}

async fn get_bundle(
    State(state): State<AppState>,
    Path((pkg, channel, csv)): Path<(String, String, String)>,
) -> Response {
    reply(state.get_bundle(&pkg, &channel, &csv))
}

async fn get_bundle_that_replaces(
    State(state): State<AppState>,
    Path((pkg, channel, name)): Path<(String, String, String)>,
) -> Response {
    reply(state.get_bundle_that_replaces(&name, &pkg, &channel))
}

async fn entries_that_replace(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Response {
    reply(state.get_channel_entries_that_replace(&name))
}

async fn entries_that_provide(
    State(state): State<AppState>,
    Path((group, version, kind)): Path<(String, String, String)>,
) -> Response {
    reply(state.get_channel_entries_that_provide(&group, &version, &kind))
}

async fn latest_entries_that_provide(
    State(state): State<AppState>,
    Path((group, version, kind)): Path<(String, String, String)>,
) -> Response {
    reply(state.get_latest_channel_entries_that_provide(&group, &version, &kind))
}

async fn default_bundle_that_provides(
    State(state): State<AppState>,
    Path((group, version, kind)): Path<(String, String, String)>,
) -> Response {
    reply(state.get_default_bundle_that_provides(&group, &version, &kind))
}

/// Bundle payloads can be large, so the full listing runs on the blocking
/// pool.
async fn list_bundles(State(state): State<AppState>) -> Response {
    let query = state.clone();
    match tokio::task::spawn_blocking(move || query.list_bundles()).await {
        Ok(result) => reply(result),
        Err(err) => reply::<Vec<opcat::api::Bundle>>(Err(opcat::Error::Io {
            context: "bundle listing task".to_string(),
            err: std::io::Error::new(std::io::ErrorKind::Other, err.to_string()),
        })),
    }
}
