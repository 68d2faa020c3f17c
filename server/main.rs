/// SickleClinix prediction server
///
/// Classifies uploaded blood-smear images as Normal or Sickle and returns a
/// Grad-CAM overlay showing which regions drove the decision.
///
/// Run with:
///   cargo run --bin sickle-cam -- init-model --out model/classifier.json
///   cargo run --bin server --release
/// Then:
///   curl -F image=@cell.jpg http://127.0.0.1:5000/predict
///
/// Settings come from `config/default.toml` and `SICKLE_CAM__*` environment
/// variables (see `sickle_cam::config`).

mod handlers;
mod routes;
mod state;
mod util;

use std::process::ExitCode;
use std::sync::Arc;
use std::thread;

use tiny_http::Server;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use sickle_cam::config::{LoggingConfig, ServiceConfig};
use sickle_cam::{Error, Explainer, Storage};

use state::{AppState, SharedState};

fn init_logging(config: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.level));

    if config.json {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).with_target(true).init();
    }
}

fn main() -> ExitCode {
    let config = match ServiceConfig::load() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load configuration: {}", e);
            return ExitCode::FAILURE;
        }
    };
    init_logging(&config.logging);

    match run(config) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(kind = ?e.kind(), "{}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(config: ServiceConfig) -> sickle_cam::Result<()> {
    let storage = Storage::new(&config.storage);
    storage.ensure_dirs()?;

    // Fails fast when the model is missing or has no usable Grad-CAM layer.
    let explainer = Explainer::load(&config.model)?;

    let server = Server::http(&config.server.addr)
        .map_err(|e| Error::Io(std::io::Error::new(std::io::ErrorKind::AddrNotAvailable, e.to_string())))?;
    let server = Arc::new(server);
    let state: SharedState = Arc::new(AppState {
        explainer,
        storage,
        max_upload_bytes: config.server.max_upload_bytes,
    });

    let workers = config.server.workers.max(1);
    info!(addr = %config.server.addr, workers, "listening");

    let mut handles = Vec::with_capacity(workers);
    for i in 0..workers {
        let server = Arc::clone(&server);
        let state = Arc::clone(&state);
        let handle = thread::Builder::new()
            .name(format!("worker-{}", i))
            .spawn(move || loop {
                match server.recv() {
                    Ok(request) => routes::dispatch(request, &state),
                    Err(e) => {
                        error!(error = %e, "listener failed");
                        break;
                    }
                }
            })?;
        handles.push(handle);
    }

    for handle in handles {
        if handle.join().is_err() {
            error!("worker thread panicked");
        }
    }
    Ok(())
}
