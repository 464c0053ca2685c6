use anyhow::{Context, Result};
use axum::Router;
use clap::Parser;
use oss_client::{
    config::{Args, BackendConfig, Command, GatewayConfig},
    models::payload::FilePayload,
    new_backend,
    routes::routes::{AppState, routes},
};
use std::{io::ErrorKind, sync::Arc};
use tokio::{fs, net::TcpListener};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // --- Logging setup ---
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // --- Parse config ---
    let args = Args::parse();
    let cfg = Arc::new(BackendConfig::from_env_and_args(&args)?);

    tracing::info!("Starting oss-client with config: {:?}", cfg);

    // --- Select the provider once ---
    let backend = new_backend(cfg.clone())?;

    match args.command {
        Command::Upload {
            path,
            chunked,
            content_type,
        } => {
            let payload = FilePayload::from_path(&path, content_type).await?;
            let url = if chunked {
                backend.chunked_upload(&payload).await?
            } else {
                backend.upload(&payload).await?
            };
            println!("{url}");
        }
        Command::Download { object, dest } => {
            let path = backend.download(&dest, &object).await?;
            println!("{}", path.display());
        }
        Command::Serve {
            host,
            port,
            spool_dir,
        } => {
            let gateway = GatewayConfig::from_env_and_args(host, port, spool_dir)?;

            // --- Ensure spool directory exists ---
            if fs::metadata(&gateway.spool_dir).await.is_err() {
                fs::create_dir_all(&gateway.spool_dir)
                    .await
                    .with_context(|| format!("creating {}", gateway.spool_dir.display()))?;
                tracing::info!("Created spool directory at {}", gateway.spool_dir.display());
            }

            // --- Build router ---
            let state = AppState {
                backend,
                bucket: cfg.bucket.clone(),
                spool_dir: gateway.spool_dir.clone(),
            };
            let app: Router = routes().with_state(state);

            // --- Start server ---
            let addr = gateway.addr();
            let listener = match TcpListener::bind(&addr).await {
                Ok(listener) => listener,
                Err(err)
                    if err.kind() == ErrorKind::PermissionDenied
                        && matches!(gateway.host.as_str(), "0.0.0.0" | "::") =>
                {
                    let fallback_addr = format!("127.0.0.1:{}", gateway.port);
                    tracing::warn!(
                        "Permission denied binding to {} ({}). Falling back to {}",
                        addr,
                        err,
                        fallback_addr
                    );
                    TcpListener::bind(&fallback_addr).await?
                }
                Err(err) => return Err(err.into()),
            };

            tracing::info!("Gateway listening on http://{}", listener.local_addr()?);
            axum::serve(listener, app).await?;
        }
    }

    Ok(())
}
