use anyhow::Result;
use docvault::{
    app::Application,
    config::{AppConfig, Command},
    db,
    services::user_service::{NewUser, UserService},
};
use futures::future::join_all;
use std::{io::ErrorKind, net::SocketAddr};
use tokio::{net::TcpListener, signal};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // --- Parse config + command ---
    let (cfg, command) = AppConfig::from_env_and_args()?;

    // --- Logging setup ---
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,docvault=debug")),
        )
        .init();

    tracing::info!(
        backend = ?cfg.storage_backend,
        database = %cfg.database_url,
        "starting docvault: {:?}",
        command
    );

    match command {
        Command::Migrate => {
            let pool = db::connect(&cfg.database_url).await?;
            db::migrate(&pool).await?;
            tracing::info!("Database migration complete.");
            pool.close().await;
            Ok(())
        }
        Command::CreateUser {
            username,
            email,
            first_name,
            last_name,
            staff,
        } => {
            let pool = db::connect(&cfg.database_url).await?;
            db::migrate(&pool).await?;
            let users = UserService::new(pool.clone());
            let user = users
                .create_user(NewUser {
                    username,
                    email,
                    first_name,
                    last_name,
                    is_staff: staff,
                })
                .await?;
            let token = users.issue_token(user.id).await?;
            println!("{token}");
            pool.close().await;
            Ok(())
        }
        Command::Worker => {
            let app = Application::build(&cfg).await?;
            let shutdown = CancellationToken::new();
            let mut handles = app.workers.spawn(shutdown.clone());
            handles.extend(app.scheduler.spawn(shutdown.clone()));

            shutdown_signal().await;
            shutdown.cancel();
            join_all(handles).await;
            app.close().await;
            tracing::info!("Worker shutdown complete");
            Ok(())
        }
        Command::Serve { no_workers } => serve(&cfg, no_workers).await,
    }
}

async fn serve(cfg: &AppConfig, no_workers: bool) -> Result<()> {
    let app = Application::build(cfg).await?;
    let shutdown = CancellationToken::new();
    let mut handles = Vec::new();
    if !no_workers {
        handles.extend(app.workers.spawn(shutdown.clone()));
        handles.extend(app.scheduler.spawn(shutdown.clone()));
    }

    // --- Start server ---
    let addr = cfg.addr();
    let listener = match TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(err)
            if err.kind() == ErrorKind::PermissionDenied
                && matches!(cfg.host.as_str(), "0.0.0.0" | "::") =>
        {
            let fallback_addr = format!("127.0.0.1:{}", cfg.port);
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

    tracing::info!("Server listening on http://{}", listener.local_addr()?);
    let server_shutdown = shutdown.clone();
    axum::serve(
        listener,
        app.router()
            .into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move {
        shutdown_signal().await;
        server_shutdown.cancel();
    })
    .await?;

    shutdown.cancel();
    join_all(handles).await;
    app.close().await;
    tracing::info!("Server shutdown complete");
    Ok(())
}

/// Resolves on Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            tracing::error!("failed to listen for Ctrl+C: {err}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                tracing::error!("failed to install SIGTERM handler: {err}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received Ctrl+C, starting graceful shutdown..."),
        _ = terminate => tracing::info!("Received SIGTERM, starting graceful shutdown..."),
    }
}
