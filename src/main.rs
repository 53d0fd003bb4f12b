use std::{process, sync::Arc};

use quire::{
    application::{content::ContentService, error::AppError},
    cache::{CacheConfig, Clock, Diagnostics, ReadThrough},
    config,
    infra::{
        error::InfraError,
        http::{self, HttpState},
        source::build_source,
        store::build_store,
        telemetry,
    },
};
use tokio::{sync::watch, try_join};
use tracing::{Dispatch, Level, dispatcher, error, info, warn};
use tracing_subscriber::fmt as tracing_fmt;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_application_error(&error);
        process::exit(1);
    }
}

fn report_application_error(error: &AppError) {
    if dispatcher::has_been_set() {
        error!(error = %error, "application error");
        return;
    }

    let subscriber = tracing_fmt().with_max_level(Level::ERROR).finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %error, "application error");
    });
}

async fn run() -> Result<(), AppError> {
    let (cli_args, settings) = config::load_with_cli()?;

    let command = cli_args
        .command
        .unwrap_or(config::Command::Serve(Box::<config::ServeArgs>::default()));

    telemetry::init(&settings.logging).map_err(AppError::from)?;

    match command {
        config::Command::Serve(_) => run_serve(settings).await,
        config::Command::Invalidate(args) => run_invalidate(settings, args).await,
        config::Command::Purge(_) => run_purge(settings).await,
    }
}

/// Everything a command needs to read or maintain the cache.
struct ApplicationContext {
    cache: Arc<ReadThrough>,
    content: Arc<ContentService>,
}

async fn build_application_context(
    settings: &config::Settings,
) -> Result<ApplicationContext, AppError> {
    let source = build_source(&settings.source)?;
    let cache_config = CacheConfig::from_settings(&settings.cache, source.id());

    let clock = Clock::system();
    let diagnostics = Arc::new(Diagnostics::new());
    let store = build_store(&settings.store, clock.clone(), diagnostics).await;

    let cache = Arc::new(ReadThrough::start(store, clock, &cache_config));
    let content = Arc::new(ContentService::new(
        Arc::clone(&cache),
        source,
        cache_config,
    ));

    info!(
        target: "quire::startup",
        namespace = content.namespace(),
        backend = cache.backend().as_str(),
        "cache ready"
    );
    Ok(ApplicationContext { cache, content })
}

async fn run_serve(settings: config::Settings) -> Result<(), AppError> {
    let app = build_application_context(&settings).await?;
    let result = serve_http(&settings, HttpState::new(Arc::clone(&app.content))).await;

    if tokio::time::timeout(settings.server.graceful_shutdown, app.cache.shutdown())
        .await
        .is_err()
    {
        warn!(
            target: "quire::shutdown",
            timeout_secs = settings.server.graceful_shutdown.as_secs(),
            "refresh workers did not stop in time"
        );
    }

    result
}

async fn run_invalidate(
    settings: config::Settings,
    args: config::InvalidateArgs,
) -> Result<(), AppError> {
    let app = build_application_context(&settings).await?;
    let report = app.content.invalidate(&args.slug).await;
    app.cache.shutdown().await;

    info!(
        target: "quire::invalidate",
        slug = %report.slug,
        lists_rewritten = report.lists_rewritten,
        lists_deleted = report.lists_deleted,
        details_deleted = report.details_deleted,
        "invalidation completed"
    );
    Ok(())
}

async fn run_purge(settings: config::Settings) -> Result<(), AppError> {
    let app = build_application_context(&settings).await?;
    let report = app.content.purge().await;
    app.cache.shutdown().await;

    info!(
        target: "quire::purge",
        namespace = app.content.namespace(),
        keys_deleted = report.keys_deleted,
        "purge completed"
    );
    Ok(())
}

async fn serve_http(settings: &config::Settings, state: HttpState) -> Result<(), AppError> {
    let public_router = http::build_router(state.clone());
    let admin_router = http::build_admin_router(state);

    let public_listener = tokio::net::TcpListener::bind(settings.server.public_addr)
        .await
        .map_err(|err| AppError::from(InfraError::from(err)))?;
    let admin_listener = tokio::net::TcpListener::bind(settings.server.admin_addr)
        .await
        .map_err(|err| AppError::from(InfraError::from(err)))?;

    info!(
        target: "quire::startup",
        public = %settings.server.public_addr,
        admin = %settings.server.admin_addr,
        "listening"
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!(target: "quire::shutdown", "shutdown signal received");
                let _ = shutdown_tx.send(true);
            }
            Err(err) => {
                warn!(target: "quire::shutdown", error = %err, "signal handler unavailable");
                std::future::pending::<()>().await;
            }
        }
    });

    let public_server = axum::serve(public_listener, public_router.into_make_service())
        .with_graceful_shutdown(shutdown_requested(shutdown_rx.clone()));
    let admin_server = axum::serve(admin_listener, admin_router.into_make_service())
        .with_graceful_shutdown(shutdown_requested(shutdown_rx));

    try_join!(public_server, admin_server)
        .map_err(|err| AppError::server(err.to_string()))?;

    Ok(())
}

async fn shutdown_requested(mut rx: watch::Receiver<bool>) {
    let _ = rx.wait_for(|stop| *stop).await;
}
