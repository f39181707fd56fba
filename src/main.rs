use std::{process, sync::Arc, time::Duration};

use dispensa::{
    cache::{
        CacheConfig, CacheStore, Classifier, CurrentGeneration, FetchOrchestrator, FsStore,
        GenerationState, LifecycleManager, Revalidator, resting_generation,
    },
    clock::{Clock, SystemClock},
    config::{self, Command, ServeArgs, Settings},
    error::AppError,
    http::{self, ProxyState},
    net::{Fetcher, HttpFetcher},
    telemetry,
};
use tracing::{Dispatch, Level, dispatcher, error, info};
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
        .unwrap_or(Command::Serve(Box::<ServeArgs>::default()));

    telemetry::init(&settings.logging)?;

    match command {
        Command::Serve(_) => run_serve(settings).await,
        Command::Install(_) => run_install(settings).await,
        Command::Revalidate(_) => run_revalidate(settings).await,
    }
}

/// Everything the subcommands share: the store, the cache components, and
/// the assembled router state.
struct Runtime {
    cache_config: CacheConfig,
    store: Arc<dyn CacheStore>,
    current: Arc<CurrentGeneration>,
    lifecycle: Arc<LifecycleManager>,
    revalidator: Arc<Revalidator>,
    state: ProxyState,
}

fn build_runtime(settings: &Settings) -> Result<Runtime, AppError> {
    let cache_config = CacheConfig::from(&settings.cache);

    let classifier = Arc::new(Classifier::from_config(&cache_config)?);
    let store: Arc<dyn CacheStore> = Arc::new(FsStore::new(settings.cache.store_dir.clone())?);
    let fetcher: Arc<dyn Fetcher> = Arc::new(HttpFetcher::new()?);
    let clock = Arc::new(SystemClock);
    let current = Arc::new(CurrentGeneration::new(cache_config.generation.clone()));

    let lifecycle = Arc::new(LifecycleManager::new(
        Arc::clone(&store),
        Arc::clone(&fetcher),
        clock.clone() as Arc<dyn Clock>,
        cache_config.clone(),
        Arc::clone(&current),
    ));
    let orchestrator = Arc::new(FetchOrchestrator::new(
        Arc::clone(&store),
        Arc::clone(&fetcher),
        clock.clone() as Arc<dyn Clock>,
        Arc::clone(&current),
        cache_config.freshness_window,
    ));
    let revalidator = Arc::new(Revalidator::new(
        Arc::clone(&store),
        Arc::clone(&fetcher),
        clock as Arc<dyn Clock>,
        Arc::clone(&current),
        cache_config.revalidation_assets.clone(),
    ));

    let state = ProxyState {
        classifier,
        orchestrator,
        lifecycle: Arc::clone(&lifecycle),
        revalidator: Arc::clone(&revalidator),
        fetcher,
        store: Arc::clone(&store),
        current: Arc::clone(&current),
        origin: settings.upstream.origin.clone(),
    };

    Ok(Runtime {
        cache_config,
        store,
        current,
        lifecycle,
        revalidator,
        state,
    })
}

async fn run_serve(settings: Settings) -> Result<(), AppError> {
    let runtime = build_runtime(&settings)?;

    runtime.lifecycle.install().await?;

    if settings.cache.hold_activation {
        // The new generation waits for a skip-waiting request; serve from the
        // previous one meanwhile if any survives.
        if runtime.lifecycle.state() != GenerationState::Active {
            match resting_generation(runtime.store.as_ref(), &runtime.cache_config.generation)
                .await?
            {
                Some(previous) => {
                    info!(generation = %previous, "holding activation, serving previous generation");
                    runtime.current.swap(previous);
                }
                None => {
                    info!("holding activation requested but no previous generation exists");
                    runtime.lifecycle.activate().await?;
                }
            }
        }
    } else {
        runtime.lifecycle.activate().await?;
    }

    let revalidate_handle = Arc::clone(&runtime.revalidator)
        .spawn_interval(runtime.cache_config.revalidate_interval);

    let router = http::router(runtime.state);
    let listener = tokio::net::TcpListener::bind(settings.server.listen).await?;
    info!(addr = %settings.server.listen, "listening");

    let result = axum::serve(listener, router.into_make_service())
        .with_graceful_shutdown(shutdown_signal(settings.server.graceful_shutdown))
        .await
        .map_err(AppError::Io);

    revalidate_handle.abort();
    let _ = revalidate_handle.await;

    result
}

async fn shutdown_signal(drain: Duration) {
    if let Err(error) = tokio::signal::ctrl_c().await {
        error!(error = %error, "failed to listen for shutdown signal");
        return;
    }
    info!(drain_secs = drain.as_secs(), "shutdown signal received, draining");
}

async fn run_install(settings: Settings) -> Result<(), AppError> {
    let runtime = build_runtime(&settings)?;

    runtime.lifecycle.install().await?;
    runtime.lifecycle.activate().await?;
    info!(generation = %runtime.cache_config.generation, "generation installed and activated");
    Ok(())
}

async fn run_revalidate(settings: Settings) -> Result<(), AppError> {
    let runtime = build_runtime(&settings)?;

    let report = runtime.revalidator.run_once().await;
    info!(
        refreshed = report.refreshed,
        failed = report.failed,
        "revalidation pass finished"
    );
    Ok(())
}
