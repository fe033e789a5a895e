use sqlx::postgres::PgPoolOptions;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::watch;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use tripwire_dispatcher::{
    config::DispatcherConfig,
    db::{PgFireLedger, PgTriggerExecutionStore, PgTriggerStore},
    nats::{EventIntake, NatsCollaborators, Subjects},
};
use tripwire_engine::{Collaborators, StoreDueSource, TriggerService, WorkerPool};
use tripwire_scheduler::ScheduledFireLoop;

fn shutdown_signal(rx: &watch::Receiver<bool>) -> impl Future<Output = ()> + Send + 'static {
    let mut rx = rx.clone();
    async move {
        // A dropped sender also means shutdown.
        let _ = rx.wait_for(|stop| *stop).await;
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tripwire=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration from environment
    let config = DispatcherConfig::from_env().expect("failed to load configuration");
    tracing::info!(
        artifact_match_policy = %config.engine.artifact_match_policy,
        event_workers = config.engine.event_workers,
        "Loaded configuration"
    );

    // Create database connection pool
    let db_pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .connect(&config.database_url)
        .await
        .expect("failed to connect to database");

    // Run migrations
    tracing::info!("Running database migrations...");
    sqlx::migrate!("./migrations")
        .run(&db_pool)
        .await
        .expect("failed to run migrations");

    tracing::info!(url = %config.nats_url, "Connecting to NATS...");
    let nats = async_nats::connect(&config.nats_url)
        .await
        .expect("failed to connect to NATS");
    let subjects = Subjects::new(config.nats_subject_prefix.clone());

    let triggers = Arc::new(PgTriggerStore::new(db_pool.clone()));
    let ledger = Arc::new(PgFireLedger::new(db_pool.clone()));
    let remote = Arc::new(NatsCollaborators::new(nats.clone(), subjects.clone()));
    let service = TriggerService::new(
        Collaborators {
            triggers: triggers.clone(),
            executions: Arc::new(PgTriggerExecutionStore::new(db_pool)),
            ledger: ledger.clone(),
            artifacts: remote.clone(),
            deployments: remote.clone(),
            entities: remote.clone(),
            engine: remote.clone(),
            content_checker: remote,
        },
        &config.engine,
        Arc::new(WorkerPool::new(config.engine.event_workers)),
    );

    let (stop, stopped) = watch::channel(false);

    let fire_loop = ScheduledFireLoop::new(
        Arc::new(StoreDueSource::new(triggers)),
        ledger,
        Arc::new(service.clone()),
        config.scheduler.clone(),
    );
    let fire_loop_shutdown = shutdown_signal(&stopped);
    let fire_loop_task = tokio::spawn(async move { fire_loop.run(fire_loop_shutdown).await });

    let intake = EventIntake::new(nats, subjects, service.clone());
    let intake_shutdown = shutdown_signal(&stopped);
    let intake_task = tokio::spawn(async move { intake.run(intake_shutdown).await });

    tracing::info!("Dispatcher running");
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "Failed to listen for shutdown signal");
    }

    tracing::info!("Shutting down...");
    let _ = stop.send(true);
    match intake_task.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::error!(error = %e, "Event intake failed"),
        Err(e) => tracing::error!(error = %e, "Event intake task panicked"),
    }
    if let Err(e) = fire_loop_task.await {
        tracing::error!(error = %e, "Scheduled-fire loop task panicked");
    }
    service.shutdown().await;
    tracing::info!("Dispatcher stopped");
}
