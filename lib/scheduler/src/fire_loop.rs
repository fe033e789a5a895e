//! The scheduled-fire loop.
//!
//! Each sweep loads triggers whose next fire time has passed, claims every
//! tick in the fire ledger, fires the ticks it won and advances the
//! trigger's next fire time by compare-and-set. Several loops may sweep the
//! same triggers; the ledger decides which one fires. A lease is renewed for
//! as long as its firing runs, so a slow firing is never taken over by
//! another sweeper.

use crate::config::SchedulerConfig;
use crate::error::{HandlerError, LedgerError, SourceError};
use crate::ledger::{Claim, FireKey, FireLedger, Lease};
use crate::schedule::CronSchedule;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use std::future::Future;
use std::sync::Arc;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, instrument, warn};
use tripwire_core::TriggerId;
use ulid::Ulid;

/// A scheduled trigger whose next tick has come due.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DueTrigger {
    pub trigger_id: TriggerId,
    /// The tick being fired.
    pub fire_time: DateTime<Utc>,
    pub cron_expression: String,
}

/// Persisted next-fire-time iterator over scheduled triggers.
#[async_trait]
pub trait DueTriggerSource: Send + Sync {
    /// Enabled scheduled triggers with a next fire time at or before `now`,
    /// oldest first.
    async fn due(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<DueTrigger>, SourceError>;

    /// Sets the next fire time to `next` if it is still `expected`.
    /// Returns false if another sweeper moved it first.
    async fn advance(
        &self,
        trigger_id: TriggerId,
        expected: DateTime<Utc>,
        next: Option<DateTime<Utc>>,
    ) -> Result<bool, SourceError>;
}

/// Fires one scheduled tick.
#[async_trait]
pub trait ScheduledFireHandler: Send + Sync {
    async fn fire_scheduled(
        &self,
        trigger_id: TriggerId,
        fire_time: DateTime<Utc>,
    ) -> Result<(), HandlerError>;
}

/// What happened to one due trigger in a sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    Fired,
    AlreadyFired,
    /// Another sweeper holds the tick.
    Contended,
    Failed,
}

/// Tally of one sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub fired: usize,
    pub already_fired: usize,
    pub contended: usize,
    pub failed: usize,
}

impl SweepReport {
    fn record(mut self, outcome: TickOutcome) -> Self {
        match outcome {
            TickOutcome::Fired => self.fired += 1,
            TickOutcome::AlreadyFired => self.already_fired += 1,
            TickOutcome::Contended => self.contended += 1,
            TickOutcome::Failed => self.failed += 1,
        }
        self
    }

    /// Number of due triggers the sweep looked at.
    #[must_use]
    pub fn total(&self) -> usize {
        self.fired + self.already_fired + self.contended + self.failed
    }
}

/// Recurring sweeper over due scheduled triggers.
pub struct ScheduledFireLoop {
    source: Arc<dyn DueTriggerSource>,
    ledger: Arc<dyn FireLedger>,
    handler: Arc<dyn ScheduledFireHandler>,
    config: SchedulerConfig,
    holder: String,
}

impl ScheduledFireLoop {
    /// Creates a loop with a fresh holder identity.
    #[must_use]
    pub fn new(
        source: Arc<dyn DueTriggerSource>,
        ledger: Arc<dyn FireLedger>,
        handler: Arc<dyn ScheduledFireHandler>,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            source,
            ledger,
            handler,
            config,
            holder: format!("sweeper-{}", Ulid::new()),
        }
    }

    /// Identity this loop uses for fire leases.
    #[must_use]
    pub fn holder(&self) -> &str {
        &self.holder
    }

    /// Runs one sweep.
    ///
    /// A failing trigger is logged and counted; it never stops the others.
    ///
    /// # Errors
    ///
    /// Returns an error only if the due triggers cannot be loaded.
    #[instrument(skip(self), fields(holder = %self.holder))]
    pub async fn sweep(&self, now: DateTime<Utc>) -> Result<SweepReport, SourceError> {
        let due = self.source.due(now, self.config.batch_size).await?;
        if due.is_empty() {
            return Ok(SweepReport::default());
        }
        debug!(count = due.len(), "due scheduled triggers");

        let report = stream::iter(due)
            .map(|trigger| self.fire_one(trigger, now))
            .buffer_unordered(self.config.workers.max(1))
            .fold(SweepReport::default(), |report, outcome| async move {
                report.record(outcome)
            })
            .await;
        Ok(report)
    }

    async fn fire_one(&self, due: DueTrigger, now: DateTime<Utc>) -> TickOutcome {
        let key = FireKey {
            trigger_id: due.trigger_id,
            fire_time: due.fire_time,
        };

        let claim = match self
            .ledger
            .try_acquire(key, &self.holder, self.config.lease_ttl())
            .await
        {
            Ok(claim) => claim,
            Err(e) => {
                warn!(trigger_id = %due.trigger_id, error = %e, "could not claim scheduled tick");
                return TickOutcome::Failed;
            }
        };

        let outcome = match claim {
            Claim::Held { holder } => {
                debug!(trigger_id = %due.trigger_id, %holder, "tick held by another sweeper");
                return TickOutcome::Contended;
            }
            Claim::AlreadyFired => {
                debug!(trigger_id = %due.trigger_id, fire_time = %due.fire_time, "tick already fired");
                TickOutcome::AlreadyFired
            }
            Claim::Acquired(lease) => self.fire_under_lease(&due, lease).await,
        };

        self.advance(&due, now).await;
        outcome
    }

    /// Fires a claimed tick while renewing its lease.
    ///
    /// The firing is abandoned if the lease is lost, and a tick counts as
    /// fired only once the ledger has recorded it.
    async fn fire_under_lease(&self, due: &DueTrigger, lease: Lease) -> TickOutcome {
        let result = tokio::select! {
            result = self.handler.fire_scheduled(due.trigger_id, due.fire_time) => result,
            e = self.keep_alive(lease.clone()) => {
                warn!(
                    trigger_id = %due.trigger_id,
                    fire_time = %due.fire_time,
                    error = %e,
                    "lease lost while firing, abandoning tick"
                );
                return TickOutcome::Failed;
            }
        };

        match result {
            Ok(()) => match self.ledger.mark_fired(&lease).await {
                Ok(()) => TickOutcome::Fired,
                Err(e) => {
                    warn!(trigger_id = %due.trigger_id, error = %e, "could not record fired tick");
                    TickOutcome::Failed
                }
            },
            Err(e) => {
                warn!(
                    trigger_id = %due.trigger_id,
                    fire_time = %due.fire_time,
                    error = %e,
                    "scheduled firing failed"
                );
                if let Err(e) = self.ledger.release(&lease).await {
                    warn!(trigger_id = %due.trigger_id, error = %e, "could not release lease");
                }
                TickOutcome::Failed
            }
        }
    }

    /// Renews `lease` until it is lost. Only returns on loss.
    async fn keep_alive(&self, mut lease: Lease) -> LedgerError {
        let mut ticker = tokio::time::interval(self.config.lease_renew_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            match self.ledger.renew(&lease, self.config.lease_ttl()).await {
                Ok(renewed) => lease = renewed,
                Err(e @ LedgerError::LeaseLost { .. }) => return e,
                Err(e) if Utc::now() >= lease.expires_at => return e,
                Err(e) => warn!(trigger_id = %lease.key.trigger_id, error = %e, "could not renew lease"),
            }
        }
    }

    /// Moves the trigger past `now`, skipping ticks missed while down.
    async fn advance(&self, due: &DueTrigger, now: DateTime<Utc>) {
        let next = match CronSchedule::parse(&due.cron_expression) {
            Ok(schedule) => schedule.next_after(due.fire_time.max(now)),
            Err(e) => {
                warn!(trigger_id = %due.trigger_id, error = %e, "stored cron expression no longer parses");
                None
            }
        };

        match self.source.advance(due.trigger_id, due.fire_time, next).await {
            Ok(true) => debug!(trigger_id = %due.trigger_id, next = ?next, "schedule advanced"),
            Ok(false) => debug!(trigger_id = %due.trigger_id, "schedule already advanced"),
            Err(e) => warn!(trigger_id = %due.trigger_id, error = %e, "could not advance schedule"),
        }
    }

    /// Sweeps on the configured interval until `shutdown` completes.
    pub async fn run(&self, shutdown: impl Future<Output = ()>) {
        let mut ticker = tokio::time::interval(self.config.sweep_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tokio::pin!(shutdown);

        info!(holder = %self.holder, interval_secs = self.config.sweep_interval_secs, "scheduled-fire loop started");
        loop {
            tokio::select! {
                () = &mut shutdown => break,
                _ = ticker.tick() => match self.sweep(Utc::now()).await {
                    Ok(report) if report.total() > 0 => info!(
                        fired = report.fired,
                        already_fired = report.already_fired,
                        contended = report.contended,
                        failed = report.failed,
                        "sweep finished"
                    ),
                    Ok(_) => {}
                    Err(e) => warn!(error = %e, "sweep failed"),
                },
            }
        }
        info!(holder = %self.holder, "scheduled-fire loop stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::InMemoryFireLedger;
    use chrono::{Duration, TimeZone};
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct MemorySource {
        triggers: Mutex<HashMap<TriggerId, DueTrigger>>,
    }

    impl MemorySource {
        fn schedule(&self, trigger_id: TriggerId, fire_time: DateTime<Utc>, cron: &str) {
            self.triggers.lock().unwrap().insert(
                trigger_id,
                DueTrigger {
                    trigger_id,
                    fire_time,
                    cron_expression: cron.to_string(),
                },
            );
        }

        fn next_fire(&self, trigger_id: TriggerId) -> Option<DateTime<Utc>> {
            self.triggers
                .lock()
                .unwrap()
                .get(&trigger_id)
                .map(|t| t.fire_time)
        }
    }

    #[async_trait]
    impl DueTriggerSource for MemorySource {
        async fn due(
            &self,
            now: DateTime<Utc>,
            limit: usize,
        ) -> Result<Vec<DueTrigger>, SourceError> {
            let mut due: Vec<DueTrigger> = self
                .triggers
                .lock()
                .unwrap()
                .values()
                .filter(|t| t.fire_time <= now)
                .cloned()
                .collect();
            due.sort_by_key(|t| t.fire_time);
            due.truncate(limit);
            Ok(due)
        }

        async fn advance(
            &self,
            trigger_id: TriggerId,
            expected: DateTime<Utc>,
            next: Option<DateTime<Utc>>,
        ) -> Result<bool, SourceError> {
            let mut triggers = self.triggers.lock().unwrap();
            if triggers.get(&trigger_id).map(|t| t.fire_time) != Some(expected) {
                return Ok(false);
            }
            match next {
                Some(next) => {
                    if let Some(t) = triggers.get_mut(&trigger_id) {
                        t.fire_time = next;
                    }
                }
                None => {
                    triggers.remove(&trigger_id);
                }
            }
            Ok(true)
        }
    }

    #[derive(Default)]
    struct CountingHandler {
        fired: AtomicUsize,
        failing: Mutex<Vec<TriggerId>>,
        delay_ms: u64,
    }

    #[async_trait]
    impl ScheduledFireHandler for CountingHandler {
        async fn fire_scheduled(
            &self,
            trigger_id: TriggerId,
            _fire_time: DateTime<Utc>,
        ) -> Result<(), HandlerError> {
            if self.delay_ms > 0 {
                tokio::time::sleep(std::time::Duration::from_millis(self.delay_ms)).await;
            }
            if self.failing.lock().unwrap().contains(&trigger_id) {
                return Err(HandlerError {
                    trigger_id,
                    reason: "engine rejected".to_string(),
                });
            }
            self.fired.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn noon() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 2, 12, 0, 0).unwrap()
    }

    fn fire_loop(
        source: &Arc<MemorySource>,
        ledger: &Arc<InMemoryFireLedger>,
        handler: &Arc<CountingHandler>,
    ) -> ScheduledFireLoop {
        ScheduledFireLoop::new(
            source.clone(),
            ledger.clone(),
            handler.clone(),
            SchedulerConfig::default(),
        )
    }

    #[tokio::test]
    async fn due_trigger_fires_once_and_advances() {
        let source = Arc::new(MemorySource::default());
        let ledger = Arc::new(InMemoryFireLedger::new());
        let handler = Arc::new(CountingHandler::default());
        let trigger_id = TriggerId::new();
        source.schedule(trigger_id, noon(), "*/5 * * * *");

        let sweeper = fire_loop(&source, &ledger, &handler);
        let report = sweeper.sweep(noon()).await.unwrap();
        assert_eq!(report.fired, 1);
        assert_eq!(
            source.next_fire(trigger_id),
            Some(noon() + Duration::minutes(5))
        );

        let report = sweeper.sweep(noon()).await.unwrap();
        assert_eq!(report.total(), 0);
        assert_eq!(handler.fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn racing_sweepers_fire_a_tick_once() {
        let source = Arc::new(MemorySource::default());
        let ledger = Arc::new(InMemoryFireLedger::new());
        let handler = Arc::new(CountingHandler {
            delay_ms: 50,
            ..CountingHandler::default()
        });
        let trigger_id = TriggerId::new();
        source.schedule(trigger_id, noon(), "0 * * * *");

        let first = Arc::new(fire_loop(&source, &ledger, &handler));
        let second = Arc::new(fire_loop(&source, &ledger, &handler));
        let a = tokio::spawn({
            let first = first.clone();
            async move { first.sweep(noon()).await }
        });
        let b = tokio::spawn({
            let second = second.clone();
            async move { second.sweep(noon()).await }
        });
        let a = a.await.unwrap().unwrap();
        let b = b.await.unwrap().unwrap();

        assert_eq!(handler.fired.load(Ordering::SeqCst), 1);
        assert_eq!(a.fired + b.fired, 1);
        assert_eq!(ledger.last_fired(trigger_id), Some(noon()));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn firing_longer_than_the_lease_is_not_repeated() {
        let source = Arc::new(MemorySource::default());
        let ledger = Arc::new(InMemoryFireLedger::new());
        let handler = Arc::new(CountingHandler {
            delay_ms: 1_500,
            ..CountingHandler::default()
        });
        let trigger_id = TriggerId::new();
        source.schedule(trigger_id, noon(), "0 * * * *");

        let config = SchedulerConfig {
            lease_ttl_secs: 1,
            ..SchedulerConfig::default()
        };
        let sweeper = |config: SchedulerConfig| {
            Arc::new(ScheduledFireLoop::new(
                source.clone(),
                ledger.clone(),
                handler.clone(),
                config,
            ))
        };
        let first = sweeper(config.clone());
        let second = sweeper(config);

        let a = tokio::spawn(async move { first.sweep(noon()).await });
        tokio::time::sleep(std::time::Duration::from_millis(1_200)).await;
        let b = second.sweep(noon()).await.unwrap();
        let a = a.await.unwrap().unwrap();

        assert_eq!(handler.fired.load(Ordering::SeqCst), 1);
        assert_eq!(a.fired, 1);
        assert_eq!(b.contended, 1);
        assert_eq!(ledger.last_fired(trigger_id), Some(noon()));
    }

    #[tokio::test]
    async fn replayed_tick_is_skipped() {
        let source = Arc::new(MemorySource::default());
        let ledger = Arc::new(InMemoryFireLedger::new());
        let handler = Arc::new(CountingHandler::default());
        let trigger_id = TriggerId::new();
        source.schedule(trigger_id, noon(), "0 * * * *");

        let sweeper = fire_loop(&source, &ledger, &handler);
        sweeper.sweep(noon()).await.unwrap();

        // a stale replica still reports the old tick
        source.schedule(trigger_id, noon(), "0 * * * *");
        let report = sweeper.sweep(noon()).await.unwrap();
        assert_eq!(report.already_fired, 1);
        assert_eq!(handler.fired.load(Ordering::SeqCst), 1);
        assert_eq!(
            source.next_fire(trigger_id),
            Some(noon() + Duration::hours(1))
        );
    }

    #[tokio::test]
    async fn failure_does_not_abort_the_sweep() {
        let source = Arc::new(MemorySource::default());
        let ledger = Arc::new(InMemoryFireLedger::new());
        let handler = Arc::new(CountingHandler::default());
        let broken = TriggerId::new();
        let healthy = TriggerId::new();
        source.schedule(broken, noon(), "0 * * * *");
        source.schedule(healthy, noon(), "0 * * * *");
        handler.failing.lock().unwrap().push(broken);

        let report = fire_loop(&source, &ledger, &handler)
            .sweep(noon())
            .await
            .unwrap();
        assert_eq!(report.fired, 1);
        assert_eq!(report.failed, 1);

        // released without a marker
        assert_eq!(ledger.last_fired(broken), None);
        let claim = ledger
            .try_acquire(
                FireKey {
                    trigger_id: broken,
                    fire_time: noon(),
                },
                "other",
                Duration::seconds(10),
            )
            .await
            .unwrap();
        assert!(matches!(claim, Claim::Acquired(_)));
    }

    #[tokio::test]
    async fn missed_ticks_are_skipped() {
        let source = Arc::new(MemorySource::default());
        let ledger = Arc::new(InMemoryFireLedger::new());
        let handler = Arc::new(CountingHandler::default());
        let trigger_id = TriggerId::new();
        source.schedule(trigger_id, noon() - Duration::hours(5), "0 * * * *");

        let report = fire_loop(&source, &ledger, &handler)
            .sweep(noon())
            .await
            .unwrap();
        assert_eq!(report.fired, 1);
        assert_eq!(
            source.next_fire(trigger_id),
            Some(noon() + Duration::hours(1))
        );
    }

    #[tokio::test]
    async fn run_stops_on_shutdown() {
        let source = Arc::new(MemorySource::default());
        let ledger = Arc::new(InMemoryFireLedger::new());
        let handler = Arc::new(CountingHandler::default());
        let sweeper = fire_loop(&source, &ledger, &handler);

        let finished = tokio::time::timeout(
            std::time::Duration::from_secs(5),
            sweeper.run(std::future::ready(())),
        )
        .await;
        assert!(finished.is_ok());
    }
}
