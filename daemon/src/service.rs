//! The orchestration service.

use crate::config::ServiceConfig;
use crate::error::{ServiceError, ServiceResult};
use std::sync::Arc;
use syncherd_engine::{CredentialStore, EngineAdapter, PgpassEntry};
use syncherd_monitor::{CompletionMonitor, LogHub, LogTailer, MonitorOutcome, TailConfig};
use syncherd_reconcile::{DeletionStrategy, ReconcileReport, Reconciler};
use syncherd_store::StateStore;
use syncherd_types::{DesiredState, SyncSpec, validate};
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

type Follower = (mpsc::Receiver<String>, JoinHandle<()>);

struct Cycle {
    desired: DesiredState,
    report: ReconcileReport,
    follower: Option<Follower>,
}

/// Owns the engine, the desired-state store and the log hub.
///
/// Reconciliation cycles are serialized; administrative edits are
/// serialized separately and only take effect on the next
/// [`Orchestrator::reload_and_restart`].
pub struct Orchestrator {
    store: Arc<dyn StateStore>,
    engine: Arc<dyn EngineAdapter>,
    credentials: Arc<dyn CredentialStore>,
    hub: LogHub,
    config: ServiceConfig,
    cycle: Mutex<()>,
    edits: Mutex<()>,
}

impl Orchestrator {
    pub fn new(
        store: Arc<dyn StateStore>,
        engine: Arc<dyn EngineAdapter>,
        credentials: Arc<dyn CredentialStore>,
        hub: LogHub,
        config: ServiceConfig,
    ) -> Self {
        Self {
            store,
            engine,
            credentials,
            hub,
            config,
            cycle: Mutex::new(()),
            edits: Mutex::new(()),
        }
    }

    pub fn hub(&self) -> &LogHub {
        &self.hub
    }

    // ── Configuration ───────────────────────────────────────────

    pub async fn get_config(&self) -> ServiceResult<DesiredState> {
        Ok(self.store.load().await?)
    }

    /// Replaces the whole document. Invalid documents are not saved.
    pub async fn update_config(&self, desired: DesiredState) -> ServiceResult<()> {
        let _guard = self.edits.lock().await;
        self.save_validated(&desired).await
    }

    async fn save_validated(&self, desired: &DesiredState) -> ServiceResult<()> {
        let errors = validate(desired);
        if !errors.is_empty() {
            return Err(ServiceError::Invalid(errors));
        }
        self.store.save(desired).await?;
        info!(component = "config", "Configuration saved");
        Ok(())
    }

    // ── Syncs ───────────────────────────────────────────────────

    pub async fn list_syncs(&self) -> ServiceResult<Vec<SyncSpec>> {
        Ok(self.store.load().await?.syncs)
    }

    pub async fn get_sync(&self, name: &str) -> ServiceResult<SyncSpec> {
        self.store
            .load()
            .await?
            .sync(name)
            .cloned()
            .ok_or_else(|| ServiceError::SyncNotFound(name.to_string()))
    }

    pub async fn add_sync(&self, sync: SyncSpec) -> ServiceResult<()> {
        let _guard = self.edits.lock().await;
        let mut desired = self.store.load().await?;
        if desired.sync(&sync.name).is_some() {
            return Err(ServiceError::SyncExists(sync.name));
        }
        desired.syncs.push(sync);
        self.save_validated(&desired).await
    }

    /// Replaces a sync. The stored name always comes from `name`.
    pub async fn update_sync(&self, name: &str, mut sync: SyncSpec) -> ServiceResult<()> {
        let _guard = self.edits.lock().await;
        let mut desired = self.store.load().await?;
        let slot = desired
            .syncs
            .iter_mut()
            .find(|s| s.name == name)
            .ok_or_else(|| ServiceError::SyncNotFound(name.to_string()))?;
        sync.name = name.to_string();
        *slot = sync;
        self.save_validated(&desired).await
    }

    pub async fn delete_sync(&self, name: &str) -> ServiceResult<()> {
        let _guard = self.edits.lock().await;
        let mut desired = self.store.load().await?;
        let before = desired.syncs.len();
        desired.syncs.retain(|s| s.name != name);
        if desired.syncs.len() == before {
            return Err(ServiceError::SyncNotFound(name.to_string()));
        }
        self.save_validated(&desired).await
    }

    // ── Engine lifecycle ────────────────────────────────────────

    pub async fn start_engine(&self) -> ServiceResult<()> {
        Ok(self.engine.start_engine().await?)
    }

    pub async fn stop_engine(&self) -> ServiceResult<()> {
        Ok(self.engine.stop_engine().await?)
    }

    /// Loads the document, bootstraps the engine, reconciles and restarts it.
    ///
    /// Credentials are provisioned for the duration of the cycle and removed
    /// afterwards, whether or not it succeeded.
    pub async fn reload_and_restart(
        &self,
        cancel: &CancellationToken,
    ) -> ServiceResult<ReconcileReport> {
        let cycle = self.run_cycle(cancel, None).await?;
        Ok(cycle.report)
    }

    /// Runs one cycle. When `follow` is given, the log follower is positioned
    /// between reconciliation and engine start.
    async fn run_cycle(
        &self,
        cancel: &CancellationToken,
        follow: Option<(LogTailer, CancellationToken)>,
    ) -> ServiceResult<Cycle> {
        let _cycle = self.cycle.lock().await;
        info!(component = "service", "Reloading configuration and restarting engine");

        let desired = self.store.load().await.inspect_err(|e| {
            error!(component = "service", error = %e, "Failed to load configuration");
        })?;
        let errors = validate(&desired);
        if !errors.is_empty() {
            for e in &errors {
                error!(component = "validator", error = %e, "Invalid configuration");
            }
            return Err(ServiceError::Invalid(errors));
        }

        if let Err(e) = self.engine.stop_engine().await {
            warn!(component = "service", error = %e, "Failed to stop engine before reconfiguring");
        }

        let mut entries: Vec<PgpassEntry> = self.config.engine_db.pgpass_entries().into();
        for db in &desired.databases {
            entries.push(PgpassEntry::for_database(db)?);
        }
        self.credentials.provision(&entries).await?;

        let result = self
            .converge(&desired, cancel, follow)
            .await
            .map(|(report, follower)| Cycle {
                desired,
                report,
                follower,
            });

        if let Err(e) = self.credentials.cleanup().await {
            warn!(component = "service", error = %e, "Failed to remove credentials");
        }
        match &result {
            Ok(_) => info!(component = "service", "Reload and restart complete"),
            Err(e) => error!(component = "service", error = %e, "Reload and restart failed"),
        }
        result
    }

    async fn converge(
        &self,
        desired: &DesiredState,
        cancel: &CancellationToken,
        follow: Option<(LogTailer, CancellationToken)>,
    ) -> ServiceResult<(ReconcileReport, Option<Follower>)> {
        let engine_db = &self.config.engine_db;
        let connection = engine_db.connection();

        if let Err(e) = self
            .engine
            .ensure_engine_password(&connection, &engine_db.name, &engine_db.password)
            .await
        {
            warn!(component = "service", error = %e, "Failed to ensure engine role password");
        }
        self.engine.ensure_installed(&connection).await?;

        if let Some(level) = desired.log_level() {
            if let Err(e) = self.engine.set_log_level(level).await {
                warn!(component = "service", log_level = level, error = %e, "Failed to set log level");
            }
        }

        let deletion = if self.config.fallback_deletion {
            DeletionStrategy::PrimaryWithFallback(connection)
        } else {
            DeletionStrategy::PrimaryOnly
        };
        let report = Reconciler::new(self.engine.clone(), deletion)
            .reconcile(desired, cancel)
            .await?;

        // Completion markers written right after start must not be missed.
        let follower = match follow {
            Some((tailer, token)) => Some(tailer.spawn_positioned(token).await),
            None => None,
        };
        self.engine.start_engine().await?;
        Ok((report, follower))
    }

    fn tailer(&self) -> LogTailer {
        LogTailer::new(
            TailConfig::new(&self.config.log_path)
                .with_poll_interval(self.config.tail_poll_interval),
        )
    }

    /// Reload-and-restart, then monitor run-once syncs or supervise the
    /// engine until `cancel` fires.
    pub async fn run(&self, cancel: &CancellationToken) -> ServiceResult<MonitorOutcome> {
        let tail_cancel = cancel.child_token();
        let cycle = match self
            .run_cycle(cancel, Some((self.tailer(), tail_cancel.clone())))
            .await
        {
            Ok(cycle) => cycle,
            Err(e) => {
                tail_cancel.cancel();
                return Err(e);
            }
        };
        let desired = cycle.desired;
        let (mut lines, tailer) = cycle
            .follower
            .unwrap_or_else(|| self.tailer().spawn(tail_cancel.clone()));

        let monitor = CompletionMonitor::new(self.engine.clone(), Arc::new(self.hub.clone()));
        let outcome = if desired.run_once_syncs().next().is_some() {
            monitor.watch(&desired, &mut lines, cancel).await
        } else {
            monitor.supervise(&mut lines, cancel).await;
            Ok(MonitorOutcome::SteadyState)
        };

        tail_cancel.cancel();
        if let Err(e) = tailer.await {
            warn!(component = "service", error = %e, "Log tailer ended abnormally");
        }
        outcome.map_err(ServiceError::from)
    }
}
