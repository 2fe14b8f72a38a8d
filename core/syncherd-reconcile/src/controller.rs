//! The reconciliation cycle.

use crate::deletion::{DeletionPath, DeletionStrategy};
use crate::error::{ReconcileError, ReconcileResult};
use crate::report::{ReconcileReport, RecreateReason};
use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use syncherd_engine::{
    Attributes, EngineAdapter, EngineError, EngineResult, EntityKind, SyncDescriptor,
};
use syncherd_types::{
    CredentialError, DatabaseSpec, DesiredState, MembershipGroup, SyncSpec, TableSelection,
    normalize_tables, validate,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Resolves delegated passwords by environment variable name.
pub type PasswordLookup = Arc<dyn Fn(&str) -> Option<String> + Send + Sync>;

/// Drives an [`EngineAdapter`] toward a [`DesiredState`].
pub struct Reconciler {
    engine: Arc<dyn EngineAdapter>,
    deletion: DeletionStrategy,
    passwords: Option<PasswordLookup>,
}

impl Reconciler {
    pub fn new(engine: Arc<dyn EngineAdapter>, deletion: DeletionStrategy) -> Self {
        Self {
            engine,
            deletion,
            passwords: None,
        }
    }

    /// Resolves delegated passwords with `lookup` instead of the process
    /// environment.
    pub fn with_password_lookup(mut self, lookup: PasswordLookup) -> Self {
        self.passwords = Some(lookup);
        self
    }

    pub fn engine(&self) -> &Arc<dyn EngineAdapter> {
        &self.engine
    }

    /// Runs one full cycle.
    ///
    /// The document is validated first; an invalid document is refused
    /// before any engine call. Cancellation is honoured between and during
    /// engine operations.
    pub async fn reconcile(
        &self,
        desired: &DesiredState,
        cancel: &CancellationToken,
    ) -> ReconcileResult<ReconcileReport> {
        let errors = validate(desired);
        if !errors.is_empty() {
            for e in &errors {
                error!(error = %e, "Invalid configuration");
            }
            return Err(ReconcileError::Validation(errors));
        }
        if cancel.is_cancelled() {
            return Err(ReconcileError::Cancelled);
        }

        info!(
            databases = desired.databases.len(),
            syncs = desired.syncs.len(),
            "Reconciling engine state"
        );
        let mut report = ReconcileReport::default();
        let herds = declared_herds(desired);

        self.reconcile_databases(desired, cancel, &mut report).await?;
        self.prune_databases(desired, cancel, &mut report).await?;
        for sync in &desired.syncs {
            self.reconcile_sync(sync, &herds, cancel, &mut report).await?;
        }
        self.prune_syncs(desired, &herds, cancel, &mut report).await?;

        info!(
            databases_created = report.databases_created.len(),
            syncs_created = report.syncs_created.len(),
            syncs_recreated = report.syncs_recreated.len(),
            syncs_updated = report.syncs_updated.len(),
            pruned = report.databases_pruned.len() + report.syncs_pruned.len(),
            prune_failures = report.prune_failures.len(),
            "Reconciliation complete"
        );
        Ok(report)
    }

    fn password(&self, db: &DatabaseSpec) -> Result<String, CredentialError> {
        match &self.passwords {
            Some(lookup) => db.password_with(|var| lookup(var)),
            None => db.password(),
        }
    }

    // ── Databases ───────────────────────────────────────────────

    async fn reconcile_databases(
        &self,
        desired: &DesiredState,
        cancel: &CancellationToken,
        report: &mut ReconcileReport,
    ) -> ReconcileResult<()> {
        const KIND: EntityKind = EntityKind::Database;

        for db in &desired.databases {
            let name = db.engine_name();
            let attrs = Attributes::new()
                .set("dbname", &db.dbname)
                .set("host", &db.host)
                .set("user", &db.user)
                .set("pass", self.password(db)?)
                .set_opt("port", db.port);

            let exists = guard(cancel, self.engine.entity_exists(KIND, &name))
                .await
                .map_err(|e| ReconcileError::engine(KIND, &name, e))?;
            if exists {
                debug!(database = %name, "Updating database");
                guard(cancel, self.engine.update_entity(KIND, &name, &attrs))
                    .await
                    .map_err(|e| ReconcileError::engine(KIND, &name, e))?;
                report.databases_updated.push(name);
            } else {
                info!(database = %name, host = %db.host, "Adding database");
                guard(cancel, self.engine.create_entity(KIND, &name, &attrs))
                    .await
                    .map_err(|e| ReconcileError::engine(KIND, &name, e))?;
                report.databases_created.push(name);
            }
        }
        Ok(())
    }

    async fn prune_databases(
        &self,
        desired: &DesiredState,
        cancel: &CancellationToken,
        report: &mut ReconcileReport,
    ) -> ReconcileResult<()> {
        const KIND: EntityKind = EntityKind::Database;

        let declared: HashSet<String> = desired
            .databases
            .iter()
            .map(DatabaseSpec::engine_name)
            .collect();
        let Some(current) = self.list_for_pruning(KIND, cancel, report).await? else {
            return Ok(());
        };

        for name in current.iter().filter(|n| !declared.contains(*n)) {
            info!(database = %name, "Removing database no longer in configuration");
            match guard(cancel, self.deletion.delete(&*self.engine, KIND, name)).await {
                Ok(path) => {
                    debug!(database = %name, ?path, "Database removed");
                    report.databases_pruned.push(name.clone());
                }
                Err(e) if e.is_cancelled() => return Err(ReconcileError::Cancelled),
                Err(e) => {
                    warn!(database = %name, error = %e, "Failed to remove database");
                    report.prune_failed(KIND, name, e);
                }
            }
        }
        Ok(())
    }

    // ── Syncs ───────────────────────────────────────────────────

    async fn reconcile_sync(
        &self,
        sync: &SyncSpec,
        herds: &HashSet<String>,
        cancel: &CancellationToken,
        report: &mut ReconcileReport,
    ) -> ReconcileResult<()> {
        const KIND: EntityKind = EntityKind::Sync;
        let name = sync.name.as_str();
        let group = MembershipGroup::for_sync(sync)
            .ok_or_else(|| ReconcileError::IncompleteSync(name.to_string()))?;

        let current = guard(cancel, self.engine.describe_sync(name))
            .await
            .map_err(|e| ReconcileError::engine(KIND, name, e))?;

        let mut recreated = None;
        if let Some(current) = current {
            match recreate_reason(sync, &group, &current) {
                Some(reason) => {
                    warn!(sync = name, ?reason, "Sync changed structurally, recreating");
                    self.remove_sync(&current, herds, cancel)
                        .await
                        .map_err(|e| ReconcileError::engine(KIND, name, e))?;
                    recreated = Some(reason);
                }
                None => {
                    let attrs = mutable_attributes(sync);
                    if attrs.is_empty() {
                        debug!(sync = name, "Sync unchanged");
                    } else {
                        debug!(sync = name, "Updating sync");
                        guard(cancel, self.engine.update_entity(KIND, name, &attrs))
                            .await
                            .map_err(|e| ReconcileError::engine(KIND, name, e))?;
                        report.syncs_updated.push(name.to_string());
                    }
                    return Ok(());
                }
            }
        }

        self.create_sync(sync, &group, cancel).await?;
        match recreated {
            Some(reason) => report.syncs_recreated.push((name.to_string(), reason)),
            None => report.syncs_created.push(name.to_string()),
        }
        Ok(())
    }

    async fn create_sync(
        &self,
        sync: &SyncSpec,
        group: &MembershipGroup,
        cancel: &CancellationToken,
    ) -> ReconcileResult<()> {
        let name = sync.name.as_str();
        info!(sync = name, group = %group.name, "Creating sync");

        // A stale group of the same name may survive an earlier partial cycle.
        self.remove_quietly(EntityKind::DbGroup, &group.name, cancel)
            .await?;
        let members = Attributes::new().members(group.member_args());
        guard(
            cancel,
            self.engine
                .create_entity(EntityKind::DbGroup, &group.name, &members),
        )
        .await
        .map_err(|e| ReconcileError::engine(EntityKind::DbGroup, &group.name, e))?;

        let attrs = Attributes::new()
            .set("onetimecopy", sync.onetimecopy.as_u8())
            .set("dbs", &group.name);
        let mut attrs = match sync.table_selection() {
            Some(TableSelection::Herd(herd)) => {
                self.rebuild_herd(sync, herd, cancel).await?;
                attrs.set("herd", herd)
            }
            Some(TableSelection::Tables(_)) => {
                let tables = sync.normalized_tables().unwrap_or_default();
                attrs.set("tables", tables.join(","))
            }
            None => return Err(ReconcileError::IncompleteSync(name.to_string())),
        };
        if sync.is_run_once() {
            attrs = attrs.set("stayalive", 0).set("kidsalive", 0);
        }
        let attrs = attrs
            .set_opt("strict_checking", sync.strict_checking)
            .set_opt("conflict_strategy", sync.conflict_strategy_name());

        guard(
            cancel,
            self.engine.create_entity(EntityKind::Sync, name, &attrs),
        )
        .await
        .map_err(|e| ReconcileError::engine(EntityKind::Sync, name, e))
    }

    /// Recreates a herd from every table of the sync's first source.
    async fn rebuild_herd(
        &self,
        sync: &SyncSpec,
        herd: &str,
        cancel: &CancellationToken,
    ) -> ReconcileResult<()> {
        const KIND: EntityKind = EntityKind::Herd;
        let source = sync
            .herd_source_engine_name()
            .ok_or_else(|| ReconcileError::IncompleteSync(sync.name.clone()))?;

        info!(herd, database = %source, "Rebuilding table group");
        self.remove_quietly(KIND, herd, cancel).await?;
        guard(
            cancel,
            self.engine.create_entity(KIND, herd, &Attributes::new()),
        )
        .await
        .map_err(|e| ReconcileError::engine(KIND, herd, e))?;

        let populate = [
            "add".to_string(),
            "all".to_string(),
            "tables".to_string(),
            format!("--herd={herd}"),
            format!("db={source}"),
        ];
        guard(cancel, self.engine.run_raw_command(&populate))
            .await
            .map_err(|e| ReconcileError::engine(KIND, herd, e))
    }

    async fn prune_syncs(
        &self,
        desired: &DesiredState,
        herds: &HashSet<String>,
        cancel: &CancellationToken,
        report: &mut ReconcileReport,
    ) -> ReconcileResult<()> {
        const KIND: EntityKind = EntityKind::Sync;

        let Some(current) = self.list_for_pruning(KIND, cancel, report).await? else {
            return Ok(());
        };

        for name in current.iter().filter(|n| desired.sync(n).is_none()) {
            info!(sync = %name, "Removing sync no longer in configuration");
            let descriptor = match guard(cancel, self.engine.describe_sync(name)).await {
                Ok(Some(descriptor)) => descriptor,
                Ok(None) => {
                    debug!(sync = %name, "Sync already gone");
                    continue;
                }
                Err(e) if e.is_cancelled() => return Err(ReconcileError::Cancelled),
                Err(e) => {
                    warn!(sync = %name, error = %e, "Could not describe sync, removing by name");
                    SyncDescriptor {
                        name: name.clone(),
                        ..Default::default()
                    }
                }
            };

            match self.remove_sync(&descriptor, herds, cancel).await {
                Ok(()) => report.syncs_pruned.push(name.clone()),
                Err(e) if e.is_cancelled() => return Err(ReconcileError::Cancelled),
                Err(e) => {
                    warn!(sync = %name, error = %e, "Failed to remove sync");
                    report.prune_failed(KIND, name, e);
                }
            }
        }
        Ok(())
    }

    // ── Helpers ─────────────────────────────────────────────────

    /// Lists entities for pruning. A failed listing skips pruning.
    async fn list_for_pruning(
        &self,
        kind: EntityKind,
        cancel: &CancellationToken,
        report: &mut ReconcileReport,
    ) -> ReconcileResult<Option<Vec<String>>> {
        match guard(cancel, self.engine.list_entities(kind)).await {
            Ok(names) => Ok(Some(names)),
            Err(e) if e.is_cancelled() => Err(ReconcileError::Cancelled),
            Err(e) => {
                warn!(%kind, error = %e, "Listing failed, skipping pruning");
                report.prune_failed(kind, "*", e);
                Ok(None)
            }
        }
    }

    /// Deletes a sync, then its table group and membership group.
    ///
    /// Only the sync itself goes through the deletion strategy; the groups
    /// are removed best-effort. Table groups in `herds` are kept.
    async fn remove_sync(
        &self,
        sync: &SyncDescriptor,
        herds: &HashSet<String>,
        cancel: &CancellationToken,
    ) -> EngineResult<()> {
        let path = guard(
            cancel,
            self.deletion
                .delete(&*self.engine, EntityKind::Sync, &sync.name),
        )
        .await?;

        let relgroup = sync.relgroup_or_name();
        if herds.contains(relgroup) {
            debug!(sync = %sync.name, relgroup, "Keeping table group still in use");
        } else if let (DeletionPath::Fallback, DeletionStrategy::PrimaryWithFallback(conn)) =
            (path, &self.deletion)
        {
            let result = guard(
                cancel,
                self.engine
                    .delete_entity_fallback(EntityKind::Relgroup, relgroup, conn),
            )
            .await;
            if let Err(e) = result {
                if e.is_cancelled() {
                    return Err(e);
                }
                warn!(relgroup, error = %e, "Failed to remove table group");
            }
        } else {
            self.try_delete(EntityKind::Relgroup, relgroup, cancel)
                .await?;
        }

        if let Some(dbgroup) = &sync.dbgroup {
            self.try_delete(EntityKind::DbGroup, dbgroup, cancel).await?;
        }
        Ok(())
    }

    /// Best-effort delete; only cancellation is an error.
    async fn try_delete(
        &self,
        kind: EntityKind,
        name: &str,
        cancel: &CancellationToken,
    ) -> EngineResult<()> {
        match guard(cancel, self.engine.delete_entity(kind, name)).await {
            Ok(()) => Ok(()),
            Err(e) if e.is_cancelled() => Err(e),
            Err(e) => {
                debug!(%kind, name, error = %e, "Delete failed, ignoring");
                Ok(())
            }
        }
    }

    async fn remove_quietly(
        &self,
        kind: EntityKind,
        name: &str,
        cancel: &CancellationToken,
    ) -> ReconcileResult<()> {
        self.try_delete(kind, name, cancel)
            .await
            .map_err(|_| ReconcileError::Cancelled)
    }
}

/// Races an engine operation against cancellation. Dropping `op` abandons it.
async fn guard<T>(
    cancel: &CancellationToken,
    op: impl Future<Output = EngineResult<T>>,
) -> EngineResult<T> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(EngineError::Cancelled),
        result = op => result,
    }
}

fn declared_herds(desired: &DesiredState) -> HashSet<String> {
    desired
        .syncs
        .iter()
        .filter_map(SyncSpec::herd)
        .map(str::to_string)
        .collect()
}

/// Attributes that can change on a live sync.
fn mutable_attributes(sync: &SyncSpec) -> Attributes {
    Attributes::new()
        .set_opt("strict_checking", sync.strict_checking)
        .set_opt("conflict_strategy", sync.conflict_strategy_name())
}

fn recreate_reason(
    sync: &SyncSpec,
    group: &MembershipGroup,
    current: &SyncDescriptor,
) -> Option<RecreateReason> {
    if let Some(mut desired) = sync.normalized_tables() {
        desired.dedup();
        let mut tables = normalize_tables(&current.tables);
        tables.dedup();
        if desired != tables {
            return Some(RecreateReason::TablesChanged {
                current: tables,
                desired,
            });
        }
    }

    // Bidirectional groups have a fixed name, so only source/target
    // membership edits show up here.
    if !sync.is_bidirectional() {
        if let Some(dbgroup) = current.dbgroup.as_ref().filter(|g| **g != group.name) {
            return Some(RecreateReason::MembershipChanged {
                current: dbgroup.clone(),
                expected: group.name.clone(),
            });
        }
    }
    None
}
