use async_trait::async_trait;
use pretty_assertions::assert_eq;
use std::sync::Arc;
use std::time::Duration;
use syncherd_engine::{
    Attributes, ConnectionParams, EngineAdapter, EngineCall, EngineOp, EngineResult, EntityKind,
    MockEngine, SyncDescriptor,
};
use syncherd_reconcile::{DeletionStrategy, ReconcileError, Reconciler, RecreateReason};
use syncherd_types::{DatabaseSpec, DesiredState, FullCopy, MembershipGroup, SyncSpec};
use tokio_util::sync::CancellationToken;

fn db(id: i64) -> DatabaseSpec {
    DatabaseSpec {
        id,
        dbname: "app".into(),
        host: format!("pg{id}"),
        user: "app".into(),
        pass: "secret".into(),
        port: None,
    }
}

fn orders(tables: &str) -> SyncSpec {
    SyncSpec {
        name: "orders".into(),
        sources: vec![1],
        targets: vec![2],
        tables: Some(tables.into()),
        ..Default::default()
    }
}

fn state(databases: Vec<DatabaseSpec>, syncs: Vec<SyncSpec>) -> DesiredState {
    DesiredState {
        databases,
        syncs,
        log_level: None,
    }
}

fn fallback_connection() -> ConnectionParams {
    ConnectionParams {
        host: "postgres".into(),
        port: 5432,
        user: "postgres".into(),
        password: "changeme".into(),
        dbname: "bucardo".into(),
    }
}

fn reconciler(engine: &Arc<MockEngine>) -> Reconciler {
    Reconciler::new(engine.clone(), DeletionStrategy::PrimaryOnly)
}

fn group_name(sync: &SyncSpec) -> String {
    MembershipGroup::for_sync(sync).unwrap().name
}

// ── Creation ────────────────────────────────────────────────────

#[tokio::test]
async fn fresh_engine_gets_every_declared_entity() {
    let engine = Arc::new(MockEngine::new());
    let sync = orders("public.b, public.a");
    let group = group_name(&sync);
    let desired = state(vec![db(1), db(2)], vec![sync]);

    let report = reconciler(&engine)
        .reconcile(&desired, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.databases_created, vec!["db1", "db2"]);
    assert_eq!(report.syncs_created, vec!["orders"]);
    assert_eq!(
        engine.calls(),
        vec![
            EngineCall::Exists(EntityKind::Database, "db1".into()),
            EngineCall::Create(
                EntityKind::Database,
                "db1".into(),
                vec![
                    "dbname=app".into(),
                    "host=pg1".into(),
                    "user=app".into(),
                    "pass=secret".into()
                ]
            ),
            EngineCall::Exists(EntityKind::Database, "db2".into()),
            EngineCall::Create(
                EntityKind::Database,
                "db2".into(),
                vec![
                    "dbname=app".into(),
                    "host=pg2".into(),
                    "user=app".into(),
                    "pass=secret".into()
                ]
            ),
            EngineCall::List(EntityKind::Database),
            EngineCall::Describe("orders".into()),
            EngineCall::Delete(EntityKind::DbGroup, group.clone()),
            EngineCall::Create(
                EntityKind::DbGroup,
                group.clone(),
                vec!["db1:source".into(), "db2:target".into()]
            ),
            EngineCall::Create(
                EntityKind::Sync,
                "orders".into(),
                vec![
                    "onetimecopy=0".into(),
                    format!("dbs={group}"),
                    "tables=public.a,public.b".into()
                ]
            ),
            EngineCall::List(EntityKind::Sync),
        ]
    );
}

#[tokio::test]
async fn run_once_sync_options_are_passed_on_create() {
    let engine = Arc::new(MockEngine::new());
    let mut sync = orders("public.a");
    sync.onetimecopy = FullCopy::IfTargetEmpty;
    sync.exit_on_complete = Some(true);
    sync.strict_checking = Some(false);
    sync.conflict_strategy = Some("bucardo_latest".into());
    let group = group_name(&sync);

    reconciler(&engine)
        .reconcile(&state(vec![db(1), db(2)], vec![sync]), &CancellationToken::new())
        .await
        .unwrap();

    let create = engine
        .calls()
        .into_iter()
        .find(|c| matches!(c, EngineCall::Create(EntityKind::Sync, ..)))
        .unwrap();
    assert_eq!(
        create,
        EngineCall::Create(
            EntityKind::Sync,
            "orders".into(),
            vec![
                "onetimecopy=2".into(),
                format!("dbs={group}"),
                "tables=public.a".into(),
                "stayalive=0".into(),
                "kidsalive=0".into(),
                "strict_checking=false".into(),
                "conflict_strategy=bucardo_latest".into(),
            ]
        )
    );
}

#[tokio::test]
async fn herd_is_rebuilt_from_first_source() {
    let engine = Arc::new(MockEngine::new().with_catalog("db1", ["public.x", "public.y"]));
    let sync = SyncSpec {
        name: "catalog".into(),
        sources: vec![1],
        targets: vec![2],
        herd: Some("everything".into()),
        ..Default::default()
    };

    reconciler(&engine)
        .reconcile(&state(vec![db(1), db(2)], vec![sync]), &CancellationToken::new())
        .await
        .unwrap();

    let calls = engine.calls();
    let herd_create = calls
        .iter()
        .position(|c| *c == EngineCall::Create(EntityKind::Herd, "everything".into(), vec![]))
        .unwrap();
    assert_eq!(
        calls[herd_create - 1],
        EngineCall::Delete(EntityKind::Herd, "everything".into())
    );
    assert_eq!(
        calls[herd_create + 1],
        EngineCall::Raw(vec![
            "add".into(),
            "all".into(),
            "tables".into(),
            "--herd=everything".into(),
            "db=db1".into()
        ])
    );
    let created = engine.sync("catalog").unwrap();
    assert_eq!(created.relgroup.as_deref(), Some("everything"));
    assert_eq!(created.tables, vec!["public.x", "public.y"]);
}

#[tokio::test]
async fn delegated_password_is_resolved_through_lookup() {
    let engine = Arc::new(MockEngine::new());
    let mut database = db(7);
    database.pass = "env".into();
    database.port = Some(6432);

    Reconciler::new(engine.clone(), DeletionStrategy::PrimaryOnly)
        .with_password_lookup(Arc::new(|var: &str| (var == "BUCARDO_DB7").then(|| "s3cret".to_string())))
        .reconcile(&state(vec![database], vec![]), &CancellationToken::new())
        .await
        .unwrap();

    let attrs = engine.database_attributes("db7").unwrap();
    assert!(attrs.contains(&"pass=s3cret".to_string()));
    assert!(attrs.contains(&"port=6432".to_string()));
}

#[tokio::test]
async fn missing_delegated_password_aborts() {
    let engine = Arc::new(MockEngine::new());
    let mut database = db(7);
    database.pass = "env".into();

    let err = Reconciler::new(engine.clone(), DeletionStrategy::PrimaryOnly)
        .with_password_lookup(Arc::new(|_: &str| None::<String>))
        .reconcile(&state(vec![database], vec![]), &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, ReconcileError::Credential(_)));
    assert!(engine.calls().is_empty());
}

// ── Idempotence and updates ─────────────────────────────────────

#[tokio::test]
async fn second_cycle_makes_no_structural_changes() {
    let engine = Arc::new(MockEngine::new());
    let mut sync = orders("public.a,public.b");
    sync.conflict_strategy = Some("bucardo_source".into());
    let desired = state(vec![db(1), db(2)], vec![sync]);
    let reconciler = reconciler(&engine);
    let cancel = CancellationToken::new();

    reconciler.reconcile(&desired, &cancel).await.unwrap();
    engine.clear_calls();
    let report = reconciler.reconcile(&desired, &cancel).await.unwrap();

    assert!(report.is_structurally_unchanged());
    assert!(engine.structural_calls().is_empty());
    assert_eq!(report.databases_updated, vec!["db1", "db2"]);
    assert_eq!(report.syncs_updated, vec!["orders"]);
    assert!(engine.calls().contains(&EngineCall::Update(
        EntityKind::Sync,
        "orders".into(),
        vec!["conflict_strategy=bucardo_source".into()]
    )));
}

#[tokio::test]
async fn reordered_table_list_is_not_a_change() {
    let engine = Arc::new(MockEngine::new());
    let reconciler = reconciler(&engine);
    let cancel = CancellationToken::new();

    reconciler
        .reconcile(&state(vec![db(1), db(2)], vec![orders("public.a,public.b")]), &cancel)
        .await
        .unwrap();
    engine.clear_calls();
    reconciler
        .reconcile(&state(vec![db(1), db(2)], vec![orders(" public.b , public.a")]), &cancel)
        .await
        .unwrap();

    assert!(engine.structural_calls().is_empty());
}

// ── Recreation ──────────────────────────────────────────────────

#[tokio::test]
async fn changed_tables_recreate_the_sync() {
    let engine = Arc::new(MockEngine::new());
    let reconciler = reconciler(&engine);
    let cancel = CancellationToken::new();

    reconciler
        .reconcile(&state(vec![db(1), db(2)], vec![orders("public.a")]), &cancel)
        .await
        .unwrap();
    engine.clear_calls();
    let report = reconciler
        .reconcile(&state(vec![db(1), db(2)], vec![orders("public.a,public.c")]), &cancel)
        .await
        .unwrap();

    assert_eq!(
        report.syncs_recreated,
        vec![(
            "orders".to_string(),
            RecreateReason::TablesChanged {
                current: vec!["public.a".into()],
                desired: vec!["public.a".into(), "public.c".into()],
            }
        )]
    );
    assert!(report.syncs_created.is_empty());
    let calls = engine.calls();
    let delete = calls
        .iter()
        .position(|c| *c == EngineCall::Delete(EntityKind::Sync, "orders".into()))
        .unwrap();
    let create = calls
        .iter()
        .position(|c| matches!(c, EngineCall::Create(EntityKind::Sync, ..)))
        .unwrap();
    assert!(delete < create);
    assert_eq!(engine.sync("orders").unwrap().tables, vec!["public.a", "public.c"]);
}

#[tokio::test]
async fn stuck_sync_is_recreated_through_fallback() {
    let engine = Arc::new(MockEngine::new());
    let reconciler = Reconciler::new(
        engine.clone(),
        DeletionStrategy::PrimaryWithFallback(fallback_connection()),
    );
    let cancel = CancellationToken::new();

    reconciler
        .reconcile(&state(vec![db(1), db(2)], vec![orders("public.a")]), &cancel)
        .await
        .unwrap();
    engine.clear_calls();
    engine.fail_on(EngineOp::Delete, EntityKind::Sync, "orders");
    let report = reconciler
        .reconcile(&state(vec![db(1), db(2)], vec![orders("public.a,public.b")]), &cancel)
        .await
        .unwrap();

    assert_eq!(report.syncs_recreated.len(), 1);
    assert_eq!(report.syncs_recreated[0].0, "orders");
    let calls = engine.calls();
    let primary = calls
        .iter()
        .position(|c| *c == EngineCall::Delete(EntityKind::Sync, "orders".into()))
        .unwrap();
    let fallback = calls
        .iter()
        .position(|c| *c == EngineCall::DeleteFallback(EntityKind::Sync, "orders".into()))
        .unwrap();
    let create = calls
        .iter()
        .position(|c| matches!(c, EngineCall::Create(EntityKind::Sync, ..)))
        .unwrap();
    assert!(primary < fallback && fallback < create);
    assert_eq!(engine.sync("orders").unwrap().tables, vec!["public.a", "public.b"]);
}

#[tokio::test]
async fn recreation_fails_when_both_deletion_paths_fail() {
    let engine = Arc::new(MockEngine::new());
    let reconciler = Reconciler::new(
        engine.clone(),
        DeletionStrategy::PrimaryWithFallback(fallback_connection()),
    );
    let cancel = CancellationToken::new();

    reconciler
        .reconcile(&state(vec![db(1), db(2)], vec![orders("public.a")]), &cancel)
        .await
        .unwrap();
    engine.clear_calls();
    engine.fail_on(EngineOp::Delete, EntityKind::Sync, "orders");
    engine.fail(EngineOp::DeleteFallback);
    let result = reconciler
        .reconcile(&state(vec![db(1), db(2)], vec![orders("public.a,public.b")]), &cancel)
        .await;

    assert!(matches!(
        result,
        Err(ReconcileError::Engine { kind: EntityKind::Sync, ref name, .. }) if name == "orders"
    ));
    assert!(
        !engine
            .calls()
            .iter()
            .any(|c| matches!(c, EngineCall::Create(EntityKind::Sync, ..)))
    );
    assert_eq!(engine.sync("orders").unwrap().tables, vec!["public.a"]);
}

#[tokio::test]
async fn changed_membership_moves_sync_to_new_group() {
    let engine = Arc::new(MockEngine::new());
    let reconciler = reconciler(&engine);
    let cancel = CancellationToken::new();
    let before = orders("public.a");
    let mut after = orders("public.a");
    after.targets = vec![2, 3];

    reconciler
        .reconcile(&state(vec![db(1), db(2), db(3)], vec![before.clone()]), &cancel)
        .await
        .unwrap();
    let report = reconciler
        .reconcile(&state(vec![db(1), db(2), db(3)], vec![after.clone()]), &cancel)
        .await
        .unwrap();

    assert_eq!(
        report.syncs_recreated,
        vec![(
            "orders".to_string(),
            RecreateReason::MembershipChanged {
                current: group_name(&before),
                expected: group_name(&after),
            }
        )]
    );
    assert_eq!(engine.dbgroup(&group_name(&before)), None);
    assert_eq!(
        engine.dbgroup(&group_name(&after)).unwrap(),
        vec!["db1:source", "db2:target", "db3:target"]
    );
    assert_eq!(
        engine.sync("orders").unwrap().dbgroup,
        Some(group_name(&after))
    );
}

#[tokio::test]
async fn bidirectional_participant_edits_keep_the_sync() {
    let engine = Arc::new(MockEngine::new());
    let reconciler = reconciler(&engine);
    let cancel = CancellationToken::new();
    let mut sync = SyncSpec {
        name: "mesh".into(),
        bidirectional: vec![1, 2],
        tables: Some("public.a".into()),
        ..Default::default()
    };

    reconciler
        .reconcile(&state(vec![db(1), db(2), db(3)], vec![sync.clone()]), &cancel)
        .await
        .unwrap();
    sync.bidirectional.push(3);
    engine.clear_calls();
    let report = reconciler
        .reconcile(&state(vec![db(1), db(2), db(3)], vec![sync]), &cancel)
        .await
        .unwrap();

    assert!(report.syncs_recreated.is_empty());
    assert!(engine.structural_calls().is_empty());
}

// ── Pruning ─────────────────────────────────────────────────────

#[tokio::test]
async fn orphans_are_pruned_with_their_groups() {
    let engine = Arc::new(
        MockEngine::new()
            .with_database("db9")
            .with_sync(SyncDescriptor {
                name: "legacy".into(),
                relgroup: Some("legacy".into()),
                dbgroup: Some("sg_legacy_00000000".into()),
                tables: vec!["public.old".into()],
            }),
    );

    let report = reconciler(&engine)
        .reconcile(&state(vec![db(1), db(2)], vec![orders("public.a")]), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.databases_pruned, vec!["db9"]);
    assert_eq!(report.syncs_pruned, vec!["legacy"]);
    assert_eq!(engine.database_names(), vec!["db1", "db2"]);
    assert_eq!(engine.sync_names(), vec!["orders"]);
    assert_eq!(engine.dbgroup("sg_legacy_00000000"), None);
    let calls = engine.calls();
    let orphan_delete = calls
        .iter()
        .position(|c| *c == EngineCall::Delete(EntityKind::Sync, "legacy".into()))
        .unwrap();
    let declared_create = calls
        .iter()
        .position(|c| matches!(c, EngineCall::Create(EntityKind::Sync, ..)))
        .unwrap();
    assert!(declared_create < orphan_delete);
}

#[tokio::test]
async fn prune_failures_do_not_abort_the_cycle() {
    let engine = Arc::new(MockEngine::new().with_database("db9").with_sync(SyncDescriptor {
        name: "legacy".into(),
        ..Default::default()
    }));
    engine.fail_on(EngineOp::Delete, EntityKind::Database, "db9");
    engine.fail_on(EngineOp::Delete, EntityKind::Sync, "legacy");

    let report = reconciler(&engine)
        .reconcile(&state(vec![db(1), db(2)], vec![orders("public.a")]), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.syncs_created, vec!["orders"]);
    let failed: Vec<_> = report
        .prune_failures
        .iter()
        .map(|f| (f.kind, f.name.as_str()))
        .collect();
    assert_eq!(
        failed,
        vec![(EntityKind::Database, "db9"), (EntityKind::Sync, "legacy")]
    );
    assert!(engine.sync_names().contains(&"legacy".to_string()));
}

#[tokio::test]
async fn failed_listing_skips_pruning() {
    let engine = Arc::new(MockEngine::new().with_database("db9"));
    engine.fail_kind(EngineOp::List, EntityKind::Database);

    let report = reconciler(&engine)
        .reconcile(&state(vec![db(1)], vec![]), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.prune_failures.len(), 1);
    assert!(engine.database_names().contains(&"db9".to_string()));
}

#[tokio::test]
async fn fallback_removes_stuck_orphan() {
    let engine = Arc::new(MockEngine::new().with_sync(SyncDescriptor {
        name: "stuck".into(),
        relgroup: Some("stuck".into()),
        dbgroup: Some("bg_stuck".into()),
        tables: vec![],
    }));
    engine.fail_on(EngineOp::Delete, EntityKind::Sync, "stuck");

    let report = Reconciler::new(
        engine.clone(),
        DeletionStrategy::PrimaryWithFallback(fallback_connection()),
    )
    .reconcile(&state(vec![], vec![]), &CancellationToken::new())
    .await
    .unwrap();

    assert_eq!(report.syncs_pruned, vec!["stuck"]);
    assert!(report.prune_failures.is_empty());
    assert_eq!(
        engine.structural_calls(),
        vec![
            EngineCall::Delete(EntityKind::Sync, "stuck".into()),
            EngineCall::DeleteFallback(EntityKind::Sync, "stuck".into()),
            EngineCall::DeleteFallback(EntityKind::Relgroup, "stuck".into()),
            EngineCall::Delete(EntityKind::DbGroup, "bg_stuck".into()),
        ]
    );
    assert!(engine.sync_names().is_empty());
}

#[tokio::test]
async fn shared_herd_survives_orphan_removal() {
    let engine = Arc::new(
        MockEngine::new()
            .with_catalog("db1", ["public.x"])
            .with_sync(SyncDescriptor {
                name: "old".into(),
                relgroup: Some("shared".into()),
                dbgroup: None,
                tables: vec!["public.x".into()],
            }),
    );
    let sync = SyncSpec {
        name: "new".into(),
        sources: vec![1],
        targets: vec![2],
        herd: Some("shared".into()),
        ..Default::default()
    };

    reconciler(&engine)
        .reconcile(&state(vec![db(1), db(2)], vec![sync]), &CancellationToken::new())
        .await
        .unwrap();

    assert!(!engine
        .calls()
        .contains(&EngineCall::Delete(EntityKind::Relgroup, "shared".into())));
    assert_eq!(engine.herd("shared").unwrap(), vec!["public.x"]);
    assert_eq!(engine.sync_names(), vec!["new"]);
}

// ── Refusal and failure ─────────────────────────────────────────

#[tokio::test]
async fn invalid_document_never_reaches_the_engine() {
    let engine = Arc::new(MockEngine::new());
    let mut sync = orders("public.a");
    sync.targets.clear();

    let err = reconciler(&engine)
        .reconcile(&state(vec![db(1)], vec![sync]), &CancellationToken::new())
        .await
        .unwrap_err();

    match err {
        ReconcileError::Validation(errors) => assert_eq!(errors.len(), 1),
        other => panic!("unexpected error: {other}"),
    }
    assert!(engine.calls().is_empty());
}

#[tokio::test]
async fn declared_entity_failure_aborts_before_pruning() {
    let engine = Arc::new(MockEngine::new());
    engine.fail_on(EngineOp::Create, EntityKind::Sync, "orders");

    let err = reconciler(&engine)
        .reconcile(&state(vec![db(1), db(2)], vec![orders("public.a")]), &CancellationToken::new())
        .await
        .unwrap_err();

    match err {
        ReconcileError::Engine { kind, name, .. } => {
            assert_eq!(kind, EntityKind::Sync);
            assert_eq!(name, "orders");
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(!engine.calls().contains(&EngineCall::List(EntityKind::Sync)));
}

// ── Cancellation ────────────────────────────────────────────────

#[tokio::test]
async fn cancelled_token_stops_before_any_call() {
    let engine = Arc::new(MockEngine::new());
    let cancel = CancellationToken::new();
    cancel.cancel();

    let err = reconciler(&engine)
        .reconcile(&state(vec![db(1)], vec![]), &cancel)
        .await
        .unwrap_err();

    assert!(matches!(err, ReconcileError::Cancelled));
    assert!(engine.calls().is_empty());
}

/// Delegates to a [`MockEngine`] but never finishes describing a sync.
struct HangingEngine(MockEngine);

#[async_trait]
impl EngineAdapter for HangingEngine {
    async fn entity_exists(&self, kind: EntityKind, name: &str) -> EngineResult<bool> {
        self.0.entity_exists(kind, name).await
    }
    async fn list_entities(&self, kind: EntityKind) -> EngineResult<Vec<String>> {
        self.0.list_entities(kind).await
    }
    async fn create_entity(&self, kind: EntityKind, name: &str, a: &Attributes) -> EngineResult<()> {
        self.0.create_entity(kind, name, a).await
    }
    async fn update_entity(&self, kind: EntityKind, name: &str, a: &Attributes) -> EngineResult<()> {
        self.0.update_entity(kind, name, a).await
    }
    async fn delete_entity(&self, kind: EntityKind, name: &str) -> EngineResult<()> {
        self.0.delete_entity(kind, name).await
    }
    async fn delete_entity_fallback(
        &self,
        kind: EntityKind,
        name: &str,
        connection: &ConnectionParams,
    ) -> EngineResult<()> {
        self.0.delete_entity_fallback(kind, name, connection).await
    }
    async fn describe_sync(&self, _name: &str) -> EngineResult<Option<SyncDescriptor>> {
        std::future::pending().await
    }
    async fn run_raw_command(&self, args: &[String]) -> EngineResult<()> {
        self.0.run_raw_command(args).await
    }
    async fn start_engine(&self) -> EngineResult<()> {
        self.0.start_engine().await
    }
    async fn stop_engine(&self) -> EngineResult<()> {
        self.0.stop_engine().await
    }
}

#[tokio::test(start_paused = true)]
async fn cancellation_interrupts_a_hung_engine_call() {
    let engine = Arc::new(HangingEngine(MockEngine::new()));
    let reconciler = Reconciler::new(engine.clone(), DeletionStrategy::PrimaryOnly);
    let cancel = CancellationToken::new();
    let desired = state(vec![db(1), db(2)], vec![orders("public.a")]);

    let canceller = cancel.clone();
    let (result, ()) = tokio::join!(reconciler.reconcile(&desired, &cancel), async move {
        tokio::time::sleep(Duration::from_secs(5)).await;
        canceller.cancel();
    });

    assert!(matches!(result, Err(ReconcileError::Cancelled)));
    assert_eq!(engine.0.database_names(), vec!["db1", "db2"]);
    assert!(engine.0.sync_names().is_empty());
}
