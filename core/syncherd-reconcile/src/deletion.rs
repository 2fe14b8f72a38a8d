//! Deletion with an optional direct-state fallback.

use syncherd_engine::{ConnectionParams, EngineAdapter, EngineResult, EntityKind};
use tracing::{error, warn};

/// How entities are removed from the engine.
#[derive(Debug, Clone, Default)]
pub enum DeletionStrategy {
    /// Only the engine's own delete command.
    #[default]
    PrimaryOnly,
    /// The engine's delete command, then direct removal from its state
    /// database when that fails.
    PrimaryWithFallback(ConnectionParams),
}

/// Which path removed an entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeletionPath {
    Primary,
    Fallback,
}

impl DeletionStrategy {
    /// Deletes one entity. When both paths fail the primary error is returned.
    pub async fn delete(
        &self,
        engine: &dyn EngineAdapter,
        kind: EntityKind,
        name: &str,
    ) -> EngineResult<DeletionPath> {
        let primary = match engine.delete_entity(kind, name).await {
            Ok(()) => return Ok(DeletionPath::Primary),
            Err(e) if e.is_cancelled() => return Err(e),
            Err(e) => e,
        };

        let DeletionStrategy::PrimaryWithFallback(connection) = self else {
            return Err(primary);
        };

        warn!(%kind, name, error = %primary, "Delete command failed, removing from engine state directly");
        match engine.delete_entity_fallback(kind, name, connection).await {
            Ok(()) => Ok(DeletionPath::Fallback),
            Err(fallback) => {
                error!(%kind, name, error = %fallback, "Fallback deletion failed");
                Err(primary)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use syncherd_engine::{EngineCall, EngineOp, MockEngine};

    fn connection() -> ConnectionParams {
        ConnectionParams {
            host: "postgres".into(),
            port: 5432,
            user: "postgres".into(),
            password: "changeme".into(),
            dbname: "bucardo".into(),
        }
    }

    #[tokio::test]
    async fn primary_success_skips_fallback() {
        let engine = MockEngine::new().with_database("db1");
        let path = DeletionStrategy::PrimaryWithFallback(connection())
            .delete(&engine, EntityKind::Database, "db1")
            .await
            .unwrap();
        assert_eq!(path, DeletionPath::Primary);
        assert_eq!(
            engine.calls(),
            vec![EngineCall::Delete(EntityKind::Database, "db1".into())]
        );
    }

    #[tokio::test]
    async fn fallback_runs_after_primary_failure() {
        let engine = MockEngine::new().with_database("db1");
        engine.fail_on(EngineOp::Delete, EntityKind::Database, "db1");
        let path = DeletionStrategy::PrimaryWithFallback(connection())
            .delete(&engine, EntityKind::Database, "db1")
            .await
            .unwrap();
        assert_eq!(path, DeletionPath::Fallback);
        assert!(engine.database_names().is_empty());
    }

    #[tokio::test]
    async fn primary_only_reports_failure() {
        let engine = MockEngine::new();
        let err = DeletionStrategy::PrimaryOnly
            .delete(&engine, EntityKind::Sync, "ghost")
            .await
            .unwrap_err();
        assert!(err.to_string().contains("No such sync"));
        assert_eq!(engine.calls().len(), 1);
    }

    #[tokio::test]
    async fn both_paths_failing_returns_primary_error() {
        let engine = MockEngine::new();
        engine.fail(EngineOp::DeleteFallback);
        let err = DeletionStrategy::PrimaryWithFallback(connection())
            .delete(&engine, EntityKind::Sync, "ghost")
            .await
            .unwrap_err();
        assert!(err.to_string().contains("No such sync"));
    }
}
