//! An in-memory engine for tests.
//!
//! [`MockEngine`] keeps a small model of engine state (databases, syncs,
//! groups, herds) and records every adapter call so tests can assert on the
//! exact sequence of operations. Failures can be injected per operation.

use crate::adapter::{Attributes, ConnectionParams, EngineAdapter, EntityKind, SyncDescriptor};
use crate::error::{EngineError, EngineResult};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashSet};
use std::sync::{Mutex, MutexGuard};
use syncherd_types::normalize_tables;

/// Operations a test can make fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EngineOp {
    Exists,
    List,
    Create,
    Update,
    Delete,
    DeleteFallback,
    Describe,
    Raw,
    Start,
    Stop,
}

/// A recorded adapter call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineCall {
    Exists(EntityKind, String),
    List(EntityKind),
    Create(EntityKind, String, Vec<String>),
    Update(EntityKind, String, Vec<String>),
    Delete(EntityKind, String),
    DeleteFallback(EntityKind, String),
    Describe(String),
    Raw(Vec<String>),
    Start,
    Stop,
}

impl EngineCall {
    /// True for calls that create or delete entities.
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            EngineCall::Create(..) | EngineCall::Delete(..) | EngineCall::DeleteFallback(..)
        )
    }
}

#[derive(Debug, Default)]
struct State {
    databases: BTreeMap<String, Vec<String>>,
    syncs: BTreeMap<String, SyncDescriptor>,
    dbgroups: BTreeMap<String, Vec<String>>,
    herds: BTreeMap<String, Vec<String>>,
    /// Tables each database exposes to `add all tables`.
    catalog: BTreeMap<String, Vec<String>>,
    running: bool,
    calls: Vec<EngineCall>,
    failures: HashSet<(EngineOp, Option<EntityKind>, Option<String>)>,
}

/// In-memory [`EngineAdapter`].
#[derive(Debug, Default)]
pub struct MockEngine {
    state: Mutex<State>,
}

impl MockEngine {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        // A panicking test thread must not hide the recorded calls.
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Seeds a registered database.
    pub fn with_database(self, name: impl Into<String>) -> Self {
        self.lock().databases.insert(name.into(), Vec::new());
        self
    }

    /// Seeds an existing sync.
    pub fn with_sync(self, descriptor: SyncDescriptor) -> Self {
        {
            let mut state = self.lock();
            if let Some(group) = &descriptor.dbgroup {
                state.dbgroups.entry(group.clone()).or_default();
            }
            state.syncs.insert(descriptor.name.clone(), descriptor);
        }
        self
    }

    /// Declares the tables a database exposes when a herd is populated from it.
    pub fn with_catalog<I, S>(self, database: impl Into<String>, tables: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.lock()
            .catalog
            .insert(database.into(), normalize_tables(tables));
        self
    }

    /// Makes every `op` call fail.
    pub fn fail(&self, op: EngineOp) {
        self.lock().failures.insert((op, None, None));
    }

    /// Makes `op` fail for one entity.
    pub fn fail_on(&self, op: EngineOp, kind: EntityKind, name: impl Into<String>) {
        self.lock()
            .failures
            .insert((op, Some(kind), Some(name.into())));
    }

    /// Makes `op` fail for every entity of `kind`.
    pub fn fail_kind(&self, op: EngineOp, kind: EntityKind) {
        self.lock().failures.insert((op, Some(kind), None));
    }

    /// Removes all injected failures.
    pub fn clear_failures(&self) {
        self.lock().failures.clear();
    }

    /// Every call so far, in order.
    pub fn calls(&self) -> Vec<EngineCall> {
        self.lock().calls.clone()
    }

    /// Only the create/delete calls.
    pub fn structural_calls(&self) -> Vec<EngineCall> {
        self.calls()
            .into_iter()
            .filter(EngineCall::is_structural)
            .collect()
    }

    pub fn clear_calls(&self) {
        self.lock().calls.clear();
    }

    pub fn database_names(&self) -> Vec<String> {
        self.lock().databases.keys().cloned().collect()
    }

    /// Attributes last applied to a database.
    pub fn database_attributes(&self, name: &str) -> Option<Vec<String>> {
        self.lock().databases.get(name).cloned()
    }

    pub fn sync_names(&self) -> Vec<String> {
        self.lock().syncs.keys().cloned().collect()
    }

    pub fn sync(&self, name: &str) -> Option<SyncDescriptor> {
        self.lock().syncs.get(name).cloned()
    }

    pub fn dbgroup(&self, name: &str) -> Option<Vec<String>> {
        self.lock().dbgroups.get(name).cloned()
    }

    pub fn herd(&self, name: &str) -> Option<Vec<String>> {
        self.lock().herds.get(name).cloned()
    }

    pub fn is_running(&self) -> bool {
        self.lock().running
    }

    /// Records `call` and returns the injected failure, if any.
    fn enter(
        &self,
        op: EngineOp,
        kind: Option<EntityKind>,
        name: Option<&str>,
        call: EngineCall,
    ) -> EngineResult<MutexGuard<'_, State>> {
        let mut state = self.lock();
        state.calls.push(call);
        let name = name.map(str::to_string);
        let injected = state.failures.contains(&(op, None, None))
            || (kind.is_some() && state.failures.contains(&(op, kind, None)))
            || state.failures.contains(&(op, kind, name.clone()));
        if injected {
            return Err(EngineError::CommandFailed {
                command: format!("{op:?} {}", name.unwrap_or_default()).trim().to_string(),
                code: Some(1),
                output: "injected failure".to_string(),
            });
        }
        Ok(state)
    }
}

fn missing(kind: EntityKind, name: &str) -> EngineError {
    EngineError::CommandFailed {
        command: format!("del {kind} {name}"),
        code: Some(1),
        output: format!("No such {kind}: {name}"),
    }
}

#[async_trait]
impl EngineAdapter for MockEngine {
    async fn entity_exists(&self, kind: EntityKind, name: &str) -> EngineResult<bool> {
        let state = self.enter(
            EngineOp::Exists,
            Some(kind),
            Some(name),
            EngineCall::Exists(kind, name.to_string()),
        )?;
        Ok(match kind {
            EntityKind::Database => state.databases.contains_key(name),
            EntityKind::Sync => state.syncs.contains_key(name),
            EntityKind::DbGroup => state.dbgroups.contains_key(name),
            EntityKind::Relgroup | EntityKind::Herd => state.herds.contains_key(name),
        })
    }

    async fn list_entities(&self, kind: EntityKind) -> EngineResult<Vec<String>> {
        let state = self.enter(EngineOp::List, Some(kind), None, EngineCall::List(kind))?;
        Ok(match kind {
            EntityKind::Database => state.databases.keys().cloned().collect(),
            EntityKind::Sync => state.syncs.keys().cloned().collect(),
            EntityKind::DbGroup => state.dbgroups.keys().cloned().collect(),
            EntityKind::Relgroup | EntityKind::Herd => state.herds.keys().cloned().collect(),
        })
    }

    async fn create_entity(
        &self,
        kind: EntityKind,
        name: &str,
        attributes: &Attributes,
    ) -> EngineResult<()> {
        let mut state = self.enter(
            EngineOp::Create,
            Some(kind),
            Some(name),
            EngineCall::Create(kind, name.to_string(), attributes.to_args()),
        )?;
        match kind {
            EntityKind::Database => {
                state
                    .databases
                    .insert(name.to_string(), attributes.to_args());
            }
            EntityKind::DbGroup => {
                let members = attributes.member_tokens().map(str::to_string).collect();
                state.dbgroups.insert(name.to_string(), members);
            }
            EntityKind::Relgroup | EntityKind::Herd => {
                state.herds.insert(name.to_string(), Vec::new());
            }
            EntityKind::Sync => {
                let (relgroup, tables) = match (attributes.get("herd"), attributes.get("tables")) {
                    (Some(herd), _) => (
                        herd.to_string(),
                        state.herds.get(herd).cloned().unwrap_or_default(),
                    ),
                    (None, Some(tables)) => (name.to_string(), normalize_tables(tables.split(','))),
                    (None, None) => (name.to_string(), Vec::new()),
                };
                state.syncs.insert(
                    name.to_string(),
                    SyncDescriptor {
                        name: name.to_string(),
                        relgroup: Some(relgroup),
                        dbgroup: attributes.get("dbs").map(str::to_string),
                        tables,
                    },
                );
            }
        }
        Ok(())
    }

    async fn update_entity(
        &self,
        kind: EntityKind,
        name: &str,
        attributes: &Attributes,
    ) -> EngineResult<()> {
        let mut state = self.enter(
            EngineOp::Update,
            Some(kind),
            Some(name),
            EngineCall::Update(kind, name.to_string(), attributes.to_args()),
        )?;
        match kind {
            EntityKind::Database => match state.databases.get_mut(name) {
                Some(current) => *current = attributes.to_args(),
                None => return Err(missing(kind, name)),
            },
            EntityKind::Sync if !state.syncs.contains_key(name) => return Err(missing(kind, name)),
            _ => {}
        }
        Ok(())
    }

    async fn delete_entity(&self, kind: EntityKind, name: &str) -> EngineResult<()> {
        let mut state = self.enter(
            EngineOp::Delete,
            Some(kind),
            Some(name),
            EngineCall::Delete(kind, name.to_string()),
        )?;
        let removed = match kind {
            EntityKind::Database => state.databases.remove(name).is_some(),
            EntityKind::Sync => state.syncs.remove(name).is_some(),
            EntityKind::DbGroup => state.dbgroups.remove(name).is_some(),
            EntityKind::Relgroup | EntityKind::Herd => state.herds.remove(name).is_some(),
        };
        if removed {
            Ok(())
        } else {
            Err(missing(kind, name))
        }
    }

    async fn delete_entity_fallback(
        &self,
        kind: EntityKind,
        name: &str,
        _connection: &ConnectionParams,
    ) -> EngineResult<()> {
        let mut state = self.enter(
            EngineOp::DeleteFallback,
            Some(kind),
            Some(name),
            EngineCall::DeleteFallback(kind, name.to_string()),
        )?;
        match kind {
            EntityKind::Database => {
                state.databases.remove(name);
            }
            EntityKind::Sync => {
                state.syncs.remove(name);
            }
            EntityKind::DbGroup => {
                state.dbgroups.remove(name);
            }
            EntityKind::Relgroup | EntityKind::Herd => {
                state.herds.remove(name);
            }
        }
        Ok(())
    }

    async fn describe_sync(&self, name: &str) -> EngineResult<Option<SyncDescriptor>> {
        let state = self.enter(
            EngineOp::Describe,
            Some(EntityKind::Sync),
            Some(name),
            EngineCall::Describe(name.to_string()),
        )?;
        Ok(state.syncs.get(name).cloned())
    }

    async fn run_raw_command(&self, args: &[String]) -> EngineResult<()> {
        let mut state = self.enter(EngineOp::Raw, None, None, EngineCall::Raw(args.to_vec()))?;
        // `add all tables --herd=H db=dbN` populates a herd from a database.
        if let ["add", "all", "tables", herd_arg, db_arg] =
            args.iter().map(String::as_str).collect::<Vec<_>>().as_slice()
        {
            if let (Some(herd), Some(db)) = (
                herd_arg.strip_prefix("--herd="),
                db_arg.strip_prefix("db="),
            ) {
                let tables = state.catalog.get(db).cloned().unwrap_or_default();
                state.herds.insert(herd.to_string(), tables);
            }
        }
        Ok(())
    }

    async fn start_engine(&self) -> EngineResult<()> {
        let mut state = self.enter(EngineOp::Start, None, None, EngineCall::Start)?;
        state.running = true;
        Ok(())
    }

    async fn stop_engine(&self) -> EngineResult<()> {
        let mut state = self.enter(EngineOp::Stop, None, None, EngineCall::Stop)?;
        state.running = false;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn sync_creation_is_describable() {
        let engine = MockEngine::new();
        let attrs = Attributes::new()
            .set("dbs", "sg_a_00000000")
            .set("tables", "public.b,public.a");
        engine
            .create_entity(EntityKind::Sync, "a", &attrs)
            .await
            .unwrap();
        let desc = engine.describe_sync("a").await.unwrap().unwrap();
        assert_eq!(desc.dbgroup.as_deref(), Some("sg_a_00000000"));
        assert_eq!(desc.tables, vec!["public.a", "public.b"]);
        assert_eq!(desc.relgroup_or_name(), "a");
    }

    #[tokio::test]
    async fn injected_failures_are_targeted() {
        let engine = MockEngine::new().with_database("db1").with_database("db2");
        engine.fail_on(EngineOp::Delete, EntityKind::Database, "db1");
        assert!(engine.delete_entity(EntityKind::Database, "db1").await.is_err());
        assert!(engine.delete_entity(EntityKind::Database, "db2").await.is_ok());
        assert_eq!(engine.database_names(), vec!["db1"]);
        assert_eq!(engine.calls().len(), 2);
    }

    #[tokio::test]
    async fn herd_population_uses_catalog() {
        let engine = MockEngine::new().with_catalog("db1", ["public.x", "public.y"]);
        engine
            .run_raw_command(&[
                "add".into(),
                "all".into(),
                "tables".into(),
                "--herd=h".into(),
                "db=db1".into(),
            ])
            .await
            .unwrap();
        assert_eq!(engine.herd("h").unwrap(), vec!["public.x", "public.y"]);
    }
}
