//! The engine capability set.
//!
//! Everything the reconciler and the monitor may ask of the engine goes
//! through [`EngineAdapter`]. Implementations own all knowledge of the
//! engine's command syntax and output format; callers only see names,
//! [`Attributes`] and [`SyncDescriptor`]s.

use crate::error::EngineResult;
use async_trait::async_trait;
use std::fmt;

/// Kinds of entity the engine manages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
    /// A database connection (`db`).
    Database,
    /// A replication task (`sync`).
    Sync,
    /// A membership group binding databases to roles (`dbgroup`).
    DbGroup,
    /// The table group a sync replicates (`relgroup`).
    Relgroup,
    /// A user-declared, named table group (`herd`).
    Herd,
}

impl EntityKind {
    /// The engine's noun for the kind.
    pub fn noun(self) -> &'static str {
        match self {
            EntityKind::Database => "db",
            EntityKind::Sync => "sync",
            EntityKind::DbGroup => "dbgroup",
            EntityKind::Relgroup => "relgroup",
            EntityKind::Herd => "herd",
        }
    }

    /// Backing table in the engine's own schema, used by fallback deletion.
    pub fn state_table(self) -> &'static str {
        match self {
            EntityKind::Database => "bucardo.db",
            EntityKind::Sync => "bucardo.sync",
            EntityKind::DbGroup => "bucardo.dbgroup",
            EntityKind::Relgroup | EntityKind::Herd => "bucardo.herd",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.noun())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Attribute {
    Pair(String, String),
    Member(String),
    Flag(String),
}

/// An ordered attribute list for create/update operations.
///
/// Three shapes are supported: `key=value` pairs, bare member tokens
/// (`db1:source`) and flags (`--force`). Order is preserved.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Attributes {
    items: Vec<Attribute>,
}

impl Attributes {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a `key=value` pair.
    pub fn set(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.items
            .push(Attribute::Pair(key.into(), value.to_string()));
        self
    }

    /// Appends a `key=value` pair when `value` is present.
    pub fn set_opt<V: ToString>(self, key: impl Into<String>, value: Option<V>) -> Self {
        match value {
            Some(value) => self.set(key, value),
            None => self,
        }
    }

    /// Appends a bare member token.
    pub fn member(mut self, member: impl Into<String>) -> Self {
        self.items.push(Attribute::Member(member.into()));
        self
    }

    /// Appends several member tokens.
    pub fn members<I, S>(self, members: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        members.into_iter().fold(self, |attrs, m| attrs.member(m))
    }

    /// Appends a flag.
    pub fn flag(mut self, flag: impl Into<String>) -> Self {
        self.items.push(Attribute::Flag(flag.into()));
        self
    }

    /// Value of the first pair named `key`.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.items.iter().find_map(|item| match item {
            Attribute::Pair(k, v) if k == key => Some(v.as_str()),
            _ => None,
        })
    }

    /// Member tokens in insertion order.
    pub fn member_tokens(&self) -> impl Iterator<Item = &str> {
        self.items.iter().filter_map(|item| match item {
            Attribute::Member(m) => Some(m.as_str()),
            _ => None,
        })
    }

    pub fn has_flag(&self, flag: &str) -> bool {
        self.items
            .iter()
            .any(|item| matches!(item, Attribute::Flag(f) if f == flag))
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Renders the attributes as command arguments.
    pub fn to_args(&self) -> Vec<String> {
        self.items
            .iter()
            .map(|item| match item {
                Attribute::Pair(k, v) => format!("{k}={v}"),
                Attribute::Member(m) => m.clone(),
                Attribute::Flag(f) => f.clone(),
            })
            .collect()
    }
}

/// Direct connection to the engine's own state database.
///
/// Used by the fallback deletion path and by bootstrap. `Debug` never prints
/// the password.
#[derive(Clone, PartialEq, Eq)]
pub struct ConnectionParams {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub dbname: String,
}

impl fmt::Debug for ConnectionParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionParams")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &"*****")
            .field("dbname", &self.dbname)
            .finish()
    }
}

/// The engine's current view of one sync.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncDescriptor {
    pub name: String,
    /// Table group the sync replicates, if the engine reported one.
    pub relgroup: Option<String>,
    /// Membership group the sync references, if the engine reported one.
    pub dbgroup: Option<String>,
    /// Current tables of the relgroup, sorted.
    pub tables: Vec<String>,
}

impl SyncDescriptor {
    /// The table group identifier, falling back to the sync's own name.
    pub fn relgroup_or_name(&self) -> &str {
        self.relgroup.as_deref().unwrap_or(&self.name)
    }
}

/// Structured access to a replication engine.
#[async_trait]
pub trait EngineAdapter: Send + Sync {
    /// Checks whether an entity exists.
    async fn entity_exists(&self, kind: EntityKind, name: &str) -> EngineResult<bool>;

    /// Lists the names of all entities of a kind.
    async fn list_entities(&self, kind: EntityKind) -> EngineResult<Vec<String>>;

    /// Creates an entity.
    async fn create_entity(
        &self,
        kind: EntityKind,
        name: &str,
        attributes: &Attributes,
    ) -> EngineResult<()>;

    /// Updates mutable attributes of an existing entity. Idempotent.
    async fn update_entity(
        &self,
        kind: EntityKind,
        name: &str,
        attributes: &Attributes,
    ) -> EngineResult<()>;

    /// Deletes an entity through the engine's own command path.
    async fn delete_entity(&self, kind: EntityKind, name: &str) -> EngineResult<()>;

    /// Deletes an entity by mutating the engine's state store directly.
    ///
    /// Escape hatch for when [`Self::delete_entity`] fails.
    async fn delete_entity_fallback(
        &self,
        kind: EntityKind,
        name: &str,
        connection: &ConnectionParams,
    ) -> EngineResult<()>;

    /// Describes a sync, or `None` if the engine has no sync of that name.
    async fn describe_sync(&self, name: &str) -> EngineResult<Option<SyncDescriptor>>;

    /// Runs a command that has no dedicated method.
    async fn run_raw_command(&self, args: &[String]) -> EngineResult<()>;

    /// Starts the engine.
    async fn start_engine(&self) -> EngineResult<()>;

    /// Stops the engine, returning only once it is confirmed stopped or a
    /// bounded wait has elapsed.
    async fn stop_engine(&self) -> EngineResult<()>;

    /// Stops the worker of a single sync.
    async fn stop_sync(&self, name: &str) -> EngineResult<()> {
        self.run_raw_command(&["stop".to_string(), name.to_string()])
            .await
    }

    /// Sets the engine's global log verbosity.
    async fn set_log_level(&self, level: &str) -> EngineResult<()> {
        self.run_raw_command(&["set".to_string(), format!("log_level={level}")])
            .await
    }

    /// Installs the engine's schema if it is not already operational.
    async fn ensure_installed(&self, _connection: &ConnectionParams) -> EngineResult<()> {
        Ok(())
    }

    /// Forces the engine's database role to use `password`.
    async fn ensure_engine_password(
        &self,
        _superuser: &ConnectionParams,
        _engine_user: &str,
        _password: &str,
    ) -> EngineResult<()> {
        Ok(())
    }
}
