//! The desired-state document.
//!
//! Field names and shapes follow the persisted JSON format, so raw fields
//! stay optional and permissive. Typed views ([`SyncSpec::membership`],
//! [`SyncSpec::table_selection`]) are derived on demand; documents that do
//! not map onto exactly one shape are reported by [`crate::validate`].

use crate::error::CredentialError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Password value that delegates resolution to `BUCARDO_DB{id}`.
pub const ENV_PASSWORD_MARKER: &str = "env";

/// The full declared topology.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DesiredState {
    /// Declared databases, in document order.
    #[serde(default)]
    pub databases: Vec<DatabaseSpec>,
    /// Declared syncs, in document order.
    #[serde(default)]
    pub syncs: Vec<SyncSpec>,
    /// Global engine log verbosity (e.g. `VERBOSE`, `DEBUG`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_level: Option<String>,
}

impl DesiredState {
    /// Returns the global log level, ignoring an empty string.
    pub fn log_level(&self) -> Option<&str> {
        self.log_level.as_deref().filter(|l| !l.is_empty())
    }

    /// Looks up a database by id.
    pub fn database(&self, id: i64) -> Option<&DatabaseSpec> {
        self.databases.iter().find(|db| db.id == id)
    }

    /// Looks up a sync by name.
    pub fn sync(&self, name: &str) -> Option<&SyncSpec> {
        self.syncs.iter().find(|s| s.name == name)
    }

    /// Syncs marked run-once, in document order.
    pub fn run_once_syncs(&self) -> impl Iterator<Item = &SyncSpec> {
        self.syncs.iter().filter(|s| s.is_run_once())
    }

    /// The largest positive run-once timeout, if any run-once sync has one.
    pub fn max_run_once_timeout(&self) -> Option<Duration> {
        self.run_once_syncs()
            .filter_map(SyncSpec::run_once_timeout)
            .max()
    }

    /// True when there is at least one sync and every sync is run-once.
    pub fn all_run_once(&self) -> bool {
        !self.syncs.is_empty() && self.syncs.iter().all(SyncSpec::is_run_once)
    }
}

/// A database connection the engine should know about.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseSpec {
    /// Numeric identity, unique within the document.
    pub id: i64,
    /// Logical database name on the server.
    pub dbname: String,
    /// Server host.
    pub host: String,
    /// Login user.
    pub user: String,
    /// Literal password, or `"env"` to read `BUCARDO_DB{id}`.
    pub pass: String,
    /// Server port; the engine default applies when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
}

impl DatabaseSpec {
    /// The name under which the engine registers this database.
    pub fn engine_name(&self) -> String {
        engine_db_name(self.id)
    }

    /// Environment variable consulted when the password is delegated.
    pub fn password_env_var(&self) -> String {
        format!("BUCARDO_DB{}", self.id)
    }

    /// Resolves the password from the process environment.
    pub fn password(&self) -> Result<String, CredentialError> {
        self.password_with(|var| std::env::var(var).ok())
    }

    /// Resolves the password using `lookup` for delegated values.
    pub fn password_with<F>(&self, lookup: F) -> Result<String, CredentialError>
    where
        F: FnOnce(&str) -> Option<String>,
    {
        if self.pass != ENV_PASSWORD_MARKER {
            return Ok(self.pass.clone());
        }
        let var = self.password_env_var();
        match lookup(&var) {
            Some(value) if !value.is_empty() => Ok(value),
            _ => Err(CredentialError::MissingEnv {
                var,
                db_id: self.id,
            }),
        }
    }
}

/// Engine-side name of database `id`.
pub(crate) fn engine_db_name(id: i64) -> String {
    format!("db{id}")
}

/// Full-copy policy applied when a sync is created.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum FullCopy {
    /// Never perform a full copy.
    #[default]
    Off,
    /// Always perform a full copy.
    Always,
    /// Full copy only when the target table is empty.
    IfTargetEmpty,
}

impl FullCopy {
    /// The engine's numeric encoding.
    pub fn as_u8(self) -> u8 {
        match self {
            FullCopy::Off => 0,
            FullCopy::Always => 1,
            FullCopy::IfTargetEmpty => 2,
        }
    }
}

impl TryFrom<u8> for FullCopy {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(FullCopy::Off),
            1 => Ok(FullCopy::Always),
            2 => Ok(FullCopy::IfTargetEmpty),
            other => Err(format!("invalid onetimecopy value {other}, expected 0, 1 or 2")),
        }
    }
}

impl From<FullCopy> for u8 {
    fn from(value: FullCopy) -> Self {
        value.as_u8()
    }
}

/// Conflict-resolution strategies understood by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConflictStrategy {
    Source,
    Target,
    Skip,
    Random,
    Latest,
    Abort,
}

impl ConflictStrategy {
    /// All strategies, in a stable order.
    pub const ALL: [ConflictStrategy; 6] = [
        ConflictStrategy::Source,
        ConflictStrategy::Target,
        ConflictStrategy::Skip,
        ConflictStrategy::Random,
        ConflictStrategy::Latest,
        ConflictStrategy::Abort,
    ];

    /// The engine's name for the strategy.
    pub fn as_str(self) -> &'static str {
        match self {
            ConflictStrategy::Source => "bucardo_source",
            ConflictStrategy::Target => "bucardo_target",
            ConflictStrategy::Skip => "bucardo_skip",
            ConflictStrategy::Random => "bucardo_random",
            ConflictStrategy::Latest => "bucardo_latest",
            ConflictStrategy::Abort => "bucardo_abort",
        }
    }

    /// Static-priority strategies favour one side and are invalid for
    /// bidirectional membership.
    pub fn is_static_priority(self) -> bool {
        matches!(self, ConflictStrategy::Source | ConflictStrategy::Target)
    }

    /// Comma-separated list of all accepted names.
    pub fn allowed_names() -> String {
        Self::ALL
            .iter()
            .map(|s| s.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    }
}

impl fmt::Display for ConflictStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConflictStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|strategy| strategy.as_str() == s)
            .ok_or_else(|| format!("unknown conflict strategy '{s}'"))
    }
}

/// Who takes part in a sync.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Membership<'a> {
    /// One-way replication from sources to targets.
    SourceTarget {
        sources: &'a [i64],
        targets: &'a [i64],
    },
    /// Multi-master replication between symmetric participants.
    Bidirectional(&'a [i64]),
}

/// Which tables a sync replicates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableSelection<'a> {
    /// A named, pre-existing table group (a "herd").
    Herd(&'a str),
    /// An explicit comma-separated table list.
    Tables(&'a str),
}

/// A declared replication task.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncSpec {
    /// Unique, non-empty name.
    #[serde(default)]
    pub name: String,
    /// Source database ids (source/target shape).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sources: Vec<i64>,
    /// Target database ids (source/target shape).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub targets: Vec<i64>,
    /// Participant database ids (bidirectional shape).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub bidirectional: Vec<i64>,
    /// Named table group populated from the first source.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub herd: Option<String>,
    /// Explicit comma-separated table list.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tables: Option<String>,
    /// Full-copy policy.
    #[serde(default)]
    pub onetimecopy: FullCopy,
    /// When `false`, the engine tolerates schema differences such as column order.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strict_checking: Option<bool>,
    /// Run a single replication pass, then stop.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_on_complete: Option<bool>,
    /// Seconds to wait for a run-once pass before giving up.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_on_complete_timeout: Option<i64>,
    /// Conflict-resolution strategy name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conflict_strategy: Option<String>,
}

impl SyncSpec {
    /// The membership shape, when exactly one shape is populated.
    ///
    /// Returns `None` for incomplete documents (e.g. sources without targets).
    pub fn membership(&self) -> Option<Membership<'_>> {
        if !self.bidirectional.is_empty() {
            if !self.sources.is_empty() || !self.targets.is_empty() {
                return None;
            }
            return Some(Membership::Bidirectional(&self.bidirectional));
        }
        if self.sources.is_empty() || self.targets.is_empty() {
            return None;
        }
        Some(Membership::SourceTarget {
            sources: &self.sources,
            targets: &self.targets,
        })
    }

    /// True when the sync uses the bidirectional membership shape.
    pub fn is_bidirectional(&self) -> bool {
        !self.bidirectional.is_empty()
    }

    /// The table selection, when exactly one of herd/tables is populated.
    pub fn table_selection(&self) -> Option<TableSelection<'_>> {
        match (self.herd(), self.tables()) {
            (Some(herd), None) => Some(TableSelection::Herd(herd)),
            (None, Some(tables)) => Some(TableSelection::Tables(tables)),
            _ => None,
        }
    }

    /// The herd name, ignoring an empty string.
    pub fn herd(&self) -> Option<&str> {
        self.herd.as_deref().filter(|h| !h.is_empty())
    }

    /// The raw explicit table list, ignoring an empty string.
    pub fn tables(&self) -> Option<&str> {
        self.tables.as_deref().filter(|t| !t.is_empty())
    }

    /// The explicit table list, trimmed and sorted.
    pub fn normalized_tables(&self) -> Option<Vec<String>> {
        self.tables().map(|raw| normalize_tables(raw.split(',')))
    }

    /// The database whose tables populate a herd.
    pub fn herd_source(&self) -> Option<i64> {
        match self.membership()? {
            Membership::SourceTarget { sources, .. } => sources.first().copied(),
            Membership::Bidirectional(participants) => participants.first().copied(),
        }
    }

    /// The engine name of [`Self::herd_source`].
    pub fn herd_source_engine_name(&self) -> Option<String> {
        self.herd_source().map(engine_db_name)
    }

    /// The conflict strategy name, ignoring an empty string.
    pub fn conflict_strategy_name(&self) -> Option<&str> {
        self.conflict_strategy.as_deref().filter(|c| !c.is_empty())
    }

    /// The parsed conflict strategy. `None` when absent or unknown.
    pub fn conflict(&self) -> Option<ConflictStrategy> {
        self.conflict_strategy_name()?.parse().ok()
    }

    /// True when the sync should run a single pass and stop.
    pub fn is_run_once(&self) -> bool {
        self.exit_on_complete.unwrap_or(false)
    }

    /// Positive completion timeout for run-once syncs.
    pub fn run_once_timeout(&self) -> Option<Duration> {
        if !self.is_run_once() {
            return None;
        }
        self.exit_on_complete_timeout
            .filter(|secs| *secs > 0)
            .map(|secs| Duration::from_secs(secs as u64))
    }
}

/// Trims, drops empty entries and sorts a table list.
pub fn normalize_tables<I, S>(tables: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut out: Vec<String> = tables
        .into_iter()
        .map(|t| t.as_ref().trim().to_string())
        .filter(|t| !t.is_empty())
        .collect();
    out.sort();
    out
}
