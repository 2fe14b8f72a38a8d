//! Parsers for `bucardo` command output.
//!
//! The CLI prints state for humans. All pattern matching against that text is
//! kept here so the adapter can hand structured values to its callers.

use crate::error::EngineResult;
use regex_lite::Regex;

const NO_DATABASES: &str = "No databases found";
const NO_SYNCS: &str = "No syncs found";
const NO_SUCH_SYNC: &str = "No such sync";

/// Compiled patterns for the CLI's listing formats.
#[derive(Debug, Clone)]
pub struct OutputParser {
    database: Regex,
    sync: Regex,
    relgroup: Regex,
    dbgroup: Regex,
    table: Regex,
}

impl OutputParser {
    pub fn new() -> EngineResult<Self> {
        Ok(Self {
            database: Regex::new(r"Database: (\S+)")?,
            sync: Regex::new(r#"Sync "([^"]+)""#)?,
            relgroup: Regex::new(r#"Relgroup:?\s+"?([^"\s]+)"?"#)?,
            dbgroup: Regex::new(r#"DB group:?\s+"?([^"\s]+)"?"#)?,
            table: Regex::new(r"\s+(\S+\.\S+)")?,
        })
    }

    /// Database names from `list dbs`.
    ///
    /// `success` is the command's exit status; a failure is only accepted when
    /// the engine says it has no databases.
    pub fn database_names(&self, output: &str, success: bool) -> Option<Vec<String>> {
        listing(&self.database, output, success, NO_DATABASES)
    }

    /// Sync names from `list syncs`.
    pub fn sync_names(&self, output: &str, success: bool) -> Option<Vec<String>> {
        listing(&self.sync, output, success, NO_SYNCS)
    }

    /// Whether `list sync NAME` output describes an existing sync.
    pub fn sync_exists(&self, output: &str, success: bool) -> bool {
        success && !output.trim().is_empty() && !output.contains(NO_SUCH_SYNC)
    }

    /// Table group named in `list sync NAME` output.
    pub fn relgroup(&self, output: &str) -> Option<String> {
        first_capture(&self.relgroup, output)
    }

    /// Membership group named in `list sync NAME` output.
    pub fn dbgroup(&self, output: &str) -> Option<String> {
        first_capture(&self.dbgroup, output)
    }

    /// Qualified table names from `list relgroup NAME --verbose`, sorted.
    pub fn relgroup_tables(&self, output: &str) -> Vec<String> {
        let mut tables: Vec<String> = self
            .table
            .captures_iter(output)
            .filter_map(|caps| caps.get(1))
            .filter_map(|m| {
                let token = m.as_str().trim_end_matches(',');
                let name = token.split('(').next().unwrap_or(token).trim();
                (!name.is_empty()).then(|| name.to_string())
            })
            .collect();
        tables.sort();
        tables
    }
}

fn listing(re: &Regex, output: &str, success: bool, empty_marker: &str) -> Option<Vec<String>> {
    if !success {
        return output.contains(empty_marker).then(Vec::new);
    }
    Some(
        re.captures_iter(output)
            .filter_map(|caps| caps.get(1))
            .map(|m| m.as_str().to_string())
            .collect(),
    )
}

fn first_capture(re: &Regex, output: &str) -> Option<String> {
    re.captures(output)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}
