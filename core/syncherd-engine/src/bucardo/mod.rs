//! Bucardo adapter.
//!
//! Drives the `bucardo` CLI as the engine's OS user and turns its listings into
//! structured values through [`parse::OutputParser`]. The fallback deletion
//! path and bootstrap talk to the engine's state database with `psql`.

pub mod parse;

use crate::adapter::{Attributes, ConnectionParams, EngineAdapter, EntityKind, SyncDescriptor};
use crate::error::{EngineError, EngineResult};
use crate::runner::{CommandOutput, CommandRunner, ProcessRunner, shell_join, shell_quote};
use async_trait::async_trait;
use parse::OutputParser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Settings for [`BucardoCli`].
#[derive(Debug, Clone)]
pub struct CliConfig {
    /// OS user the CLI runs as. `None` runs commands directly.
    pub user: Option<String>,
    /// The CLI executable.
    pub command: String,
    /// The `psql` executable.
    pub psql: String,
    /// Pid file that exists while the engine's main process runs.
    pub pid_file: PathBuf,
    /// Upper bound on waiting for the engine to stop.
    pub stop_timeout: Duration,
    /// How often the pid file is checked while stopping.
    pub poll_interval: Duration,
}

impl Default for CliConfig {
    fn default() -> Self {
        Self {
            user: Some("postgres".to_string()),
            command: "bucardo".to_string(),
            psql: "psql".to_string(),
            pid_file: PathBuf::from("/var/run/bucardo/bucardo.mcp.pid"),
            stop_timeout: Duration::from_secs(30),
            poll_interval: Duration::from_secs(1),
        }
    }
}

impl CliConfig {
    pub fn with_user(mut self, user: Option<String>) -> Self {
        self.user = user;
        self
    }

    pub fn with_command(mut self, command: impl Into<String>) -> Self {
        self.command = command.into();
        self
    }

    pub fn with_psql(mut self, psql: impl Into<String>) -> Self {
        self.psql = psql.into();
        self
    }

    pub fn with_pid_file(mut self, pid_file: impl Into<PathBuf>) -> Self {
        self.pid_file = pid_file.into();
        self
    }

    pub fn with_stop_timeout(mut self, timeout: Duration) -> Self {
        self.stop_timeout = timeout;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }
}

/// [`EngineAdapter`] backed by the `bucardo` command-line tool.
pub struct BucardoCli {
    config: CliConfig,
    runner: Arc<dyn CommandRunner>,
    parser: OutputParser,
}

impl BucardoCli {
    /// Creates an adapter that spawns real processes.
    pub fn new(config: CliConfig) -> EngineResult<Self> {
        let runner = Arc::new(ProcessRunner::new(config.user.clone()));
        Self::with_runner(config, runner)
    }

    /// Creates an adapter that executes through `runner`.
    pub fn with_runner(config: CliConfig, runner: Arc<dyn CommandRunner>) -> EngineResult<Self> {
        Ok(Self {
            config,
            runner,
            parser: OutputParser::new()?,
        })
    }

    pub fn config(&self) -> &CliConfig {
        &self.config
    }

    fn cli_script<S: AsRef<str>>(&self, args: &[S]) -> String {
        let args = shell_join(args);
        format!("{} {}", self.config.command, args)
    }

    /// Runs a CLI command and returns its output whatever the exit status.
    async fn query<S: AsRef<str> + Sync>(&self, args: &[S]) -> EngineResult<CommandOutput> {
        self.runner.run_script(&self.cli_script(args)).await
    }

    /// Runs a CLI command, failing on a non-zero exit.
    async fn execute<S: AsRef<str> + Sync>(&self, args: &[S]) -> EngineResult<CommandOutput> {
        let script = self.cli_script(args);
        self.runner.run_script(&script).await?.into_result(&script)
    }

    fn psql_script(&self, connection: &ConnectionParams, dbname: &str) -> String {
        let port = connection.port.to_string();
        format!(
            "{} {}",
            shell_quote(&format!("PGPASSWORD={}", connection.password)),
            shell_join([
                self.config.psql.as_str(),
                "-h",
                connection.host.as_str(),
                "-p",
                port.as_str(),
                "-U",
                connection.user.as_str(),
                "-d",
                dbname,
                "-v",
                "ON_ERROR_STOP=1",
            ])
        )
    }

    async fn pid_file_present(&self) -> EngineResult<bool> {
        Ok(tokio::fs::try_exists(&self.config.pid_file).await?)
    }

    async fn list_names(&self, kind: EntityKind) -> EngineResult<Vec<String>> {
        let (args, parse): ([&str; 2], fn(&OutputParser, &str, bool) -> Option<Vec<String>>) =
            match kind {
                EntityKind::Database => (["list", "dbs"], OutputParser::database_names),
                EntityKind::Sync => (["list", "syncs"], OutputParser::sync_names),
                _ => {
                    return Err(EngineError::Unsupported {
                        operation: "list",
                        kind,
                    });
                }
            };
        let output = self.query(&args).await?;
        let combined = output.combined();
        match parse(&self.parser, &combined, output.success) {
            Some(names) => Ok(names),
            None => Err(EngineError::CommandFailed {
                command: self.cli_script(&args),
                code: output.code,
                output: combined.trim().to_string(),
            }),
        }
    }
}

#[async_trait]
impl EngineAdapter for BucardoCli {
    async fn entity_exists(&self, kind: EntityKind, name: &str) -> EngineResult<bool> {
        match kind {
            EntityKind::Database => Ok(self
                .list_names(kind)
                .await?
                .iter()
                .any(|existing| existing == name)),
            EntityKind::Sync => Ok(self.describe_sync(name).await?.is_some()),
            _ => {
                let output = self.query(&["list", kind.noun(), name]).await?;
                Ok(output.success && !output.combined().contains("No such"))
            }
        }
    }

    async fn list_entities(&self, kind: EntityKind) -> EngineResult<Vec<String>> {
        self.list_names(kind).await
    }

    async fn create_entity(
        &self,
        kind: EntityKind,
        name: &str,
        attributes: &Attributes,
    ) -> EngineResult<()> {
        let mut args = vec!["add".to_string(), kind.noun().to_string(), name.to_string()];
        args.extend(attributes.to_args());
        self.execute(&args).await.map(drop)
    }

    async fn update_entity(
        &self,
        kind: EntityKind,
        name: &str,
        attributes: &Attributes,
    ) -> EngineResult<()> {
        let mut args = vec!["update".to_string(), kind.noun().to_string(), name.to_string()];
        args.extend(attributes.to_args());
        self.execute(&args).await.map(drop)
    }

    async fn delete_entity(&self, kind: EntityKind, name: &str) -> EngineResult<()> {
        let mut args = vec!["del", kind.noun(), name];
        if matches!(kind, EntityKind::Sync | EntityKind::Herd) {
            args.push("--force");
        }
        self.execute(&args).await.map(drop)
    }

    async fn delete_entity_fallback(
        &self,
        kind: EntityKind,
        name: &str,
        connection: &ConnectionParams,
    ) -> EngineResult<()> {
        let sql = format!(
            "DELETE FROM {} WHERE name = '{}';",
            kind.state_table(),
            name.replace('\'', "''")
        );
        warn!(kind = %kind, name, "Deleting directly from engine state");
        let script = format!(
            "{} -c {}",
            self.psql_script(connection, &connection.dbname),
            shell_quote(&sql)
        );
        self.runner
            .run_script(&script)
            .await?
            .into_result(&script)
            .map(drop)
    }

    async fn describe_sync(&self, name: &str) -> EngineResult<Option<SyncDescriptor>> {
        let details = self.query(&["list", "sync", name]).await?;
        if !self.parser.sync_exists(&details.stdout, details.success) {
            return Ok(None);
        }

        let relgroup = self.parser.relgroup(&details.stdout);
        let dbgroup = self.parser.dbgroup(&details.stdout);
        if relgroup.is_none() {
            debug!(sync_name = name, "No relgroup in sync details, using sync name");
        }
        let group = relgroup.as_deref().unwrap_or(name);
        let listing = self.execute(&["list", "relgroup", group, "--verbose"]).await?;

        Ok(Some(SyncDescriptor {
            name: name.to_string(),
            tables: self.parser.relgroup_tables(&listing.stdout),
            relgroup,
            dbgroup,
        }))
    }

    async fn run_raw_command(&self, args: &[String]) -> EngineResult<()> {
        self.execute(args).await.map(drop)
    }

    async fn start_engine(&self) -> EngineResult<()> {
        info!("Checking for stale engine processes");
        if let Err(e) = self.stop_engine().await {
            warn!(error = %e, "Pre-start stop failed, continuing");
        }
        info!(component = "engine_service", "Starting engine");
        self.execute(&["start"]).await.map(drop)
    }

    async fn stop_engine(&self) -> EngineResult<()> {
        info!(component = "engine_service", "Stopping engine");
        if let Err(e) = self.execute(&["stop"]).await {
            warn!(error = %e, "Engine stop command failed");
        }

        let started = Instant::now();
        loop {
            if !self.pid_file_present().await? {
                info!("Engine has stopped");
                return Ok(());
            }
            if started.elapsed() >= self.config.stop_timeout {
                return Err(EngineError::Timeout {
                    state: "stopped",
                    waited: self.config.stop_timeout,
                });
            }
            tokio::time::sleep(self.config.poll_interval).await;
        }
    }

    async fn ensure_installed(&self, connection: &ConnectionParams) -> EngineResult<()> {
        if self.query(&["list", "dbs"]).await?.success {
            info!(component = "engine_installer", "Engine already installed");
            return Ok(());
        }

        let port = format!("--dbport={}", connection.port);
        let dbname = format!("--dbname={}", connection.dbname);
        let host = format!("--dbhost={}", connection.host);
        let user = format!("--dbuser={}", connection.user);
        let script = format!(
            "{} {}",
            shell_quote(&format!("PGPASSWORD={}", connection.password)),
            self.cli_script(&[
                "install",
                "--batch",
                dbname.as_str(),
                host.as_str(),
                user.as_str(),
                port.as_str(),
            ])
        );
        info!(component = "engine_installer", "Installing engine schema");
        let output = self.runner.run_script(&script).await?;
        if output.success {
            return Ok(());
        }
        if output.combined().contains("already exists") && self.query(&["list", "dbs"]).await?.success
        {
            info!(
                component = "engine_installer",
                "Install reported existing objects but the engine is operational"
            );
            return Ok(());
        }
        output.into_result(&script).map(drop)
    }

    async fn ensure_engine_password(
        &self,
        superuser: &ConnectionParams,
        engine_user: &str,
        password: &str,
    ) -> EngineResult<()> {
        // The password travels as a psql variable so it never appears in SQL text.
        let sql = format!(
            "ALTER USER \"{}\" WITH PASSWORD :'pass';",
            engine_user.replace('"', "\"\"")
        );
        let script = format!(
            "echo {} | {} {}",
            shell_quote(&sql),
            self.psql_script(superuser, "postgres"),
            shell_join(["-v".to_string(), format!("pass={password}")])
        );
        info!(component = "auth_fixer", host = %superuser.host, user = engine_user, "Ensuring engine role password");
        let output = self.runner.run_script(&script).await?;
        if output.success {
            return Ok(());
        }
        if output.combined().contains("does not exist") {
            info!(component = "auth_fixer", "Engine role does not exist yet");
            return Ok(());
        }
        output.into_result(&script).map(drop)
    }
}
