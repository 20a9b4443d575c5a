//! Multi-server driver
//!
//! The driver runs one session per configured server and keeps the set of
//! sessions in line with the configuration file: removed servers are shut
//! down, new servers get a session, and surviving servers are sent their
//! new configuration to reconcile on their own turn.

use crate::{BotConfig, ConfigWatcher, Error, ModuleCatalog, Result, Session, SessionHandle};
use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// How long shutdown waits for sessions to say goodbye
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// How a new configuration differs from the running one, by server name
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigDiff {
    pub added: BTreeSet<String>,
    pub removed: BTreeSet<String>,
    pub updated: BTreeSet<String>,
}

impl ConfigDiff {
    /// Compare two configurations
    ///
    /// Servers present in both are only reported as updated if their
    /// configuration actually changed.
    pub fn between(old: &BotConfig, new: &BotConfig) -> Self {
        let old_names: BTreeSet<String> = old.servers.iter().map(|s| s.server.clone()).collect();
        let new_names: BTreeSet<String> = new.servers.iter().map(|s| s.server.clone()).collect();

        let updated = old_names
            .intersection(&new_names)
            .filter(|name| old.server(name) != new.server(name))
            .cloned()
            .collect();

        Self {
            added: new_names.difference(&old_names).cloned().collect(),
            removed: old_names.difference(&new_names).cloned().collect(),
            updated,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.updated.is_empty()
    }
}

/// Runs and supervises one session per server
pub struct Driver {
    config: BotConfig,
    config_path: Option<PathBuf>,
    catalog: ModuleCatalog,
    sessions: HashMap<String, SessionHandle>,
    cancel: CancellationToken,
}

impl Driver {
    pub fn new(config: BotConfig, catalog: ModuleCatalog) -> Self {
        Self {
            config,
            config_path: None,
            catalog,
            sessions: HashMap::new(),
            cancel: CancellationToken::new(),
        }
    }

    /// Remember where the configuration came from, for reloads
    pub fn with_config_path<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.config_path = Some(path.as_ref().to_path_buf());
        self
    }

    pub fn config(&self) -> &BotConfig {
        &self.config
    }

    /// Token that stops `run` when cancelled
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Names of servers with a running session
    pub fn running(&self) -> BTreeSet<String> {
        self.sessions.keys().cloned().collect()
    }

    /// Start a session for every configured server
    pub fn start(&mut self) {
        let names: Vec<String> = self.config.servers.iter().map(|s| s.server.clone()).collect();
        for name in names {
            self.start_session(&name);
        }
    }

    fn start_session(&mut self, name: &str) {
        let Some(server) = self.config.server(name) else {
            return;
        };
        match Session::spawn(server, self.catalog.clone()) {
            Ok(handle) => {
                tracing::info!("Started session {} for {}", handle.id(), name);
                self.sessions.insert(name.to_string(), handle);
            }
            Err(e) => tracing::error!("Cannot start session for {}: {}", name, e),
        }
    }

    /// Switch to a new configuration, starting, stopping and updating sessions
    pub fn apply(&mut self, config: BotConfig) -> ConfigDiff {
        let diff = ConfigDiff::between(&self.config, &config);
        self.config = config;

        for name in &diff.removed {
            tracing::info!("Closing connection to {}", name);
            if let Some(handle) = self.sessions.remove(name) {
                handle.shutdown();
            }
        }
        for name in &diff.added {
            tracing::info!("Adding bot for {}", name);
            self.start_session(name);
        }
        for name in &diff.updated {
            tracing::info!("Updating bot for {}", name);
            let Some(server) = self.config.server(name).cloned() else {
                continue;
            };
            match self.sessions.get(name) {
                Some(handle) if handle.reconfigure(server) => {}
                _ => tracing::warn!("Session for {} is not running; change not applied", name),
            }
        }
        diff
    }

    /// Re-read the configuration file and apply it if it changed
    pub fn reload(&mut self) -> Result<ConfigDiff> {
        let path = self
            .config_path
            .clone()
            .ok_or_else(|| Error::Config("No configuration file to reload".to_string()))?;
        let config = BotConfig::from_file(&path)?;
        config.validate()?;

        if config == self.config {
            tracing::debug!("Configuration unchanged");
            return Ok(ConfigDiff::default());
        }
        tracing::info!("Updating server configurations");
        Ok(self.apply(config))
    }

    /// Run until cancelled or interrupted, or until every session has ended
    /// and nothing is watching for new configuration
    pub async fn run(mut self, watch: bool) -> Result<()> {
        let mut watcher = match (&self.config_path, watch) {
            (Some(path), true) => Some(ConfigWatcher::new(path, crate::watcher::DEFAULT_DEBOUNCE)?),
            _ => None,
        };

        let watching = watcher.is_some();
        let cancel = self.cancel.clone();

        self.start();
        let mut reap = tokio::time::interval(Duration::from_secs(1));

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                signal = tokio::signal::ctrl_c() => {
                    if let Err(e) = signal {
                        tracing::error!("Cannot listen for ctrl-C: {}", e);
                    }
                    tracing::info!("ctrl-C caught; exiting");
                    break;
                }
                Some(()) = async {
                    match watcher.as_mut() {
                        Some(watcher) => watcher.changed().await,
                        None => std::future::pending().await,
                    }
                } => {
                    if let Err(e) = self.reload() {
                        tracing::error!("Failed to reload configuration: {}", e);
                        tracing::warn!("Keeping old configuration due to reload failure");
                    }
                }
                _ = reap.tick() => {
                    self.reap().await;
                    if self.sessions.is_empty() && !watching {
                        tracing::info!("No sessions left");
                        break;
                    }
                }
            }
        }

        self.shutdown().await;
        Ok(())
    }

    /// Collect sessions that have ended and log how they ended
    async fn reap(&mut self) {
        let finished: Vec<String> = self
            .sessions
            .iter()
            .filter(|(_, handle)| handle.is_finished())
            .map(|(name, _)| name.clone())
            .collect();

        for name in finished {
            if let Some(handle) = self.sessions.remove(&name) {
                match handle.join().await {
                    Ok(()) => tracing::info!("Session for {} ended", name),
                    Err(e) if e.is_fatal() => tracing::error!("Session for {} ended: {}", name, e),
                    Err(e) => tracing::warn!("Session for {} ended: {}", name, e),
                }
            }
        }
    }

    /// Tell every session to quit and wait for them
    pub async fn shutdown(&mut self) {
        for handle in self.sessions.values() {
            handle.shutdown();
        }
        for (name, handle) in self.sessions.drain() {
            let id = handle.id();
            let abort = handle.abort_handle();
            match tokio::time::timeout(SHUTDOWN_TIMEOUT, handle.join()).await {
                Ok(Ok(())) => tracing::debug!("Session {} for {} stopped", id, name),
                Ok(Err(e)) => tracing::warn!("Session {} for {} stopped: {}", id, name, e),
                Err(_) => {
                    tracing::warn!("Session {} for {} did not stop in time", id, name);
                    abort.abort();
                }
            }
        }
    }
}
