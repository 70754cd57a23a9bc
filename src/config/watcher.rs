//! Configuration file watcher for hot-reload support

use anyhow::{Context, Result};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use parking_lot::Mutex;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use super::AppConfig;

/// Time given to editors to finish writing before the file is re-read
const DEBOUNCE: Duration = Duration::from_millis(100);

/// Watches the config file and yields each new valid configuration
///
/// Invalid edits are logged and skipped; saves that do not change the
/// parsed configuration are not forwarded.
pub struct ConfigWatcher {
    _watcher: RecommendedWatcher,
    rx: mpsc::Receiver<AppConfig>,
}

impl ConfigWatcher {
    /// Load the initial config and start watching `config_path`
    pub async fn new(config_path: String) -> Result<(Self, AppConfig)> {
        let (tx, rx) = mpsc::channel(10);

        let initial_config = AppConfig::load(&config_path)
            .await
            .context("Failed to load initial config")?;
        let last_sent = Arc::new(Mutex::new(initial_config.clone()));

        // notify callbacks run on their own OS thread, outside the runtime
        let runtime_handle = tokio::runtime::Handle::current();
        let watched_path = config_path.clone();

        let mut watcher = notify::recommended_watcher(move |res: Result<Event, notify::Error>| {
            let event = match res {
                Ok(event) => event,
                Err(e) => {
                    error!("Watch error: {}", e);
                    return;
                },
            };
            if !matches!(event.kind, EventKind::Modify(_) | EventKind::Create(_)) {
                return;
            }
            debug!("Config file changed: {:?}", event.paths);

            let path = watched_path.clone();
            let tx = tx.clone();
            let last_sent = Arc::clone(&last_sent);
            runtime_handle.spawn(async move {
                tokio::time::sleep(DEBOUNCE).await;

                let new_config = match AppConfig::load(&path).await {
                    Ok(config) => config,
                    Err(e) => {
                        warn!("Failed to reload config (keeping old config): {:#}", e);
                        return;
                    },
                };
                {
                    let mut last = last_sent.lock();
                    if *last == new_config {
                        debug!("Config file saved without changes");
                        return;
                    }
                    *last = new_config.clone();
                }
                info!("🔄 Configuration reloaded");
                if let Err(e) = tx.send(new_config).await {
                    error!("Failed to send config update: {}", e);
                }
            });
        })?;

        watcher
            .watch(Path::new(&config_path), RecursiveMode::NonRecursive)
            .with_context(|| format!("Failed to watch config file: {}", config_path))?;

        info!("Config file watcher started for: {}", config_path);

        Ok((
            Self {
                _watcher: watcher,
                rx,
            },
            initial_config,
        ))
    }

    /// Wait for the next config update
    /// Returns None if the watcher has been closed
    pub async fn next_config(&mut self) -> Option<AppConfig> {
        self.rx.recv().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_config_watcher_reloads_changes() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let config_path = temp_dir.path().join("config.yaml");

        fs::write(
            &config_path,
            "device:\n  host: \"10.0.0.1\"\n  token: \"first\"\n",
        )?;

        let (mut watcher, config) =
            ConfigWatcher::new(config_path.to_string_lossy().to_string()).await?;
        assert_eq!(config.device.token, "first");

        tokio::time::sleep(Duration::from_millis(100)).await;
        fs::write(
            &config_path,
            "device:\n  host: \"10.0.0.1\"\n  token: \"second\"\nmetering:\n  interval_ms: 1000\n",
        )?;

        let new_config =
            tokio::time::timeout(Duration::from_secs(2), watcher.next_config()).await?;

        if let Some(new_config) = new_config {
            assert_eq!(new_config.device.token, "second");
            assert_eq!(new_config.metering.interval_ms, 1000);
        }

        Ok(())
    }

    #[tokio::test]
    async fn test_invalid_initial_config_is_rejected() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let config_path = temp_dir.path().join("config.yaml");
        fs::write(&config_path, "device:\n  host: \"10.0.0.1\"\n  token: \"\"\n")?;

        let result = ConfigWatcher::new(config_path.to_string_lossy().to_string()).await;
        assert!(result.is_err());
        Ok(())
    }
}
