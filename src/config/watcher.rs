//! Configuration file watcher for hot reload.
//!
//! Only the target list is applied live. Changes to other balancer
//! options are logged and take effect on the next restart.

use crate::config::{BalancerConfig, Config, load_config};
use notify::{Event, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info, warn};

/// Called with the reloaded configuration whenever its target list changed.
pub type ReloadCallback = Box<dyn Fn(&Config) + Send + Sync>;

/// Configuration file watcher.
pub struct ConfigWatcher {
    /// Path to the config file.
    config_path: PathBuf,
    /// Last configuration successfully loaded.
    current: Config,
    /// Callback to invoke when config is reloaded.
    reload_callback: ReloadCallback,
}

impl ConfigWatcher {
    /// Create a new config watcher starting from the already loaded `current`.
    pub fn new(config_path: PathBuf, current: Config, reload_callback: ReloadCallback) -> Self {
        Self {
            config_path,
            current,
            reload_callback,
        }
    }

    /// Get the path being watched.
    pub fn path(&self) -> &Path {
        &self.config_path
    }

    /// Run the config watcher.
    ///
    /// Reloads on changes to the config file and, on Unix, on SIGHUP.
    pub async fn run(mut self, mut shutdown: broadcast::Receiver<()>) {
        info!(path = %self.config_path.display(), "config watcher starting");

        let (tx, mut rx) = mpsc::unbounded_channel();

        let watcher_result: Result<RecommendedWatcher, _> = Watcher::new(
            move |res: Result<Event, notify::Error>| {
                if let Ok(event) = res {
                    let _ = tx.send(event);
                }
            },
            notify::Config::default().with_poll_interval(Duration::from_secs(2)),
        );

        let mut watcher = match watcher_result {
            Ok(w) => Some(w),
            Err(e) => {
                error!(error = %e, "failed to create file watcher, reload on SIGHUP only");
                None
            }
        };

        // Watch the parent directory so editors that replace the file are seen.
        if let (Some(w), Some(parent)) = (watcher.as_mut(), self.config_path.parent()) {
            let parent = if parent.as_os_str().is_empty() {
                Path::new(".")
            } else {
                parent
            };
            if let Err(e) = w.watch(parent, RecursiveMode::NonRecursive) {
                error!(error = %e, "failed to watch config directory, reload on SIGHUP only");
            }
        }

        let mut hangup = HangupListener::new();

        info!("config watcher ready");

        loop {
            tokio::select! {
                Some(event) = rx.recv() => {
                    if touches_config(&self.config_path, &event) {
                        // Editors often emit several events per save.
                        tokio::time::sleep(Duration::from_millis(100)).await;
                        while rx.try_recv().is_ok() {}
                        self.try_reload();
                    }
                }

                () = hangup.recv() => {
                    info!("SIGHUP received, reloading configuration");
                    self.try_reload();
                }

                _ = shutdown.recv() => {
                    debug!("config watcher stopping");
                    break;
                }
            }
        }

        drop(watcher);
    }

    /// Try to reload the configuration.
    fn try_reload(&mut self) {
        info!(path = %self.config_path.display(), "attempting config reload");

        let new_config = match load_config(&self.config_path) {
            Ok(config) => config,
            Err(e) => {
                error!(error = %e, "failed to load new config, keeping current");
                return;
            }
        };

        let ignored = restart_required(&self.current.balancer, &new_config.balancer);
        if !ignored.is_empty() {
            warn!(
                options = %ignored.join(", "),
                "changed options take effect after restart"
            );
        }

        // Replacing the pool reactivates every target.
        if new_config.balancer.targets == self.current.balancer.targets {
            info!("configuration reloaded, target list unchanged");
        } else {
            info!(
                targets = new_config.balancer.targets.len(),
                "configuration reloaded with new targets"
            );
            (self.reload_callback)(&new_config);
        }
        self.current = new_config;
    }
}

/// Whether a file system event created or modified the config file.
fn touches_config(config_path: &Path, event: &Event) -> bool {
    use notify::EventKind;

    matches!(event.kind, EventKind::Create(_) | EventKind::Modify(_))
        && event
            .paths
            .iter()
            .any(|p| p.file_name() == config_path.file_name())
}

/// SIGHUP as a stream of reload requests. Never fires where unsupported.
struct HangupListener {
    #[cfg(unix)]
    signal: Option<tokio::signal::unix::Signal>,
}

impl HangupListener {
    fn new() -> Self {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{SignalKind, signal};
            let signal = signal(SignalKind::hangup())
                .map_err(|e| warn!(error = %e, "SIGHUP reload unavailable"))
                .ok();
            Self { signal }
        }
        #[cfg(not(unix))]
        {
            Self {}
        }
    }

    async fn recv(&mut self) {
        #[cfg(unix)]
        if let Some(signal) = self.signal.as_mut() {
            if signal.recv().await.is_some() {
                return;
            }
        }
        std::future::pending::<()>().await
    }
}

/// Balancer options that differ between `old` and `new` and cannot be
/// applied to a running balancer.
fn restart_required(old: &BalancerConfig, new: &BalancerConfig) -> Vec<&'static str> {
    let mut changed = Vec::new();
    let mut check = |name, differs: bool| {
        if differs {
            changed.push(name);
        }
    };

    check("bind_address", old.bind_address != new.bind_address);
    check("source_port", old.source_port != new.source_port);
    check("stickiness", old.stickiness != new.stickiness);
    check(
        "target_deactivation_duration",
        old.target_deactivation_duration != new.target_deactivation_duration,
    );
    check("session_expiry", old.session_expiry != new.session_expiry);
    check(
        "session_expiry_interval",
        old.session_expiry_interval != new.session_expiry_interval,
    );
    check("max_buffer_size", old.max_buffer_size != new.max_buffer_size);
    check("buffer_overflow", old.buffer_overflow != new.buffer_overflow);
    check("downgrade_to_user", old.downgrade_to_user != new.downgrade_to_user);
    check("shutdown_timeout", old.shutdown_timeout != new.shutdown_timeout);

    changed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::Target;
    use crate::config::{GlobalConfig, parse_config};
    use std::io::Write;
    use std::sync::{Arc, Mutex};

    fn config(targets: Vec<Target>) -> Config {
        Config {
            global: GlobalConfig::default(),
            balancer: BalancerConfig {
                targets,
                ..BalancerConfig::default()
            },
            admission: None,
        }
    }

    fn event(kind: notify::EventKind, path: &str) -> Event {
        Event {
            kind,
            paths: vec![PathBuf::from(path)],
            attrs: Default::default(),
        }
    }

    #[test]
    fn test_config_events() {
        use notify::EventKind;
        use notify::event::{CreateKind, DataChange, ModifyKind, RemoveKind};

        let path = Path::new("/etc/sessionlb/config.yaml");
        let modify = || EventKind::Modify(ModifyKind::Data(DataChange::Content));

        assert!(touches_config(path, &event(modify(), "/etc/sessionlb/config.yaml")));
        assert!(touches_config(
            path,
            &event(EventKind::Create(CreateKind::File), "/etc/sessionlb/config.yaml")
        ));
        assert!(!touches_config(path, &event(modify(), "/etc/sessionlb/other.yaml")));
        assert!(!touches_config(
            path,
            &event(EventKind::Remove(RemoveKind::File), "/etc/sessionlb/config.yaml")
        ));
    }

    #[test]
    fn test_restart_required_ignores_targets() {
        let old = BalancerConfig::default();
        let new = BalancerConfig {
            targets: vec![Target::new("localhost", 9000)],
            source_port: 8080,
            stickiness: false,
            ..BalancerConfig::default()
        };
        assert_eq!(restart_required(&old, &new), vec!["source_port", "stickiness"]);
    }

    #[test]
    fn test_try_reload_passes_new_targets() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"balancer:\n  targets:\n    - host: localhost\n      port: 9001\n")
            .unwrap();

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let mut watcher = ConfigWatcher::new(
            file.path().to_path_buf(),
            config(vec![Target::new("localhost", 8001)]),
            Box::new(move |config: &Config| {
                sink.lock().unwrap().extend(config.balancer.targets.clone());
            }),
        );

        watcher.try_reload();
        assert_eq!(*seen.lock().unwrap(), vec![Target::new("localhost", 9001)]);
        assert_eq!(watcher.current.balancer.targets, vec![Target::new("localhost", 9001)]);
    }

    #[test]
    fn test_try_reload_skips_unchanged_targets() {
        let yaml = "balancer:\n  source_port: 8080\n  targets:\n    - host: localhost\n      port: 8001\n";
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(yaml.as_bytes()).unwrap();

        let calls = Arc::new(Mutex::new(0));
        let counter = Arc::clone(&calls);
        let mut watcher = ConfigWatcher::new(
            file.path().to_path_buf(),
            parse_config("balancer:\n  targets:\n    - host: localhost\n      port: 8001\n").unwrap(),
            Box::new(move |_: &Config| *counter.lock().unwrap() += 1),
        );

        watcher.try_reload();
        assert_eq!(*calls.lock().unwrap(), 0);
        assert_eq!(watcher.current.balancer.source_port, 8080);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unchanged_reload_keeps_cooldown() {
        let yaml = "balancer:\n  target_deactivation_duration: 1s\n  targets:\n    - host: localhost\n      port: 8000\n    - host: localhost\n      port: 8100\n";
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(yaml.as_bytes()).unwrap();

        let config = parse_config(yaml).unwrap();
        let balancer = crate::Balancer::new(config.balancer.clone());
        let refusing = Target::new("localhost", 8100);
        balancer.deactivate_target(&refusing);

        let reload_target = balancer.clone();
        let mut watcher = ConfigWatcher::new(
            file.path().to_path_buf(),
            config,
            Box::new(move |config: &Config| {
                reload_target.set_targets(config.balancer.targets.clone());
            }),
        );

        watcher.try_reload();
        assert!(!balancer.is_target_active(&refusing));

        tokio::time::sleep(Duration::from_millis(1000)).await;
        tokio::task::yield_now().await;
        assert!(balancer.is_target_active(&refusing));
    }

    #[test]
    fn test_try_reload_keeps_current_on_invalid_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"balancer:\n  targets: []\n").unwrap();

        let called = Arc::new(Mutex::new(false));
        let flag = Arc::clone(&called);
        let mut watcher = ConfigWatcher::new(
            file.path().to_path_buf(),
            parse_config("balancer:\n  targets:\n    - host: localhost\n      port: 8001\n").unwrap(),
            Box::new(move |_: &Config| *flag.lock().unwrap() = true),
        );

        watcher.try_reload();
        assert!(!*called.lock().unwrap());
        assert_eq!(watcher.current.balancer.targets, vec![Target::new("localhost", 8001)]);
    }
}
