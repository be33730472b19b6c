//! Network availability: a probe and a polling monitor that reports changes.

use crate::config::NetworkConfig;
use std::fs;
use std::io;
use std::net::{TcpStream, ToSocketAddrs};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, info};

/// Where Linux lists network interfaces.
const SYSFS_NET: &str = "/sys/class/net";

/// Decides whether the network is currently usable.
#[derive(Debug, Clone)]
pub struct NetworkProbe {
    check_host: Option<String>,
    connect_timeout: Duration,
}

impl NetworkProbe {
    /// Probe that checks `check_host` when set, otherwise local interfaces.
    #[must_use]
    pub fn new(check_host: Option<String>, connect_timeout: Duration) -> Self {
        Self {
            check_host,
            connect_timeout,
        }
    }

    /// Probe configured from the `[network]` section.
    #[must_use]
    pub fn from_config(config: &NetworkConfig) -> Self {
        Self::new(config.check_host.clone(), config.connect_timeout)
    }

    /// Current availability.
    #[must_use]
    pub fn is_available(&self) -> bool {
        match &self.check_host {
            Some(host) => self.can_connect(host),
            None => interfaces_up(Path::new(SYSFS_NET)),
        }
    }

    fn can_connect(&self, host: &str) -> bool {
        let addrs = match host.to_socket_addrs() {
            Ok(addrs) => addrs,
            Err(e) => {
                debug!(host, error = %e, "name resolution failed");
                return false;
            }
        };
        addrs
            .into_iter()
            .any(|addr| TcpStream::connect_timeout(&addr, self.connect_timeout).is_ok())
    }
}

/// True when any non-loopback interface under `sysfs_net` reports `up`.
/// Platforms without that directory are assumed to be online.
#[must_use]
pub fn interfaces_up(sysfs_net: &Path) -> bool {
    let Ok(entries) = fs::read_dir(sysfs_net) else {
        return true;
    };
    entries.flatten().any(|entry| {
        entry.file_name() != "lo"
            && fs::read_to_string(entry.path().join("operstate"))
                .is_ok_and(|state| state.trim() == "up")
    })
}

/// Background thread polling a probe and reporting transitions.
#[derive(Debug)]
pub struct NetworkMonitor {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl NetworkMonitor {
    /// Starts polling every `interval`. `on_change` is called with the new
    /// value whenever it differs from the last one seen, starting from
    /// `initial`.
    ///
    /// # Errors
    ///
    /// Returns an error if the polling thread cannot be spawned.
    pub fn start<F>(probe: NetworkProbe, interval: Duration, initial: bool, on_change: F) -> io::Result<Self>
    where
        F: Fn(bool) + Send + 'static,
    {
        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = Arc::clone(&stop);
        let handle = thread::Builder::new()
            .name("autosync-network".to_string())
            .spawn(move || {
                let mut last = initial;
                while !stop_flag.load(Ordering::Relaxed) {
                    thread::sleep(interval);
                    let now = probe.is_available();
                    if now != last {
                        info!(available = now, "network availability changed");
                        last = now;
                        on_change(now);
                    }
                }
            })?;
        Ok(Self {
            stop,
            handle: Some(handle),
        })
    }

    /// Asks the thread to stop after its current sleep and waits for it.
    pub fn stop(mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for NetworkMonitor {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;
    use std::sync::mpsc;
    use tempfile::TempDir;

    fn fake_interface(root: &Path, name: &str, state: &str) {
        let dir = root.join(name);
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("operstate"), format!("{state}\n")).unwrap();
    }

    #[test]
    fn test_loopback_alone_is_offline() {
        let temp = TempDir::new().unwrap();
        fake_interface(temp.path(), "lo", "unknown");
        fake_interface(temp.path(), "eth0", "down");
        assert!(!interfaces_up(temp.path()));
    }

    #[test]
    fn test_any_up_interface_is_online() {
        let temp = TempDir::new().unwrap();
        fake_interface(temp.path(), "lo", "unknown");
        fake_interface(temp.path(), "wlan0", "up");
        assert!(interfaces_up(temp.path()));
    }

    #[test]
    fn test_missing_sysfs_assumes_online() {
        let temp = TempDir::new().unwrap();
        assert!(interfaces_up(&temp.path().join("absent")));
    }

    #[test]
    fn test_check_host_connects() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let probe = NetworkProbe::new(Some(addr.to_string()), Duration::from_secs(1));
        assert!(probe.is_available());

        drop(listener);
        let unresolvable = NetworkProbe::new(Some("no-such-host.invalid:1".to_string()), Duration::from_millis(100));
        assert!(!unresolvable.is_available());
    }

    #[test]
    fn test_monitor_reports_only_changes() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let probe = NetworkProbe::new(Some(addr.to_string()), Duration::from_secs(1));

        let (tx, rx) = mpsc::channel();
        // starts believing the network is down, so the first poll is a change
        let monitor = NetworkMonitor::start(probe, Duration::from_millis(20), false, move |up| {
            let _ = tx.send(up);
        })
        .unwrap();

        assert!(rx.recv_timeout(Duration::from_secs(5)).unwrap());
        assert!(rx.recv_timeout(Duration::from_millis(150)).is_err());
        monitor.stop();
    }
}
