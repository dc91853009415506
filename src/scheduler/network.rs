//! Network reachability checks used before dispatch.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::net::TcpStream;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, info};

/// Interval between background reachability probes.
pub const DEFAULT_PROBE_INTERVAL: Duration = Duration::from_secs(15);

/// Connect timeout for a single probe.
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(3);

/// Answers "is the network up?" without blocking.
pub trait NetworkProbe: Send + Sync + fmt::Debug {
    fn is_reachable(&self) -> bool;
}

/// Always reports the network as reachable.
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysOnline;

impl NetworkProbe for AlwaysOnline {
    fn is_reachable(&self) -> bool {
        true
    }
}

/// Reachability flag set by something else (a monitor, a test, the OS).
#[derive(Debug)]
pub struct ConnectivityFlag {
    online: AtomicBool,
}

impl Default for ConnectivityFlag {
    fn default() -> Self {
        Self::new(true)
    }
}

impl ConnectivityFlag {
    #[must_use]
    pub fn new(online: bool) -> Self {
        Self {
            online: AtomicBool::new(online),
        }
    }

    pub fn set_online(&self, online: bool) {
        let previous = self.online.swap(online, Ordering::SeqCst);
        if previous != online {
            info!(online, "network reachability changed");
        }
    }
}

impl NetworkProbe for ConnectivityFlag {
    fn is_reachable(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }
}

/// Periodically connects to `host:port` and records whether it succeeded.
///
/// The first probe completes before [`TcpProbe::start`] returns. The monitor
/// stops when the probe is dropped.
#[derive(Debug)]
pub struct TcpProbe {
    address: String,
    flag: Arc<ConnectivityFlag>,
    _monitor: DropGuard,
}

impl TcpProbe {
    /// Probes `address` now and then every `interval`.
    pub async fn start(address: impl Into<String>, interval: Duration, timeout: Duration) -> Self {
        let address = address.into();
        let flag = Arc::new(ConnectivityFlag::new(
            probe_once(&address, timeout).await,
        ));
        let token = CancellationToken::new();

        let monitor_flag = Arc::clone(&flag);
        let monitor_address = address.clone();
        let monitor_token = token.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                tokio::select! {
                    () = monitor_token.cancelled() => break,
                    _ = ticker.tick() => {
                        monitor_flag.set_online(probe_once(&monitor_address, timeout).await);
                    }
                }
            }
            debug!(address = %monitor_address, "reachability monitor stopped");
        });

        Self {
            address,
            flag,
            _monitor: token.drop_guard(),
        }
    }

    #[must_use]
    pub fn address(&self) -> &str {
        &self.address
    }
}

impl NetworkProbe for TcpProbe {
    fn is_reachable(&self) -> bool {
        self.flag.is_reachable()
    }
}

async fn probe_once(address: &str, timeout: Duration) -> bool {
    match tokio::time::timeout(timeout, TcpStream::connect(address)).await {
        Ok(Ok(_)) => true,
        Ok(Err(error)) => {
            debug!(address, error = %error, "reachability probe failed");
            false
        }
        Err(_) => {
            debug!(address, "reachability probe timed out");
            false
        }
    }
}
