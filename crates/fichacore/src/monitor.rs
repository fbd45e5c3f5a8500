//! # Resource Monitor and Degraded Mode
//!
//! A periodic check reads aggregate usage (memory pressure and the number of
//! photos held across open fichas) and escalates to *degraded mode* when
//! either crosses its ceiling:
//!
//! - status is [`ResourceStatus::Critical`], or
//! - held photos reach the degraded threshold (2000 by default).
//!
//! [`DegradedMode`] is a shared flag. The monitor sets it; the facade (and
//! any importer or designer) reads it and refuses new heavy work. Nothing
//! clears it automatically: [`DegradedMode::reset`] is a manual action.
//!
//! The monitor only reads atomics through a [`ResourceProbe`]. It never
//! touches a ficha or the resource store.
//!
//! Memory is not measured here. The host pushes readings into
//! [`UsageCounters::set_memory`] (through `FichaApi::report_memory`); until it
//! does, the status reads as normal.

use crate::limits::ResourceLimits;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, info, warn};

pub const DEFAULT_CHECK_INTERVAL: Duration = Duration::from_secs(5);

const ELEVATED_RATIO: f64 = 0.7;
const CRITICAL_RATIO: f64 = 0.9;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceStatus {
    Normal,
    Elevated,
    Critical,
}

/// Memory usage as reported by the host environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemorySignal {
    pub used_bytes: u64,
    /// Zero when the host does not report a limit.
    pub limit_bytes: u64,
}

impl MemorySignal {
    pub fn status(&self) -> ResourceStatus {
        if self.limit_bytes == 0 {
            return ResourceStatus::Normal;
        }
        let ratio = self.used_bytes as f64 / self.limit_bytes as f64;
        if ratio >= CRITICAL_RATIO {
            ResourceStatus::Critical
        } else if ratio >= ELEVATED_RATIO {
            ResourceStatus::Elevated
        } else {
            ResourceStatus::Normal
        }
    }
}

/// Source of the aggregate readings the monitor acts on.
pub trait ResourceProbe: Send + 'static {
    fn resource_status(&self) -> ResourceStatus;
    fn photo_count(&self) -> usize;
}

/// Shared counters updated by the owning context and read by the monitor.
#[derive(Debug, Clone, Default)]
pub struct UsageCounters {
    photos: Arc<AtomicUsize>,
    used_bytes: Arc<AtomicU64>,
    limit_bytes: Arc<AtomicU64>,
}

impl UsageCounters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_photo_count(&self, count: usize) {
        self.photos.store(count, Ordering::Relaxed);
    }

    pub fn photos(&self) -> usize {
        self.photos.load(Ordering::Relaxed)
    }

    pub fn set_memory(&self, signal: MemorySignal) {
        self.used_bytes.store(signal.used_bytes, Ordering::Relaxed);
        self.limit_bytes.store(signal.limit_bytes, Ordering::Relaxed);
    }

    pub fn memory(&self) -> MemorySignal {
        MemorySignal {
            used_bytes: self.used_bytes.load(Ordering::Relaxed),
            limit_bytes: self.limit_bytes.load(Ordering::Relaxed),
        }
    }
}

impl ResourceProbe for UsageCounters {
    fn resource_status(&self) -> ResourceStatus {
        self.memory().status()
    }

    fn photo_count(&self) -> usize {
        self.photos()
    }
}

#[derive(Debug, Clone, Default)]
pub struct DegradedMode(Arc<AtomicBool>);

impl DegradedMode {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_active(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Returns true if this call switched degraded mode on.
    pub fn enter(&self) -> bool {
        !self.0.swap(true, Ordering::SeqCst)
    }

    /// Manual exit. There is no automatic one.
    pub fn reset(&self) {
        if self.0.swap(false, Ordering::SeqCst) {
            info!("degraded mode reset");
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MonitorReading {
    pub status: ResourceStatus,
    pub photo_count: usize,
    pub degraded: bool,
    /// True only on the check that switched degraded mode on.
    pub escalated: bool,
}

type Notifier = Box<dyn Fn(&str) + Send>;

pub struct ResourceMonitor<P: ResourceProbe> {
    probe: P,
    degraded: DegradedMode,
    limits: ResourceLimits,
    notifier: Option<Notifier>,
}

impl<P: ResourceProbe> ResourceMonitor<P> {
    pub fn new(probe: P, degraded: DegradedMode) -> Self {
        Self {
            probe,
            degraded,
            limits: ResourceLimits::default(),
            notifier: None,
        }
    }

    pub fn with_limits(mut self, limits: ResourceLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Callback for the user-visible warning shown when degraded mode starts.
    pub fn with_notifier(mut self, notifier: impl Fn(&str) + Send + 'static) -> Self {
        self.notifier = Some(Box::new(notifier));
        self
    }

    pub fn check(&self) -> MonitorReading {
        let status = self.probe.resource_status();
        let photo_count = self.probe.photo_count();
        let over_photos = self.limits.should_enter_degraded_mode(photo_count);

        let mut escalated = false;
        if status == ResourceStatus::Critical || over_photos {
            escalated = self.degraded.enter();
            if escalated {
                let message = if status == ResourceStatus::Critical {
                    "Memory is critically low; heavy operations are disabled".to_string()
                } else {
                    format!(
                        "{} photos loaded; heavy operations are disabled",
                        photo_count
                    )
                };
                warn!(?status, photo_count, "entering degraded mode");
                if let Some(notify) = &self.notifier {
                    notify(&message);
                }
            }
        } else {
            debug!(?status, photo_count, "resource check ok");
        }

        MonitorReading {
            status,
            photo_count,
            degraded: self.degraded.is_active(),
            escalated,
        }
    }

    /// Run [`check`](Self::check) every `interval` on a dedicated thread.
    pub fn spawn(self, interval: Duration) -> MonitorHandle {
        let (stop_tx, stop_rx) = mpsc::channel::<()>();
        let join = thread::spawn(move || loop {
            match stop_rx.recv_timeout(interval) {
                Err(RecvTimeoutError::Timeout) => {
                    self.check();
                }
                Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
            }
        });
        MonitorHandle {
            stop_tx: Some(stop_tx),
            join: Some(join),
        }
    }
}

/// Owner of a running monitor thread. Dropping it stops the thread.
pub struct MonitorHandle {
    stop_tx: Option<mpsc::Sender<()>>,
    join: Option<JoinHandle<()>>,
}

impl MonitorHandle {
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(());
        }
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }
}

impl Drop for MonitorHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}
