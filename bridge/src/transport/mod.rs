//! Wireless transport contract.
//!
//! The GATT stack (discovery, connect, notifications, characteristic I/O) is
//! an external collaborator; this module defines the contract the bridge
//! programs against, the error classification for it, and the process-wide
//! discovery gate. [`session`] builds the per-device connect/keepalive/
//! reconnect machinery on top.
//!
//! ## Invariants
//! - At most one discovery runs at a time across the whole process; the
//!   underlying stacks reject overlapping scans ([`discovery_gate`]).
//! - Every call takes an explicit timeout; the contract has no blocking
//!   operation without one.
//! - Notification order per device is transport order; a subscription's
//!   channel closing means the link is gone.

pub mod session;

use std::sync::OnceLock;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::{mpsc, Mutex};

/// Standard battery level characteristic; read as benign keepalive traffic.
pub const BATTERY_LEVEL_UUID: &str = "00002a19-0000-1000-8000-00805f9b34fb";

// ── Monotonic clock ───────────────────────────────────────────────────────────

static CLOCK_EPOCH: OnceLock<Instant> = OnceLock::new();

/// Nanoseconds on a process-local monotonic clock. All notification
/// timestamps and T0 arithmetic use this, never wall time.
pub fn monotonic_ns() -> u64 {
    CLOCK_EPOCH.get_or_init(Instant::now).elapsed().as_nanos() as u64
}

// ── Discovery serialization ───────────────────────────────────────────────────

static DISCOVERY_GATE: Mutex<()> = Mutex::const_new(());

/// Process-wide serialize primitive for discovery/connect attempts.
pub async fn discovery_gate() -> tokio::sync::MutexGuard<'static, ()> {
    DISCOVERY_GATE.lock().await
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Error)]
pub enum TransportError {
    /// The stack is mid-operation (e.g. another scan); retry shortly.
    #[error("operation in progress")]
    Busy,
    #[error("operation timed out")]
    Timeout,
    #[error("device not found")]
    NotFound,
    /// Connection-level failure: dropped link, GATT error, adapter fault.
    #[error("link error: {0}")]
    Link(String),
    #[error("unsupported operation: {0}")]
    Unsupported(&'static str),
}

impl TransportError {
    /// Transient errors are retried in place; everything else aborts the
    /// current attempt and falls back to the reconnect loop (which makes
    /// every failure recoverable eventually).
    pub fn is_transient(&self) -> bool {
        matches!(self, TransportError::Busy | TransportError::Timeout | TransportError::NotFound)
    }
}

// ── Wire structs ──────────────────────────────────────────────────────────────

/// One advertisement seen during discovery.
#[derive(Debug, Clone)]
pub struct PeerInfo {
    pub address: String,
    pub name: Option<String>,
    pub rssi: Option<i16>,
}

/// Address-type hint toggled during resolution; the two stacks disagree on
/// the default for dual-mode peripherals.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressTypeHint {
    Public,
    Random,
}

/// One characteristic notification, stamped at delivery.
#[derive(Debug, Clone)]
pub struct Notification {
    pub monotonic_ns: u64,
    pub payload: Vec<u8>,
}

// ── Contract traits ───────────────────────────────────────────────────────────

/// A connected peripheral. Implementations own the platform handle; dropping
/// the device releases it.
#[async_trait]
pub trait GattDevice: Send {
    /// Enable notifications on one characteristic. The returned channel
    /// yields payloads in transport order and closes when the link drops.
    async fn subscribe(&mut self, characteristic: &str) -> Result<mpsc::Receiver<Notification>, TransportError>;

    async fn read(&mut self, characteristic: &str, timeout: Duration) -> Result<Vec<u8>, TransportError>;

    async fn write(
        &mut self,
        characteristic: &str,
        payload: &[u8],
        response: bool,
        timeout: Duration,
    ) -> Result<(), TransportError>;

    /// Graceful close: stop notifications, disconnect, release.
    async fn disconnect(&mut self);
}

/// Entry points into the platform wireless stack. One instance serves every
/// session in the process; implementations must tolerate concurrent calls
/// (the sessions already serialize discovery through [`discovery_gate`]).
#[async_trait]
pub trait GattBackend: Send + Sync + 'static {
    type Device: GattDevice;

    /// Direct connection by address without scanning.
    async fn connect(
        &self,
        adapter: &str,
        address: &str,
        hint: AddressTypeHint,
        timeout: Duration,
    ) -> Result<Self::Device, TransportError>;

    /// Short targeted discovery for one address. `Ok(None)` means the device
    /// did not advertise within the window.
    async fn resolve(
        &self,
        adapter: &str,
        address: &str,
        hint: AddressTypeHint,
        timeout: Duration,
    ) -> Result<Option<PeerInfo>, TransportError>;

    /// Full passive discovery on one adapter.
    async fn discover(&self, adapter: &str, timeout: Duration) -> Result<Vec<PeerInfo>, TransportError>;
}
