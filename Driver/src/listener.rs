// Listener loop: drives decode -> resolve -> classify -> deliver over the
// subscription's byte stream until it ends, faults, or is cancelled.

use crate::classify::{classify, ChangeEvent, PathFilter};
use crate::error::{DriverError, DriverResult};
use crate::mask::FanMask;
use crate::record::{Decoded, RecordReader, METADATA_LEN};
use crate::resolve::{FileIdentity, HandleResolver, HANDLE_OFFSET, MAX_HANDLE_SZ};
use log::{debug, error, info, warn};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::io::Read;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::SyncSender;
use std::sync::Arc;

#[cfg(target_os = "linux")]
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};

// ============================================================================
// Configuration
// ============================================================================

/// Listener configuration
#[derive(Debug, Clone)]
pub struct ListenerConfig {
    /// Directory whose filesystem is watched
    pub root: PathBuf,

    /// Capacity of the hand-off queue to the consumer
    pub queue_capacity: usize,

    /// Size of the buffer the subscription is read through
    pub read_buffer_size: usize,
}

/// The kernel fails a read with EINVAL when the buffer cannot hold the next
/// record, so the read buffer never drops below the largest identity record.
pub const MIN_READ_BUFFER: usize = METADATA_LEN + HANDLE_OFFSET + MAX_HANDLE_SZ;

impl ListenerConfig {
    /// Read buffer size actually used, raised to `MIN_READ_BUFFER`.
    pub fn effective_read_buffer(&self) -> usize {
        self.read_buffer_size.max(MIN_READ_BUFFER)
    }
}

impl Default for ListenerConfig {
    fn default() -> Self {
        ListenerConfig {
            root: PathBuf::from("/"),
            queue_capacity: 1024,
            read_buffer_size: 8192,
        }
    }
}

// ============================================================================
// State & Statistics
// ============================================================================

/// Lifecycle of a listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ListenerState {
    Uninitialized,
    Subscribed,
    Running,
    Terminated,
    Faulted,
}

#[derive(Debug, Default)]
pub struct ListenerStats {
    records: AtomicU64,
    skipped: AtomicU64,
    delivered: AtomicU64,
    dropped: AtomicU64,
    failures: AtomicU64,
    overflows: AtomicU64,
}

impl ListenerStats {
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            records: self.records.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            overflows: self.overflows.load(Ordering::Relaxed),
        }
    }

    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Point-in-time copy of the listener counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    /// Records decoded from the stream
    pub records: u64,
    /// Records without a file identity
    pub skipped: u64,
    /// Events handed to the consumer
    pub delivered: u64,
    /// Events excluded by the filter or carrying no change
    pub dropped: u64,
    /// Per-event decode and resolution errors
    pub failures: u64,
    /// Kernel queue overflow notifications
    pub overflows: u64,
}

/// Listener status information
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListenerStatus {
    pub state: ListenerState,
    pub root: PathBuf,
    pub stats: StatsSnapshot,
}

// ============================================================================
// Shutdown Signal
// ============================================================================

struct ShutdownInner {
    exit: AtomicBool,
    #[cfg(target_os = "linux")]
    wake: Option<OwnedFd>,
}

/// Cancellation signal shared between the listener and whoever stops it.
///
/// On Linux it also owns an eventfd that the event source polls, so a
/// blocked read returns as soon as `stop` is called.
#[derive(Clone)]
pub struct ShutdownHandle {
    inner: Arc<ShutdownInner>,
}

impl ShutdownHandle {
    pub fn new() -> Self {
        ShutdownHandle {
            inner: Arc::new(ShutdownInner {
                exit: AtomicBool::new(false),
                #[cfg(target_os = "linux")]
                wake: open_eventfd(),
            }),
        }
    }

    /// Signal the listener to stop
    pub fn stop(&self) {
        self.inner.exit.store(true, Ordering::SeqCst);
        self.wake();
    }

    pub fn is_stopped(&self) -> bool {
        self.inner.exit.load(Ordering::SeqCst)
    }

    #[cfg(target_os = "linux")]
    fn wake(&self) {
        let Some(fd) = &self.inner.wake else {
            return;
        };
        let one: u64 = 1;
        let ret = unsafe {
            libc::write(
                fd.as_raw_fd(),
                &one as *const u64 as *const libc::c_void,
                std::mem::size_of::<u64>(),
            )
        };
        if ret < 0 {
            warn!("Couldn't wake listener: {}", std::io::Error::last_os_error());
        }
    }

    #[cfg(not(target_os = "linux"))]
    fn wake(&self) {}

    #[cfg(target_os = "linux")]
    pub(crate) fn wake_fd(&self) -> Option<RawFd> {
        self.inner.wake.as_ref().map(|fd| fd.as_raw_fd())
    }
}

impl Default for ShutdownHandle {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(target_os = "linux")]
fn open_eventfd() -> Option<OwnedFd> {
    let fd = unsafe { libc::eventfd(0, libc::EFD_CLOEXEC | libc::EFD_NONBLOCK) };
    if fd < 0 {
        warn!(
            "eventfd unavailable, falling back to timed polling: {}",
            std::io::Error::last_os_error()
        );
        return None;
    }
    // SAFETY: `fd` is a fresh descriptor returned by eventfd(2).
    Some(unsafe { OwnedFd::from_raw_fd(fd) })
}

// ============================================================================
// Listener
// ============================================================================

pub struct Listener {
    config: ListenerConfig,
    shutdown: ShutdownHandle,
    state: Arc<RwLock<ListenerState>>,
    stats: Arc<ListenerStats>,
}

impl Listener {
    pub fn new(config: ListenerConfig) -> Self {
        Listener {
            config,
            shutdown: ShutdownHandle::new(),
            state: Arc::new(RwLock::new(ListenerState::Uninitialized)),
            stats: Arc::new(ListenerStats::default()),
        }
    }

    pub fn config(&self) -> &ListenerConfig {
        &self.config
    }

    /// Handle that stops this listener from another thread.
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.shutdown.clone()
    }

    pub fn state(&self) -> ListenerState {
        *self.state.read()
    }

    pub fn status(&self) -> ListenerStatus {
        ListenerStatus {
            state: self.state(),
            root: self.config.root.clone(),
            stats: self.stats.snapshot(),
        }
    }

    /// Subscribe to the filesystem containing the configured root and
    /// deliver changes to `sender` until the stream ends or `stop` is
    /// called.
    ///
    /// Setup failures return immediately; the loop never starts.
    #[cfg(target_os = "linux")]
    pub fn listen<P>(&self, filter: &P, sender: &SyncSender<ChangeEvent>) -> DriverResult<()>
    where
        P: PathFilter + ?Sized,
    {
        use crate::fanotify::Subscription;
        use crate::mask::SUBSCRIPTION_MASK;
        use crate::resolve::ProcFdResolver;
        use std::io::BufReader;

        let root = &self.config.root;
        info!("Subscribing to filesystem events under {}", root.display());

        let setup = Subscription::open(root, SUBSCRIPTION_MASK)
            .and_then(|subscription| Ok((subscription, ProcFdResolver::new(root)?)));
        let (subscription, resolver) = match setup {
            Ok(parts) => parts,
            Err(e) => {
                error!("Couldn't subscribe to {}: {}", root.display(), e);
                self.set_state(ListenerState::Faulted);
                return Err(e);
            }
        };
        self.set_state(ListenerState::Subscribed);
        info!(
            "Subscribed to the filesystem containing {}",
            subscription.root().display()
        );

        let buffer_size = self.config.effective_read_buffer();
        if buffer_size != self.config.read_buffer_size {
            warn!(
                "Read buffer of {} bytes is too small, using {}",
                self.config.read_buffer_size, buffer_size
            );
        }

        info!("Starting to listen on fanotify events");
        let source = BufReader::with_capacity(
            buffer_size,
            subscription.into_source(self.shutdown.clone()),
        );
        self.run(source, &resolver, filter, sender)
    }

    /// Drive the pipeline over an already open byte stream.
    ///
    /// Per-event errors are logged and skipped. A closed stream, a stop
    /// request or a departed consumer ends the loop with `Ok`; an error
    /// that leaves the stream unframed ends it with that error.
    pub fn run<R, H, P>(
        &self,
        source: R,
        resolver: &H,
        filter: &P,
        sender: &SyncSender<ChangeEvent>,
    ) -> DriverResult<()>
    where
        R: Read,
        H: HandleResolver + ?Sized,
        P: PathFilter + ?Sized,
    {
        self.set_state(ListenerState::Running);
        let mut records = RecordReader::new(source);

        let outcome = loop {
            if self.shutdown.is_stopped() {
                info!("Stop requested, leaving event loop");
                break Ok(());
            }

            match self.step(&mut records, resolver, filter, sender) {
                Ok(()) => {}
                Err(DriverError::StreamClosed) => {
                    info!("Event stream closed");
                    break Ok(());
                }
                Err(DriverError::ConsumerGone) => {
                    info!("Change consumer went away, leaving event loop");
                    break Ok(());
                }
                Err(e) if e.is_fatal() => {
                    error!("Event stream unusable, stopping: {}", e);
                    break Err(e);
                }
                Err(e) => {
                    ListenerStats::bump(&self.stats.failures);
                    warn!("Skipping event: {}", e);
                }
            }
        };

        let final_state = if outcome.is_ok() {
            ListenerState::Terminated
        } else {
            ListenerState::Faulted
        };
        self.set_state(final_state);
        debug!("Listener finished: {:?}", self.stats.snapshot());

        outcome
    }

    /// One decode -> resolve -> classify -> deliver pass.
    fn step<R, H, P>(
        &self,
        records: &mut RecordReader<R>,
        resolver: &H,
        filter: &P,
        sender: &SyncSender<ChangeEvent>,
    ) -> DriverResult<()>
    where
        R: Read,
        H: HandleResolver + ?Sized,
        P: PathFilter + ?Sized,
    {
        let decoded = records.read_record()?;
        ListenerStats::bump(&self.stats.records);

        let event = match decoded {
            Decoded::Event(event) => event,
            Decoded::Skipped { mask, info_type } => {
                ListenerStats::bump(&self.stats.skipped);
                if mask & FanMask::Q_OVERFLOW.bits() != 0 {
                    ListenerStats::bump(&self.stats.overflows);
                    warn!("Kernel event queue overflowed; changes were lost");
                } else {
                    debug!(
                        "Skipping record without file identity (info type {:?}, flags: {})",
                        info_type,
                        FanMask::describe(mask)
                    );
                }
                return Ok(());
            }
        };

        let identity = FileIdentity::parse(&event.info)?;
        let path = resolver.resolve(&identity)?;

        debug!(
            "Received event, path: {}, pid: {}, flags: {}",
            path.display(),
            event.pid,
            FanMask::describe(event.mask)
        );

        match classify(event.mask, path, filter) {
            Some(change) => {
                sender.send(change).map_err(|_| DriverError::ConsumerGone)?;
                ListenerStats::bump(&self.stats.delivered);
            }
            None => ListenerStats::bump(&self.stats.dropped),
        }

        Ok(())
    }

    fn set_state(&self, state: ListenerState) {
        *self.state.write() = state;
    }
}
