// fanwatch-driver: filesystem change notifications from the Linux fanotify API
// Decodes the kernel's binary event records and resolves file identities to paths

pub mod classify;
pub mod error;
pub mod listener;
pub mod mask;
pub mod record;
pub mod resolve;
#[cfg(target_os = "linux")]
pub mod fanotify;

pub use classify::{classify, ChangeEvent, ChangeType, PathFilter};
pub use error::{DriverError, DriverResult};
pub use listener::{
    Listener, ListenerConfig, ListenerState, ListenerStatus, ShutdownHandle, StatsSnapshot,
};
pub use mask::{FanMask, SUBSCRIPTION_MASK};
pub use record::{Decoded, RawEvent, RecordBuilder, RecordReader};
pub use resolve::{FileIdentity, HandleResolver};

#[cfg(target_os = "linux")]
pub use resolve::ProcFdResolver;

/// Driver version
pub const DRIVER_VERSION: &str = env!("CARGO_PKG_VERSION");
