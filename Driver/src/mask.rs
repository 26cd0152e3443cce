//! Kernel event mask bits.
//!
//! The values mirror `<linux/fanotify.h>`. They are spelled out here rather
//! than taken from `libc` so the decoder and classifier build on every
//! platform and can be exercised against synthetic streams.

use bitflags::bitflags;

bitflags! {
    /// Event bits carried in a record's 64-bit mask.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct FanMask: u64 {
        const ACCESS         = 0x0000_0001;
        const MODIFY         = 0x0000_0002;
        const ATTRIB         = 0x0000_0004;
        const CLOSE_WRITE    = 0x0000_0008;
        const CLOSE_NOWRITE  = 0x0000_0010;
        const OPEN           = 0x0000_0020;
        const MOVED_FROM     = 0x0000_0040;
        const MOVED_TO       = 0x0000_0080;
        const CREATE         = 0x0000_0100;
        const DELETE         = 0x0000_0200;
        const DELETE_SELF    = 0x0000_0400;
        const MOVE_SELF      = 0x0000_0800;
        const OPEN_EXEC      = 0x0000_1000;
        const Q_OVERFLOW     = 0x0000_4000;
        const FS_ERROR       = 0x0000_8000;
        const OPEN_PERM      = 0x0001_0000;
        const ACCESS_PERM    = 0x0002_0000;
        const OPEN_EXEC_PERM = 0x0004_0000;
        const EVENT_ON_CHILD = 0x0800_0000;
        const RENAME         = 0x1000_0000;
        const ONDIR          = 0x4000_0000;
    }
}

/// Events registered on the watched filesystem.
pub const SUBSCRIPTION_MASK: FanMask = FanMask::ONDIR
    .union(FanMask::MOVED_FROM)
    .union(FanMask::MOVED_TO)
    .union(FanMask::CREATE)
    .union(FanMask::DELETE)
    .union(FanMask::MODIFY)
    .union(FanMask::ATTRIB)
    .union(FanMask::CLOSE_WRITE)
    .union(FanMask::EVENT_ON_CHILD);

const NAMES: &[(FanMask, &str)] = &[
    (FanMask::ACCESS, "FAN_ACCESS"),
    (FanMask::MODIFY, "FAN_MODIFY"),
    (FanMask::ATTRIB, "FAN_ATTRIB"),
    (FanMask::CLOSE_WRITE, "FAN_CLOSE_WRITE"),
    (FanMask::CLOSE_NOWRITE, "FAN_CLOSE_NOWRITE"),
    (FanMask::OPEN, "FAN_OPEN"),
    (FanMask::MOVED_FROM, "FAN_MOVED_FROM"),
    (FanMask::MOVED_TO, "FAN_MOVED_TO"),
    (FanMask::CREATE, "FAN_CREATE"),
    (FanMask::DELETE, "FAN_DELETE"),
    (FanMask::DELETE_SELF, "FAN_DELETE_SELF"),
    (FanMask::MOVE_SELF, "FAN_MOVE_SELF"),
    (FanMask::OPEN_EXEC, "FAN_OPEN_EXEC"),
    (FanMask::Q_OVERFLOW, "FAN_Q_OVERFLOW"),
    (FanMask::FS_ERROR, "FAN_FS_ERROR"),
    (FanMask::OPEN_PERM, "FAN_OPEN_PERM"),
    (FanMask::ACCESS_PERM, "FAN_ACCESS_PERM"),
    (FanMask::OPEN_EXEC_PERM, "FAN_OPEN_EXEC_PERM"),
    (FanMask::EVENT_ON_CHILD, "FAN_EVENT_ON_CHILD"),
    (FanMask::RENAME, "FAN_RENAME"),
    (FanMask::ONDIR, "FAN_ONDIR"),
];

impl FanMask {
    /// Render the set bits as a comma-separated list of kernel names.
    /// Unknown bits are appended in hex so nothing is lost from the log line.
    pub fn describe(raw: u64) -> String {
        let mut flags: Vec<String> = NAMES
            .iter()
            .filter(|(bit, _)| raw & bit.bits() != 0)
            .map(|(_, name)| (*name).to_string())
            .collect();

        let unknown = raw & !FanMask::all().bits();
        if unknown != 0 {
            flags.push(format!("{:#x}", unknown));
        }

        flags.join(", ")
    }
}
