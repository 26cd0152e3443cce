use crate::mask::FanMask;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

// ============================================================================
// Change Types
// ============================================================================

/// Kind of change delivered to the consumer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeType {
    Creation,
    Deletion,
}

const CONTENT_FLAGS: FanMask = FanMask::MODIFY
    .union(FanMask::ATTRIB)
    .union(FanMask::CLOSE_WRITE);
const CREATION_FLAGS: FanMask = FanMask::CREATE.union(FanMask::MOVED_TO);
const DELETION_FLAGS: FanMask = FanMask::DELETE
    .union(FanMask::DELETE_SELF)
    .union(FanMask::MOVED_FROM);

impl ChangeType {
    /// Reduce a kernel mask to a change type.
    ///
    /// Precedence, lowest to highest: content changes (modify, attribute,
    /// close-after-write) report `Creation`, then create / moved-to report
    /// `Creation`, then delete / delete-self / moved-from report `Deletion`.
    /// A mask carrying both creation and deletion bits is a `Deletion`.
    /// Masks with none of these bits yield `None`.
    pub fn from_mask(mask: u64) -> Option<Self> {
        let mask = FanMask::from_bits_truncate(mask);
        let mut change = None;

        if mask.intersects(CONTENT_FLAGS) {
            change = Some(ChangeType::Creation);
        }
        if mask.intersects(CREATION_FLAGS) {
            change = Some(ChangeType::Creation);
        }
        if mask.intersects(DELETION_FLAGS) {
            change = Some(ChangeType::Deletion);
        }

        change
    }
}

/// One change notification, owned by the consumer once delivered.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub path: PathBuf,
    pub change_type: ChangeType,
}

// ============================================================================
// Path Exclusion
// ============================================================================

/// Caller-supplied exclusion predicate. Returning `true` drops the event.
pub trait PathFilter {
    fn is_excluded(&self, path: &Path) -> bool;
}

impl<F> PathFilter for F
where
    F: Fn(&Path) -> bool + ?Sized,
{
    fn is_excluded(&self, path: &Path) -> bool {
        self(path)
    }
}

/// Apply the exclusion predicate, then classify.
pub fn classify<P: PathFilter + ?Sized>(mask: u64, path: PathBuf, filter: &P) -> Option<ChangeEvent> {
    if filter.is_excluded(&path) {
        return None;
    }

    ChangeType::from_mask(mask).map(|change_type| ChangeEvent { path, change_type })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_creation_flags() {
        assert_eq!(ChangeType::from_mask(FanMask::CREATE.bits()), Some(ChangeType::Creation));
        assert_eq!(ChangeType::from_mask(FanMask::MOVED_TO.bits()), Some(ChangeType::Creation));
    }

    #[test]
    fn test_deletion_flags() {
        for flag in [FanMask::DELETE, FanMask::DELETE_SELF, FanMask::MOVED_FROM] {
            assert_eq!(ChangeType::from_mask(flag.bits()), Some(ChangeType::Deletion));
        }
    }

    #[test]
    fn test_deletion_wins_over_creation() {
        let mask = (FanMask::CREATE | FanMask::DELETE).bits();
        assert_eq!(ChangeType::from_mask(mask), Some(ChangeType::Deletion));

        let mask = (FanMask::MOVED_TO | FanMask::MOVED_FROM | FanMask::ONDIR).bits();
        assert_eq!(ChangeType::from_mask(mask), Some(ChangeType::Deletion));
    }

    #[test]
    fn test_content_changes_report_creation() {
        assert_eq!(ChangeType::from_mask(FanMask::MODIFY.bits()), Some(ChangeType::Creation));
        assert_eq!(
            ChangeType::from_mask((FanMask::ATTRIB | FanMask::ONDIR).bits()),
            Some(ChangeType::Creation)
        );
        assert_eq!(ChangeType::from_mask(FanMask::CLOSE_WRITE.bits()), Some(ChangeType::Creation));
    }

    #[test]
    fn test_unrecognised_flags_yield_nothing() {
        assert_eq!(ChangeType::from_mask(0), None);
        assert_eq!(ChangeType::from_mask(FanMask::ONDIR.bits()), None);
        assert_eq!(ChangeType::from_mask(FanMask::Q_OVERFLOW.bits()), None);
        assert_eq!(ChangeType::from_mask(FanMask::OPEN.bits()), None);
    }

    #[test]
    fn test_excluded_path_is_dropped_before_classification() {
        let filter = |path: &Path| path.starts_with("/proc");
        assert_eq!(classify(FanMask::CREATE.bits(), PathBuf::from("/proc/1"), &filter), None);

        let event = classify(FanMask::CREATE.bits(), PathBuf::from("/data/new.txt"), &filter);
        assert_eq!(
            event,
            Some(ChangeEvent {
                path: PathBuf::from("/data/new.txt"),
                change_type: ChangeType::Creation,
            })
        );
    }

    #[test]
    fn test_change_event_serializes_snake_case() {
        let event = ChangeEvent {
            path: PathBuf::from("/data/old.txt"),
            change_type: ChangeType::Deletion,
        };
        let json = serde_json::to_string(&event).unwrap();
        assert_eq!(json, r#"{"path":"/data/old.txt","change_type":"deletion"}"#);
    }
}
