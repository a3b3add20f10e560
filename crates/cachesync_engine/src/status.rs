//! Item status codes and the success predicates that classify them.
//!
//! SyncML sources use HTTP-style codes where `[200, 500)` is success,
//! except [`DEVICE_FULL`]. Media sources (pictures, videos, files, music)
//! talk to a media endpoint where `0` is the only success.

use serde::Serialize;

/// Media endpoint success.
pub const MEDIA_OK: i32 = 0;
/// Command completed.
pub const OK: i32 = 200;
/// Item added.
pub const ITEM_ADDED: i32 = 201;
/// Accepted for processing.
pub const ACCEPTED: i32 = 202;
/// A chunk of a large object was accepted; more chunks follow.
pub const CHUNKED_ITEM_ACCEPTED: i32 = 213;
/// Target item does not exist.
pub const NOT_FOUND: i32 = 404;
/// Item already exists on the receiving side.
pub const ALREADY_EXISTS: i32 = 418;
/// Receiving side is out of storage.
pub const DEVICE_FULL: i32 = 420;
/// Generic command failure.
pub const COMMAND_FAILED: i32 = 500;

/// Source names that use the media status convention.
const MEDIA_SOURCE_NAMES: [&str; 4] = ["picture", "video", "files", "music"];

/// How a source decides whether an item status is a success.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SuccessPredicateKind {
    /// HTTP-style SyncML codes.
    SyncMl,
    /// Media endpoint codes.
    Media,
}

impl SuccessPredicateKind {
    /// Resolves the predicate from a source name.
    pub fn for_source_name(name: &str) -> Self {
        if MEDIA_SOURCE_NAMES
            .iter()
            .any(|media| media.eq_ignore_ascii_case(name))
        {
            Self::Media
        } else {
            Self::SyncMl
        }
    }

    /// Returns true if `status` counts as a success.
    pub fn is_success(self, status: i32) -> bool {
        match self {
            Self::Media => status == MEDIA_OK,
            Self::SyncMl => (OK..COMMAND_FAILED).contains(&status) && status != DEVICE_FULL,
        }
    }

    /// Status the client reports for a locally applied add.
    pub fn added_status(self) -> i32 {
        match self {
            Self::Media => MEDIA_OK,
            Self::SyncMl => ITEM_ADDED,
        }
    }

    /// Status the client reports for a locally applied replace or delete.
    pub fn ok_status(self) -> i32 {
        match self {
            Self::Media => MEDIA_OK,
            Self::SyncMl => OK,
        }
    }
}

/// Returns true if `status` signals that the receiving side is full.
pub fn is_quota_exceeded(status: i32) -> bool {
    status == DEVICE_FULL
}

/// Returns true for the intermediate chunk acknowledgment.
pub fn is_chunk_ack(status: i32) -> bool {
    status == CHUNKED_ITEM_ACCEPTED
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn media_names_resolve() {
        for name in ["picture", "video", "files", "music", "Picture"] {
            assert_eq!(
                SuccessPredicateKind::for_source_name(name),
                SuccessPredicateKind::Media
            );
        }
        for name in ["contact", "calendar", "mail", "note"] {
            assert_eq!(
                SuccessPredicateKind::for_source_name(name),
                SuccessPredicateKind::SyncMl
            );
        }
    }

    #[test]
    fn picture_and_contact_disagree() {
        let picture = SuccessPredicateKind::for_source_name("picture");
        let contact = SuccessPredicateKind::for_source_name("contact");

        assert!(picture.is_success(0));
        assert!(!picture.is_success(200));
        assert!(!contact.is_success(0));
        assert!(contact.is_success(200));
    }

    #[test]
    fn syncml_range_boundaries() {
        let kind = SuccessPredicateKind::SyncMl;
        assert!(!kind.is_success(199));
        assert!(kind.is_success(OK));
        assert!(kind.is_success(ALREADY_EXISTS));
        assert!(kind.is_success(499));
        assert!(!kind.is_success(DEVICE_FULL));
        assert!(!kind.is_success(COMMAND_FAILED));
    }

    #[test]
    fn special_codes() {
        assert!(is_quota_exceeded(DEVICE_FULL));
        assert!(!is_quota_exceeded(COMMAND_FAILED));
        assert!(is_chunk_ack(CHUNKED_ITEM_ACCEPTED));
    }
}
