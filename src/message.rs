use std::{
    fmt::{self, Display},
    sync::atomic::{AtomicU64, Ordering},
};

static NEXT_MEMBER_ID: AtomicU64 = AtomicU64::new(1);

/// Opaque identity of a group member's inbox.
///
/// Ids are unique for the lifetime of the process and are used both to
/// suppress echoing a message back to its sender and to find the inbox again
/// on removal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MemberId(u64);

impl MemberId {
    pub(crate) fn next() -> Self {
        Self(NEXT_MEMBER_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl Display for MemberId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A payload on its way to the dispatch loop, tagged with its origin.
#[derive(Debug)]
pub(crate) struct Message<T> {
    /// `None` for group-wide sends, which are delivered to every member.
    pub sender: Option<MemberId>,
    pub payload: T,
}

impl<T> Message<T> {
    pub fn from_member(sender: MemberId, payload: T) -> Self {
        Self {
            sender: Some(sender),
            payload,
        }
    }

    pub fn from_group(payload: T) -> Self {
        Self {
            sender: None,
            payload,
        }
    }

    /// Returns true if `recipient` should get this message.
    #[inline]
    pub fn is_for(&self, recipient: MemberId) -> bool {
        self.sender != Some(recipient)
    }
}
