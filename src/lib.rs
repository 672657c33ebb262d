//! In-process broadcast groups.
//!
//! A [`Group`] fans every message sent by one of its members out to all other
//! members. Senders never wait for slow receivers: each delivery is attempted
//! independently and dropped if the receiver does not take it within a
//! timeout. This makes groups useful as a building block for pub/sub between
//! threads, e.g. for notifications or mirroring events between workers.
//!
//! # Dispatch loop
//! Messages are not delivered by the sender but by the dispatch loop of the
//! group, which has to be started explicitly on its own thread using
//! [`Group::broadcast`], [`Group::broadcast_for`] or
//! [`Group::broadcast_with`]. The loop runs until the group is
//! [closed](Group::close) or, if an idle timeout is configured, until no
//! message arrived for that long. Only one loop may run per group at a time.
//!
//! # Example
//! ```
//! use bcast::Group;
//! use std::thread;
//!
//! let group = Group::new();
//! let alice = group.join();
//! let bob = group.join();
//!
//! thread::scope(|s| {
//!     let dispatcher = s.spawn(|| group.broadcast());
//!
//!     let received = s.spawn(|| bob.recv());
//!     alice.send("hello");
//!     assert_eq!(received.join().unwrap(), Ok("hello"));
//!
//!     group.close();
//!     dispatcher.join().unwrap();
//! });
//! ```
//!
//! # Ordering
//! Messages are dispatched in the order the loop receives them. Deliveries of
//! the same message to different members are independent of each other, so
//! there is no ordering guarantee across members once fan-out has started.

pub(crate) mod dispatch;
pub(crate) mod group;
pub(crate) mod member;
pub(crate) mod message;
#[cfg(test)]
pub(crate) mod test;

pub use dispatch::{BroadcastConfig, Shutdown, DEFAULT_MESSAGE_TIMEOUT};
pub use group::{Group, Recipient, SendTimeoutError};
pub use member::{Member, RecvError, RecvTimeoutError, TryRecvError};
pub use message::MemberId;
