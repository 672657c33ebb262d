use std::time::Duration;

use crossbeam::channel::Receiver;

use crate::{
    group::{Group, SendTimeoutError},
    message::{Message, MemberId},
};

/// Indicates that a member can no longer receive messages.
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecvError {
    /// The member was removed from the group and all pending deliveries have
    /// finished.
    #[error("member was removed from the group")]
    Removed,
}

/// Indicates why [`Member::try_recv`] did not return a message.
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum TryRecvError {
    /// No message is ready.
    #[error("no message available")]
    Empty,

    /// See [`RecvError::Removed`].
    #[error("member was removed from the group")]
    Removed,
}

/// Indicates why [`Member::recv_timeout`] did not return a message.
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecvTimeoutError {
    /// No message arrived before the timeout.
    #[error("timed out waiting for a message")]
    Timeout,

    /// See [`RecvError::Removed`].
    #[error("member was removed from the group")]
    Removed,
}

/// A member of a broadcast group.
///
/// Created by [`Group::join`]. Messages sent by other members arrive in the
/// member's inbox, which can be read with [`Member::recv`] or directly through
/// [`Member::inbox`]. Dropping the member removes it from the group.
pub struct Member<T> {
    group: Group<T>,
    id: MemberId,
    inbox: Receiver<T>,
}

impl<T> Member<T> {
    pub(crate) fn new(group: Group<T>, id: MemberId, inbox: Receiver<T>) -> Self {
        Self { group, id, inbox }
    }

    /// Returns the id of the member.
    pub fn id(&self) -> MemberId {
        self.id
    }

    /// Returns the receiving side of the member's inbox.
    ///
    /// Receiving from the inbox directly is equivalent to calling
    /// [`Member::recv`]. The receiver disconnects once the member has left the
    /// group and no deliveries to it are pending.
    pub fn inbox(&self) -> &Receiver<T> {
        &self.inbox
    }

    /// Sends a message to all other members.
    ///
    /// Blocks until the dispatch loop has accepted the message, not until the
    /// other members received it.
    pub fn send(&self, value: T) {
        self.group.send_message(Message::from_member(self.id, value))
    }

    /// Like [`Member::send`] but gives up after `timeout` if no dispatch loop
    /// accepts the message.
    pub fn send_timeout(&self, value: T, timeout: Duration) -> Result<(), SendTimeoutError<T>> {
        self.group
            .send_message_timeout(Message::from_member(self.id, value), timeout)
    }

    /// Waits for the next message.
    pub fn recv(&self) -> Result<T, RecvError> {
        self.inbox.recv().map_err(|_| RecvError::Removed)
    }

    /// Returns the next message if one is ready to be delivered.
    pub fn try_recv(&self) -> Result<T, TryRecvError> {
        use crossbeam::channel::TryRecvError as ChannelError;

        self.inbox.try_recv().map_err(|err| match err {
            ChannelError::Empty => TryRecvError::Empty,
            ChannelError::Disconnected => TryRecvError::Removed,
        })
    }

    /// Waits at most `timeout` for the next message.
    pub fn recv_timeout(&self, timeout: Duration) -> Result<T, RecvTimeoutError> {
        use crossbeam::channel::RecvTimeoutError as ChannelError;

        self.inbox.recv_timeout(timeout).map_err(|err| match err {
            ChannelError::Timeout => RecvTimeoutError::Timeout,
            ChannelError::Disconnected => RecvTimeoutError::Removed,
        })
    }

    /// Leaves the group.
    ///
    /// Other members are not notified. Deliveries that are already in flight
    /// may still land in clones of the inbox.
    pub fn close(self) {
        tracing::trace!(member = %self.id, "closing member");
    }
}

impl<T> Drop for Member<T> {
    fn drop(&mut self) {
        self.group.remove(self.id);
    }
}
