use std::{
    fmt,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex, MutexGuard, PoisonError,
    },
    time::Duration,
};

use crossbeam::channel::{Receiver, Sender, TrySendError};

use crate::{
    member::Member,
    message::{Message, MemberId},
};

/// Indicates that no dispatch loop accepted a message in time.
///
/// The payload is handed back to the caller and can be retrieved with
/// [`SendTimeoutError::into_inner`].
#[derive(thiserror::Error)]
#[error("timed out waiting for the dispatch loop to accept the message")]
pub struct SendTimeoutError<T>(pub T);

impl<T> SendTimeoutError<T> {
    /// Returns the message that could not be sent.
    pub fn into_inner(self) -> T {
        self.0
    }
}

impl<T> fmt::Debug for SendTimeoutError<T> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("SendTimeoutError(..)")
    }
}

/// An entry of a membership snapshot.
///
/// Holds a handle to the member's inbox. Snapshots returned by
/// [`Group::members`] are independent from the group: members joining or
/// leaving afterwards are not reflected.
pub struct Recipient<T> {
    pub(crate) id: MemberId,
    pub(crate) inbox: Sender<T>,
}

impl<T> Recipient<T> {
    /// Returns the id of the member.
    pub fn id(&self) -> MemberId {
        self.id
    }

    /// Returns the sending side of the member's inbox.
    pub fn inbox(&self) -> &Sender<T> {
        &self.inbox
    }
}

impl<T> Clone for Recipient<T> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            inbox: self.inbox.clone(),
        }
    }
}

impl<T> fmt::Debug for Recipient<T> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Recipient").field("id", &self.id).finish()
    }
}

pub(crate) struct Shared<T> {
    members: Mutex<Vec<Recipient<T>>>,
    member_count: AtomicUsize,
    pub(crate) inbound_sender: Sender<Message<T>>,
    pub(crate) inbound_receiver: Receiver<Message<T>>,
    close_sender: Sender<()>,
    pub(crate) close_receiver: Receiver<()>,
}

impl<T> Shared<T> {
    /// Locks the member list.
    ///
    /// The list is never left half-modified, so a poisoned lock is still
    /// consistent and can be used.
    fn lock_members(&self) -> MutexGuard<'_, Vec<Recipient<T>>> {
        self.members.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// A broadcast group.
///
/// Messages sent by a member are delivered to every other member of the group.
/// Messages sent with [`Group::send`] are delivered to all members. Delivery
/// is performed by the dispatch loop which must be run explicitly (see
/// [`Group::broadcast`] and [`Group::broadcast_for`]), usually on its own
/// thread. Only one dispatch loop should run per group at a time; concurrent
/// loops split the inbound messages between them.
///
/// Cloning a group yields another handle to the same group.
pub struct Group<T> {
    pub(crate) shared: Arc<Shared<T>>,
}

impl<T> Clone for Group<T> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<T> Default for Group<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for Group<T> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Group")
            .field("member_count", &self.member_count())
            .finish()
    }
}

impl<T> Group<T> {
    /// Creates an empty group.
    ///
    /// The dispatch loop is not started.
    pub fn new() -> Self {
        let (inbound_sender, inbound_receiver) = crossbeam::channel::bounded(0);
        let (close_sender, close_receiver) = crossbeam::channel::bounded(1);

        Self {
            shared: Arc::new(Shared {
                members: Mutex::new(Vec::new()),
                member_count: AtomicUsize::new(0),
                inbound_sender,
                inbound_receiver,
                close_sender,
                close_receiver,
            }),
        }
    }

    /// Registers an inbox as a recipient of future messages.
    ///
    /// Returns the id that identifies the inbox within the group.
    pub fn add(&self, inbox: Sender<T>) -> MemberId {
        let id = MemberId::next();
        let mut members = self.shared.lock_members();
        members.push(Recipient { id, inbox });
        self.shared.member_count.store(members.len(), Ordering::Relaxed);
        tracing::debug!(member = %id, count = members.len(), "member added");
        id
    }

    /// Removes the inbox with the given id from the group.
    ///
    /// Returns false if no such member exists. The relative order of the
    /// remaining members is preserved.
    pub fn remove(&self, id: MemberId) -> bool {
        let mut members = self.shared.lock_members();
        match members.iter().position(|recipient| recipient.id == id) {
            Some(index) => {
                members.remove(index);
                self.shared.member_count.store(members.len(), Ordering::Relaxed);
                tracing::debug!(member = %id, count = members.len(), "member removed");
                true
            }
            None => false,
        }
    }

    /// Returns true if a member with the given id is part of the group.
    pub fn is_member(&self, id: MemberId) -> bool {
        self.shared
            .lock_members()
            .iter()
            .any(|recipient| recipient.id == id)
    }

    /// Returns a snapshot of the current members in insertion order.
    pub fn members(&self) -> Vec<Recipient<T>> {
        let members = self.shared.lock_members();
        self.shared.member_count.store(members.len(), Ordering::Relaxed);
        members.clone()
    }

    /// Returns the number of members as of the last membership change or
    /// snapshot.
    ///
    /// This does not take the lock and may be stale while other threads join
    /// or leave.
    pub fn member_count(&self) -> usize {
        self.shared.member_count.load(Ordering::Relaxed)
    }

    /// Joins the group, returning a new member.
    pub fn join(&self) -> Member<T> {
        let (sender, inbox) = crossbeam::channel::bounded(0);
        let id = self.add(sender);
        Member::new(self.clone(), id, inbox)
    }

    /// Asks the running dispatch loop to stop.
    ///
    /// This never blocks. If no loop is running, the next one started stops
    /// immediately. Closing again before a loop observed the request has no
    /// additional effect. Members blocked in `recv` are not woken up and
    /// member inboxes are left untouched.
    pub fn close(&self) {
        match self.shared.close_sender.try_send(()) {
            Ok(()) => tracing::debug!("close requested"),
            Err(TrySendError::Full(())) => tracing::trace!("close already pending"),
            Err(TrySendError::Disconnected(())) => {
                // The group owns the receiving end, so the channel cannot be disconnected.
                unreachable!();
            }
        }
    }

    /// Sends a message to all members.
    ///
    /// Blocks until the dispatch loop accepts the message. If no loop is
    /// running this blocks until one is started.
    pub fn send(&self, value: T) {
        self.send_message(Message::from_group(value))
    }

    /// Sends a message to all members, waiting at most `timeout` for the
    /// dispatch loop to accept it.
    pub fn send_timeout(&self, value: T, timeout: Duration) -> Result<(), SendTimeoutError<T>> {
        self.send_message_timeout(Message::from_group(value), timeout)
    }

    pub(crate) fn send_message(&self, message: Message<T>) {
        if self.shared.inbound_sender.send(message).is_err() {
            // The group owns the receiving end, so the channel cannot be disconnected.
            unreachable!();
        }
    }

    pub(crate) fn send_message_timeout(
        &self,
        message: Message<T>,
        timeout: Duration,
    ) -> Result<(), SendTimeoutError<T>> {
        use crossbeam::channel::SendTimeoutError as ChannelError;

        match self.shared.inbound_sender.send_timeout(message, timeout) {
            Ok(()) => Ok(()),
            Err(ChannelError::Timeout(message)) => Err(SendTimeoutError(message.payload)),
            Err(ChannelError::Disconnected(_)) => unreachable!("group owns the inbound receiver"),
        }
    }
}
