//! The dispatch loop that fans messages out to group members.

use std::time::Duration;

use crossbeam::{
    channel::{after, never, SendTimeoutError, TrySendError},
    select,
};

use crate::{
    group::{Group, Recipient},
    message::Message,
};

/// Delivery timeout used when none is configured.
pub const DEFAULT_MESSAGE_TIMEOUT: Duration = Duration::from_secs(60 * 60);

/// Configuration of a dispatch loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BroadcastConfig {
    /// Stop the loop if no message arrives for this long.
    ///
    /// `None` or a zero duration keeps the loop running until the group is
    /// closed.
    ///
    /// The default is `None`.
    pub idle_timeout: Option<Duration>,

    /// How long to wait for a single member to take a message before the
    /// message is dropped for that member.
    ///
    /// A zero duration is replaced by [`DEFAULT_MESSAGE_TIMEOUT`].
    ///
    /// The default is one hour.
    pub message_timeout: Duration,
}

impl BroadcastConfig {
    /// Returns the configuration with zero durations replaced by their
    /// defaults.
    pub fn normalized(self) -> Self {
        Self {
            idle_timeout: self.idle_timeout.filter(|timeout| !timeout.is_zero()),
            message_timeout: if self.message_timeout.is_zero() {
                DEFAULT_MESSAGE_TIMEOUT
            } else {
                self.message_timeout
            },
        }
    }
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self {
            idle_timeout: None,
            message_timeout: DEFAULT_MESSAGE_TIMEOUT,
        }
    }
}

/// The reason a dispatch loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shutdown {
    /// [`Group::close`] was called.
    Closed,

    /// No message arrived within the idle timeout.
    Idle,
}

impl<T: Clone + Send + 'static> Group<T> {
    /// Runs the dispatch loop until the group is closed.
    ///
    /// Every member gets one hour to take a message before it is dropped for
    /// that member.
    pub fn broadcast(&self) -> Shutdown {
        self.broadcast_with(BroadcastConfig::default())
    }

    /// Runs the dispatch loop until the group is closed or no message arrived
    /// for `total_timeout`.
    ///
    /// Each member gets `message_timeout` to take a message. A zero
    /// `total_timeout` never times out and a zero `message_timeout` defaults to
    /// one hour.
    pub fn broadcast_for(&self, total_timeout: Duration, message_timeout: Duration) -> Shutdown {
        self.broadcast_with(BroadcastConfig {
            idle_timeout: Some(total_timeout),
            message_timeout,
        })
    }

    /// Runs the dispatch loop with the given configuration.
    ///
    /// Only one loop may run per group at a time.
    #[tracing::instrument(skip(self))]
    pub fn broadcast_with(&self, config: BroadcastConfig) -> Shutdown {
        let config = config.normalized();
        let shared = &self.shared;
        tracing::debug!("dispatch loop started");

        loop {
            let idle = match config.idle_timeout {
                Some(timeout) => after(timeout),
                None => never(),
            };

            select! {
                recv(shared.close_receiver) -> _ => {
                    tracing::debug!("group closed, stopping dispatch loop");
                    return Shutdown::Closed;
                }
                recv(shared.inbound_receiver) -> message => match message {
                    Ok(message) => self.dispatch(message, config.message_timeout),
                    // The group owns the sending end, so the channel cannot be disconnected.
                    Err(_) => unreachable!(),
                },
                recv(idle) -> _ => {
                    tracing::debug!("no messages received, stopping dispatch loop");
                    return Shutdown::Idle;
                }
            }
        }
    }

    /// Hands the message to every member of the current snapshot except its
    /// sender.
    fn dispatch(&self, message: Message<T>, timeout: Duration) {
        let recipients = self.members();
        tracing::trace!(
            sender = ?message.sender,
            members = recipients.len(),
            "dispatching message",
        );

        for recipient in recipients {
            if message.is_for(recipient.id) {
                deliver(recipient, message.payload.clone(), timeout);
            }
        }
    }
}

/// Delivers `payload` to `recipient` without blocking the caller.
///
/// If the recipient is not waiting for a message right now, a thread is
/// spawned that waits up to `timeout` for it. The payload is dropped if the
/// recipient does not take it in time.
fn deliver<T: Send + 'static>(recipient: Recipient<T>, payload: T, timeout: Duration) {
    let payload = match recipient.inbox.try_send(payload) {
        Ok(()) => {
            tracing::trace!(recipient = %recipient.id, "delivered");
            return;
        }
        Err(TrySendError::Full(payload)) => payload,
        Err(TrySendError::Disconnected(_)) => {
            tracing::trace!(recipient = %recipient.id, "inbox dropped, discarding message");
            return;
        }
    };

    let id = recipient.id;
    let spawned = std::thread::Builder::new()
        .name(format!("bcast-deliver{}", id))
        .spawn(move || match recipient.inbox.send_timeout(payload, timeout) {
            Ok(()) => tracing::trace!(recipient = %recipient.id, "delivered"),
            Err(SendTimeoutError::Timeout(_)) => tracing::trace!(
                recipient = %recipient.id,
                ?timeout,
                "delivery timed out, discarding message",
            ),
            Err(SendTimeoutError::Disconnected(_)) => {
                tracing::trace!(recipient = %recipient.id, "inbox dropped, discarding message")
            }
        });

    if let Err(err) = spawned {
        tracing::error!(
            recipient = %id,
            %err,
            "failed to spawn delivery thread, discarding message",
        );
    }
}

#[cfg(test)]
mod test {
    use std::{
        thread,
        time::{Duration, Instant},
    };

    use rand::Rng;

    use super::*;
    use crate::{member::RecvTimeoutError, test::*};

    const QUIET: Duration = Duration::from_millis(100);

    #[test]
    fn config_normalization() {
        let config = BroadcastConfig {
            idle_timeout: Some(Duration::ZERO),
            message_timeout: Duration::ZERO,
        }
        .normalized();
        assert_eq!(config, BroadcastConfig::default());

        let config = BroadcastConfig {
            idle_timeout: Some(Duration::from_millis(5)),
            message_timeout: Duration::from_millis(7),
        };
        assert_eq!(config.normalized(), config);
    }

    #[test]
    fn member_message_reaches_others_but_not_sender() -> Result<()> {
        init_logger();

        let group = Group::new();
        let a = group.join();
        let b = group.join();
        let c = group.join();

        thread::scope(|s| -> Result<()> {
            let dispatcher = s.spawn(|| group.broadcast());

            let b_recv = s.spawn(|| b.recv());
            let c_recv = s.spawn(|| c.recv());
            a.send("x");

            assert_eq!(b_recv.join().unwrap()?, "x");
            assert_eq!(c_recv.join().unwrap()?, "x");
            assert_eq!(a.recv_timeout(QUIET), Err(RecvTimeoutError::Timeout));

            group.close();
            assert_eq!(dispatcher.join().unwrap(), Shutdown::Closed);
            Ok(())
        })
    }

    #[test]
    fn group_message_reaches_everyone() -> Result<()> {
        init_logger();

        let group = Group::new();
        let a = group.join();
        let b = group.join();

        thread::scope(|s| -> Result<()> {
            let dispatcher = s.spawn(|| group.broadcast());

            let a_recv = s.spawn(|| a.recv());
            let b_recv = s.spawn(|| b.inbox().recv());
            group.send("y");

            assert_eq!(a_recv.join().unwrap()?, "y");
            assert_eq!(b_recv.join().unwrap()?, "y");

            group.close();
            assert_eq!(dispatcher.join().unwrap(), Shutdown::Closed);
            Ok(())
        })
    }

    #[test]
    fn closed_member_receives_nothing_further() -> Result<()> {
        init_logger();

        let group = Group::new();
        let a = group.join();
        let b = group.join();
        let c = group.join();
        let b_inbox = b.inbox().clone();
        b.close();

        thread::scope(|s| -> Result<()> {
            let dispatcher = s.spawn(|| group.broadcast());

            let c_recv = s.spawn(|| c.recv());
            a.send("z");
            assert_eq!(c_recv.join().unwrap()?, "z");

            // The group held the last sender of the inbox.
            assert!(b_inbox.recv_timeout(QUIET).is_err());
            assert!(b_inbox.is_empty());

            group.close();
            assert_eq!(dispatcher.join().unwrap(), Shutdown::Closed);
            Ok(())
        })
    }

    #[test]
    fn fan_out_reaches_every_other_member() -> Result<()> {
        init_logger();

        let mut rng = rand::thread_rng();
        let group = Group::new();
        let members: Vec<_> = (0..rng.gen_range(2..8)).map(|_| group.join()).collect();
        let sender = &members[rng.gen_range(0..members.len())];

        thread::scope(|s| -> Result<()> {
            let dispatcher = s.spawn(|| group.broadcast());

            let receivers: Vec<_> = members
                .iter()
                .filter(|member| member.id() != sender.id())
                .map(|member| s.spawn(move || member.recv()))
                .collect();

            sender.send(1234_u64);

            let mut received = 0;
            for receiver in receivers {
                assert_eq!(receiver.join().unwrap()?, 1234);
                received += 1;
            }
            assert_eq!(received, members.len() - 1);
            assert_eq!(sender.recv_timeout(QUIET), Err(RecvTimeoutError::Timeout));

            group.close();
            assert_eq!(dispatcher.join().unwrap(), Shutdown::Closed);
            Ok(())
        })
    }

    #[test]
    fn late_joiner_misses_earlier_message() -> Result<()> {
        init_logger();

        let group = Group::new();
        let a = group.join();
        let b = group.join();

        thread::scope(|s| -> Result<()> {
            let dispatcher = s.spawn(|| group.broadcast());

            let b_recv = s.spawn(|| b.recv());
            a.send("m");
            assert_eq!(b_recv.join().unwrap()?, "m");

            let c = group.join();
            assert_eq!(c.recv_timeout(QUIET), Err(RecvTimeoutError::Timeout));

            group.close();
            assert_eq!(dispatcher.join().unwrap(), Shutdown::Closed);
            Ok(())
        })
    }

    #[test]
    fn idle_loop_stops_without_close() {
        init_logger();

        let group = Group::<u32>::new();
        let _member = group.join();

        let start = Instant::now();
        let shutdown = group.broadcast_for(Duration::from_millis(50), Duration::from_secs(1));
        let elapsed = start.elapsed();

        assert_eq!(shutdown, Shutdown::Idle);
        assert!(elapsed >= Duration::from_millis(50));
        assert!(elapsed < Duration::from_secs(1), "took {:?}", elapsed);
    }

    #[test]
    fn idle_timer_restarts_on_every_message() -> Result<()> {
        init_logger();

        let group = Group::new();
        let a = group.join();
        let b = group.join();

        thread::scope(|s| -> Result<()> {
            let dispatcher = s.spawn(|| {
                group.broadcast_for(Duration::from_millis(300), Duration::from_secs(1))
            });

            for i in 0..4 {
                thread::sleep(Duration::from_millis(100));
                let b_recv = s.spawn(|| b.recv());
                a.send(i);
                assert_eq!(b_recv.join().unwrap()?, i);
            }

            assert_eq!(dispatcher.join().unwrap(), Shutdown::Idle);
            Ok(())
        })
    }

    #[test]
    fn stalled_member_does_not_delay_others() -> Result<()> {
        init_logger();

        let group = Group::new();
        let a = group.join();
        let _stalled = group.join();
        let c = group.join();

        thread::scope(|s| -> Result<()> {
            let dispatcher = s.spawn(|| {
                group.broadcast_for(Duration::from_secs(10), Duration::from_millis(10))
            });

            let c_recv = s.spawn(|| c.recv());
            a.send("first");
            assert_eq!(c_recv.join().unwrap()?, "first");

            let start = Instant::now();
            let c_recv = s.spawn(|| c.recv());
            a.send("second");
            assert_eq!(c_recv.join().unwrap()?, "second");
            assert!(start.elapsed() < Duration::from_secs(1));

            group.close();
            assert_eq!(dispatcher.join().unwrap(), Shutdown::Closed);
            Ok(())
        })
    }

    #[test]
    fn undelivered_message_is_dropped_after_timeout() {
        init_logger();

        let group = Group::new();
        let a = group.join();
        let b = group.join();

        thread::scope(|s| {
            let dispatcher = s.spawn(|| {
                group.broadcast_for(Duration::from_secs(10), Duration::from_millis(10))
            });

            a.send("missed");
            thread::sleep(QUIET);
            assert_eq!(b.recv_timeout(QUIET), Err(RecvTimeoutError::Timeout));

            group.close();
            assert_eq!(dispatcher.join().unwrap(), Shutdown::Closed);
        });
    }

    #[test]
    fn pending_close_stops_next_loop() {
        init_logger();

        let group = Group::<u32>::new();
        group.close();
        group.close();
        assert_eq!(group.broadcast(), Shutdown::Closed);

        // Both close calls were coalesced into one request.
        assert_eq!(
            group.broadcast_for(Duration::from_millis(20), Duration::ZERO),
            Shutdown::Idle
        );
    }

    #[test]
    fn zero_total_timeout_runs_until_closed() {
        init_logger();

        let group = Group::<u32>::new();

        thread::scope(|s| {
            let dispatcher = s.spawn(|| group.broadcast_for(Duration::ZERO, Duration::ZERO));
            thread::sleep(QUIET);
            assert!(!dispatcher.is_finished());

            group.close();
            assert_eq!(dispatcher.join().unwrap(), Shutdown::Closed);
        });
    }
}
