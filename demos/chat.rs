use std::{thread, time::Duration};

use bcast::{Group, RecvTimeoutError};

fn main() {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .init();

    let group = Group::new();
    let names = ["alice", "bob", "carol"];
    let members: Vec<_> = names.iter().map(|_| group.join()).collect();

    thread::scope(|s| {
        let dispatcher = s.spawn(|| {
            group.broadcast_for(Duration::from_millis(500), Duration::from_millis(100))
        });

        for (name, member) in names.iter().zip(&members) {
            s.spawn(move || loop {
                match member.recv_timeout(Duration::from_secs(1)) {
                    Ok(text) => tracing::info!("{} got: {}", name, text),
                    Err(RecvTimeoutError::Timeout) => break,
                    Err(RecvTimeoutError::Removed) => break,
                }
            });
        }

        for (name, member) in names.iter().zip(&members) {
            member.send(format!("hi from {}", name));
            thread::sleep(Duration::from_millis(50));
        }
        group.send(String::from("everyone: the group goes quiet now"));

        let shutdown = dispatcher.join().unwrap();
        tracing::info!(?shutdown, "dispatch loop stopped");
    });
}
