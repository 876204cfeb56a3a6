// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! `shmbus consume` command - Read from the rings of discovered producers.
//!
//! Registers without a ring of its own, then opens every ring advertised in
//! a PEER notification and reads from it on a blocking thread.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use shmbus_core::{ConfigLoader, PeerEvent, RegistrationClient, RetryPolicy, ServiceKey, ShmName};

/// How long a reader waits for a message before re-checking for shutdown.
const READ_POLL: Duration = Duration::from_millis(200);

/// A message read from one producer's ring.
struct Received {
    shm: ShmName,
    payload: Vec<u8>,
}

impl Received {
    fn print(&self) {
        println!("  [{}] {}", self.shm, String::from_utf8_lossy(&self.payload));
    }
}

/// Number of messages readers may still take out of their rings.
///
/// A reader reserves one unit before each read and gives it back when the
/// read times out, so no more than `--max` messages ever leave the rings.
struct ReadBudget {
    remaining: AtomicU64,
}

impl ReadBudget {
    fn new(max: Option<u64>) -> Self {
        Self {
            remaining: AtomicU64::new(max.unwrap_or(u64::MAX)),
        }
    }

    fn reserve(&self) -> bool {
        self.remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    fn release(&self) {
        self.remaining.fetch_add(1, Ordering::SeqCst);
    }
}

pub async fn execute(
    config_path: &str,
    service: &str,
    max: Option<u64>,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = ConfigLoader::load_or_default(config_path)?;
    let key = ServiceKey::new(service)?;

    let mut client = RegistrationClient::bind(&config, "consumer")?;
    client.register(&key, None).await?;

    println!("▶ Waiting for producers of {}", key);
    println!("Press Ctrl+C to stop...");

    let stop = Arc::new(AtomicBool::new(false));
    let budget = Arc::new(ReadBudget::new(max));
    let (tx, mut rx) = mpsc::unbounded_channel::<Received>();
    let mut opened: HashSet<ShmName> = HashSet::new();
    let mut readers: Vec<JoinHandle<()>> = Vec::new();
    let mut received: u64 = 0;

    loop {
        if max.is_some_and(|max| received >= max) {
            break;
        }

        tokio::select! {
            event = client.recv_peer() => match event {
                Ok(event) => {
                    let Some(shm) = event.peer.shm.clone() else {
                        tracing::debug!(peer = %event.peer.endpoint, "Peer has no ring");
                        continue;
                    };
                    if !opened.insert(shm.clone()) {
                        continue;
                    }
                    println!("  ● Producer found: {} ({})", event.peer.endpoint, shm);
                    readers.push(spawn_reader(
                        event,
                        config.ring.open_retry,
                        Arc::clone(&stop),
                        Arc::clone(&budget),
                        tx.clone(),
                    ));
                }
                Err(e) => tracing::warn!(error = %e, "Failed to receive peer notification"),
            },
            Some(message) = rx.recv() => {
                received += 1;
                message.print();
            }
            _ = tokio::signal::ctrl_c() => {
                println!();
                println!("Shutting down...");
                break;
            }
        }
    }

    stop.store(true, Ordering::SeqCst);
    for reader in readers {
        if let Err(e) = reader.await {
            tracing::error!(error = %e, "Reader task failed");
        }
    }
    // Messages already taken out of a ring are printed, not dropped.
    while let Ok(message) = rx.try_recv() {
        received += 1;
        message.print();
    }
    client.deregister_all().await;

    println!("✓ Received {} messages", received);
    Ok(())
}

/// Open the peer's ring and forward every message until `stop` is set.
fn spawn_reader(
    event: PeerEvent,
    retry: RetryPolicy,
    stop: Arc<AtomicBool>,
    budget: Arc<ReadBudget>,
    tx: mpsc::UnboundedSender<Received>,
) -> JoinHandle<()> {
    tokio::task::spawn_blocking(move || {
        let ring = match event.open_ring(retry) {
            Ok(Some(ring)) => ring,
            Ok(None) => return,
            Err(e) => {
                tracing::error!(peer = %event.peer.endpoint, error = %e, "Failed to open peer ring");
                return;
            }
        };

        while !stop.load(Ordering::SeqCst) {
            if !budget.reserve() {
                std::thread::sleep(READ_POLL);
                continue;
            }
            match ring.read_message_timeout(READ_POLL) {
                Ok(Some(payload)) => {
                    tracing::info!(shm = %ring.name(), len = payload.len(), "Consumed");
                    let message = Received {
                        shm: ring.name().clone(),
                        payload,
                    };
                    if tx.send(message).is_err() {
                        break;
                    }
                }
                Ok(None) => budget.release(),
                Err(e) => {
                    budget.release();
                    tracing::error!(shm = %ring.name(), error = %e, "Read failed");
                    break;
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_budget_caps_reads() {
        let budget = ReadBudget::new(Some(2));
        assert!(budget.reserve());
        assert!(budget.reserve());
        assert!(!budget.reserve());

        // a read that timed out hands its unit back
        budget.release();
        assert!(budget.reserve());
        assert!(!budget.reserve());
    }

    #[test]
    fn test_budget_zero_max() {
        let budget = ReadBudget::new(Some(0));
        assert!(!budget.reserve());
    }

    #[test]
    fn test_budget_shared_between_readers() {
        let budget = Arc::new(ReadBudget::new(Some(100)));
        let taken = AtomicU64::new(0);

        std::thread::scope(|s| {
            for _ in 0..4 {
                s.spawn(|| {
                    while budget.reserve() {
                        taken.fetch_add(1, Ordering::SeqCst);
                    }
                });
            }
        });

        assert_eq!(taken.load(Ordering::SeqCst), 100);
    }

    #[test]
    fn test_unbounded_without_max() {
        let budget = ReadBudget::new(None);
        for _ in 0..1000 {
            assert!(budget.reserve());
        }
    }
}
