// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! `shmbus produce` command - Create a ring and write messages into it.
//!
//! The ring is registered with the discovery daemon so consumers can find
//! it. On completion or Ctrl+C the registration is withdrawn and the ring's
//! kernel names are unlinked.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use shmbus_core::{
    ConfigLoader, RegistrationClient, RingGeometry, ServiceKey, SharedMemoryError, SharedRing,
    ShmName,
};

/// How long a blocked write waits before re-checking for shutdown.
const WRITE_POLL: Duration = Duration::from_millis(200);

pub struct ProduceOptions {
    pub service: String,
    pub count: u64,
    pub interval_ms: u64,
    pub slots: Option<u32>,
    pub slot_size: Option<u32>,
}

pub async fn execute(
    config_path: &str,
    options: ProduceOptions,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = ConfigLoader::load_or_default(config_path)?;
    let key = ServiceKey::new(options.service)?;

    let defaults = config.ring.geometry;
    let geometry = RingGeometry::new(
        options.slots.unwrap_or(defaults.slot_count()),
        options.slot_size.unwrap_or(defaults.slot_size()),
    )?;

    let shm = ShmName::derived("shmbus", &key, std::process::id())?;
    let mut ring = SharedRing::create(&shm, geometry)?;

    tracing::info!(
        key = %key,
        shm = %shm,
        slots = geometry.slot_count(),
        slot_size = geometry.slot_size(),
        "Producer ring created"
    );

    let mut client = match RegistrationClient::bind(&config, "producer") {
        Ok(client) => client,
        Err(e) => {
            ring.unlink_resources()?;
            return Err(e.into());
        }
    };
    if let Err(e) = client.register(&key, Some(&shm)).await {
        ring.unlink_resources()?;
        return Err(e.into());
    }

    println!("▶ Producing {} messages on {} ({})", options.count, key, shm);

    let ring = Arc::new(ring);
    let stop = Arc::new(AtomicBool::new(false));

    let writer = {
        let ring = Arc::clone(&ring);
        let stop = Arc::clone(&stop);
        let interval = Duration::from_millis(options.interval_ms);
        let count = options.count;
        tokio::task::spawn_blocking(move || write_messages(&ring, &stop, count, interval))
    };
    tokio::pin!(writer);

    // PEER pushes only inform us who is listening
    let outcome = loop {
        tokio::select! {
            result = &mut writer => break result,
            event = client.recv_peer() => match event {
                Ok(event) => println!("  ● Peer joined: {}", event.peer.endpoint),
                Err(e) => tracing::warn!(error = %e, "Failed to receive peer notification"),
            },
            _ = tokio::signal::ctrl_c() => {
                println!();
                println!("Shutting down...");
                stop.store(true, Ordering::SeqCst);
            }
        }
    };

    client.deregister_all().await;

    match Arc::try_unwrap(ring) {
        Ok(mut ring) => {
            ring.unlink_resources()?;
        }
        Err(_) => tracing::error!(shm = %shm, "Ring still in use, not unlinked"),
    }

    let written = outcome??;
    println!("✓ Wrote {} messages, ring {} removed", written, shm);
    Ok(())
}

/// Write `Message <i>` until `count` is reached or `stop` is set.
/// Returns the number of messages written.
fn write_messages(
    ring: &SharedRing,
    stop: &AtomicBool,
    count: u64,
    interval: Duration,
) -> Result<u64, SharedMemoryError> {
    let mut written = 0;
    while written < count && !stop.load(Ordering::SeqCst) {
        let message = format!("Message {}", written);
        match ring.write_message_timeout(message.as_bytes(), WRITE_POLL) {
            Ok(()) => {
                tracing::info!(message = %message, "Produced");
                written += 1;
            }
            // Full: nobody is reading yet, check for shutdown and retry
            Err(SharedMemoryError::RingBufferFull) => continue,
            Err(e) => return Err(e),
        }
        if written < count && !interval.is_zero() {
            std::thread::sleep(interval);
        }
    }
    Ok(written)
}
