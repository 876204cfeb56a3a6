// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! `shmbus validate` command - Validate configuration file.

use shmbus_core::ConfigLoader;

pub async fn execute(file: &str) -> Result<(), Box<dyn std::error::Error>> {
    tracing::info!(file = %file, "Validating configuration");

    match ConfigLoader::load_file(file) {
        Ok(config) => {
            println!("✓ Configuration is valid");
            println!();
            println!("Daemon Settings:");
            println!("  Socket Path:        {}", config.daemon.socket_path);
            println!(
                "  Evict Unreachable:  {}",
                config.daemon.evict_unreachable
            );
            println!();
            println!("Client Settings:");
            println!(
                "  Socket Directory:   {}",
                config.client.socket_dir.display()
            );
            println!();
            println!("Ring Settings:");
            println!(
                "  Slot Count:         {}",
                config.ring.geometry.slot_count()
            );
            println!(
                "  Slot Size:          {} bytes",
                config.ring.geometry.slot_size()
            );
            println!(
                "  Segment Size:       {} bytes",
                config.ring.geometry.segment_size()
            );
            println!(
                "  Open Attempts:      {}",
                config.ring.open_retry.attempts()
            );
            Ok(())
        }
        Err(e) => {
            eprintln!("✗ Configuration validation failed:");
            eprintln!("  {}", e);
            std::process::exit(1);
        }
    }
}
