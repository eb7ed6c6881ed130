//! `info` command implementation.

use anyhow::{Context, Result};
use contracts::ForwarderBlueprint;
use tracing::info;

use crate::cli::InfoArgs;

/// Execute the `info` command
pub fn run_info(args: &InfoArgs) -> Result<()> {
    info!(config = %args.config.display(), "Loading configuration info");

    if !args.config.exists() {
        anyhow::bail!("Configuration file not found: {}", args.config.display());
    }

    let blueprint = config_loader::ConfigLoader::load_from_path(&args.config)
        .with_context(|| format!("Failed to load config from {}", args.config.display()))?;

    if args.json {
        // client secret is never serialized
        let json = config_loader::ConfigLoader::to_json(&blueprint)
            .context("Failed to serialize config info")?;
        println!("{}", json);
    } else {
        print_config_info(&blueprint);
    }

    Ok(())
}

fn print_config_info(blueprint: &ForwarderBlueprint) {
    println!("=== Log Forwarder Configuration ===\n");

    println!("HTTPS (primary)");
    println!("   ├─ Endpoint: {}", blueprint.https.endpoint);
    println!("   ├─ Certificate: {}", blueprint.https.cert_file_path);
    println!("   ├─ Key: {}", blueprint.https.key_file_path);
    println!("   └─ Timeout: {}s", blueprint.https.timeout_secs);

    match &blueprint.relay {
        Some(relay) => {
            println!("\nRelay");
            println!("   ├─ Socket: {}", relay.socket_path);
            println!("   ├─ Tag: {}", relay.tag);
            println!("   └─ Write timeout: {}s", relay.write_timeout_secs);
        }
        None => println!("\nRelay: disabled"),
    }

    match &blueprint.cloud {
        Some(cloud) => {
            println!("\nCloud ingest");
            println!("   ├─ Endpoint: {}", cloud.endpoint);
            println!("   ├─ Table: {}.{}", cloud.database, cloud.table);
            println!("   ├─ Tenant: {}", cloud.tenant_id);
            println!("   ├─ Client: {}", cloud.client_id);
            println!(
                "   └─ Mapping: {}",
                cloud.mapping.as_deref().unwrap_or("(none)")
            );
        }
        None => println!("\nCloud ingest: disabled"),
    }

    let buffer = &blueprint.buffer;
    println!("\nBuffer");
    println!("   ├─ Capacity: {}", buffer.capacity);
    println!("   ├─ Overflow policy: {:?}", buffer.overflow_policy);
    println!("   └─ Enqueue timeout: {}ms", buffer.enqueue_timeout_ms);

    let dispatch = &blueprint.dispatch;
    println!("\nDispatch");
    println!(
        "   ├─ Backoff: {}ms .. {}ms",
        dispatch.backoff_base_ms, dispatch.backoff_cap_ms
    );
    println!("   ├─ Drain batch: {}", dispatch.drain_batch_size);
    println!(
        "   ├─ Shutdown flush timeout: {}s",
        dispatch.shutdown_flush_timeout_secs
    );
    println!("   └─ Fatal exit delay: {}s", blueprint.fatal_exit_delay_secs);

    println!();
}
