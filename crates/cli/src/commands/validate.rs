//! `validate` command implementation.

use std::path::Path;

use anyhow::{Context, Result};
use contracts::{ForwarderBlueprint, OverflowPolicy};
use serde::Serialize;
use tracing::info;

use crate::cli::ValidateArgs;

/// Validation result for JSON output
#[derive(Serialize)]
struct ValidationResult {
    valid: bool,
    config_path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    warnings: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    summary: Option<ConfigSummary>,
}

#[derive(Serialize)]
struct ConfigSummary {
    https_endpoint: String,
    backends: Vec<&'static str>,
    buffer_capacity: usize,
    overflow_policy: OverflowPolicy,
}

/// Execute the `validate` command
pub fn run_validate(args: &ValidateArgs) -> Result<()> {
    info!(config = %args.config.display(), "Validating configuration");

    let result = validate_config(&args.config);

    if args.json {
        let json = serde_json::to_string_pretty(&result)
            .context("Failed to serialize validation result")?;
        println!("{}", json);
    } else {
        print_validation_result(&result);
    }

    if result.valid {
        Ok(())
    } else {
        anyhow::bail!("Configuration validation failed")
    }
}

fn validate_config(path: &Path) -> ValidationResult {
    let config_path = path.display().to_string();

    if !path.exists() {
        return ValidationResult {
            valid: false,
            config_path,
            error: Some(format!("File not found: {}", path.display())),
            warnings: None,
            summary: None,
        };
    }

    match config_loader::ConfigLoader::load_from_path(path) {
        Ok(blueprint) => {
            let warnings = collect_warnings(&blueprint);
            ValidationResult {
                valid: true,
                config_path,
                error: None,
                warnings: (!warnings.is_empty()).then_some(warnings),
                summary: Some(ConfigSummary {
                    https_endpoint: blueprint.https.endpoint.clone(),
                    backends: blueprint
                        .enabled_backends()
                        .iter()
                        .map(|kind| kind.as_str())
                        .collect(),
                    buffer_capacity: blueprint.buffer.capacity,
                    overflow_policy: blueprint.buffer.overflow_policy,
                }),
            }
        }
        Err(e) => ValidationResult {
            valid: false,
            config_path,
            error: Some(e.to_string()),
            warnings: None,
            summary: None,
        },
    }
}

/// Collect configuration warnings (non-fatal issues)
fn collect_warnings(blueprint: &ForwarderBlueprint) -> Vec<String> {
    let mut warnings = Vec::new();

    for path in [&blueprint.https.cert_file_path, &blueprint.https.key_file_path] {
        if !Path::new(path).exists() {
            warnings.push(format!("{path} does not exist - the HTTPS backend will fail at startup"));
        }
    }

    if let Some(relay) = &blueprint.relay {
        if !Path::new(&relay.socket_path).exists() {
            warnings.push(format!(
                "Relay socket {} not present - relay backend will keep reconnecting",
                relay.socket_path
            ));
        }
    }

    if blueprint.dispatch.shutdown_flush_timeout_secs == 0 {
        warnings.push(
            "shutdown_flush_timeout_secs is 0 - buffered records are dropped at shutdown"
                .to_string(),
        );
    }

    warnings
}

fn print_validation_result(result: &ValidationResult) {
    if result.valid {
        println!("✓ Configuration is valid: {}", result.config_path);

        if let Some(ref summary) = result.summary {
            println!("\n  HTTPS endpoint: {}", summary.https_endpoint);
            println!("  Backends: {}", summary.backends.join(", "));
            println!("  Buffer capacity: {}", summary.buffer_capacity);
            println!("  Overflow policy: {:?}", summary.overflow_policy);
        }

        if let Some(ref warnings) = result.warnings {
            println!("\n⚠ Warnings:");
            for warning in warnings {
                println!("  - {}", warning);
            }
        }
    } else {
        println!("✗ Configuration is invalid: {}", result.config_path);
        if let Some(ref error) = result.error {
            println!("\n  Error: {}", error);
        }
    }
}
