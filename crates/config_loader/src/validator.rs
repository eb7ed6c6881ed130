//! 配置校验模块
//!
//! Turns a flat [`Configuration`] into a [`ForwarderBlueprint`].
//!
//! 校验规则：
//! - HTTPS sink: `cert_file_path`, `key_file_path`, `https_endpoint` required
//! - relay sink: enabled only by `relay_enabled=true`
//! - cloud sink: enabled by `cloud_ingest_endpoint`; database, table and credentials then required
//! - numeric keys parse and fall in range
//! - `backoff_base_ms <= backoff_cap_ms`

use contracts::{
    BufferSettings, CloudIngestSettings, Configuration, ContractError, DispatchSettings,
    ForwarderBlueprint, HttpsSettings, OverflowPolicy, RelaySettings, DEFAULT_BACKOFF_BASE_MS,
    DEFAULT_BACKOFF_CAP_MS, DEFAULT_BUFFER_CAPACITY, DEFAULT_CLOUD_AUTHORITY,
    DEFAULT_CLOUD_TIMEOUT_SECS, DEFAULT_DRAIN_BATCH_SIZE, DEFAULT_ENQUEUE_TIMEOUT_MS,
    DEFAULT_FATAL_EXIT_DELAY_SECS, DEFAULT_HTTPS_TIMEOUT_SECS, DEFAULT_RELAY_SOCKET_PATH,
    DEFAULT_RELAY_TAG, DEFAULT_RELAY_WRITE_TIMEOUT_SECS, DEFAULT_SHUTDOWN_FLUSH_TIMEOUT_SECS,
};
use ::validator::{Validate, ValidationErrors};

/// Build and validate the blueprint
///
/// Returns the first error encountered.
pub fn validate(config: &Configuration) -> Result<ForwarderBlueprint, ContractError> {
    let blueprint = ForwarderBlueprint {
        https: https_settings(config)?,
        relay: relay_settings(config)?,
        cloud: cloud_settings(config)?,
        buffer: buffer_settings(config)?,
        dispatch: dispatch_settings(config)?,
        fatal_exit_delay_secs: config
            .parse_or("fatal_exit_delay_secs", DEFAULT_FATAL_EXIT_DELAY_SECS)?,
    };

    validate_backoff(&blueprint.dispatch)?;
    Ok(blueprint)
}

fn required(config: &Configuration, key: &str) -> Result<String, ContractError> {
    config
        .non_empty(key)
        .map(str::to_string)
        .ok_or_else(|| ContractError::config_validation(key, "required key is missing"))
}

/// Map derive-validation failures back onto configuration keys
fn check<T: Validate>(settings: &T, key_of: fn(&str) -> String) -> Result<(), ContractError> {
    settings
        .validate()
        .map_err(|errors| first_error(&errors, key_of))
}

fn first_error(errors: &ValidationErrors, key_of: fn(&str) -> String) -> ContractError {
    let mut fields: Vec<_> = errors.field_errors().into_iter().collect();
    fields.sort_by(|a, b| a.0.cmp(&b.0));

    match fields.first() {
        Some((field, field_errors)) => {
            let message = field_errors
                .first()
                .and_then(|e| e.message.as_ref().map(|m| m.to_string()))
                .or_else(|| field_errors.first().map(|e| format!("failed '{}' check", e.code)))
                .unwrap_or_else(|| "invalid value".to_string());
            ContractError::config_validation(key_of(field), message)
        }
        None => ContractError::config_validation("config", errors.to_string()),
    }
}

fn https_settings(config: &Configuration) -> Result<HttpsSettings, ContractError> {
    let settings = HttpsSettings {
        cert_file_path: required(config, "cert_file_path")?,
        key_file_path: required(config, "key_file_path")?,
        endpoint: required(config, "https_endpoint")?,
        timeout_secs: config.parse_or("https_timeout_secs", DEFAULT_HTTPS_TIMEOUT_SECS)?,
    };
    check(&settings, |field| match field {
        "endpoint" => "https_endpoint".to_string(),
        "timeout_secs" => "https_timeout_secs".to_string(),
        other => other.to_string(),
    })?;
    Ok(settings)
}

fn relay_settings(config: &Configuration) -> Result<Option<RelaySettings>, ContractError> {
    if !config.flag("relay_enabled")?.unwrap_or(false) {
        return Ok(None);
    }

    let settings = RelaySettings {
        socket_path: config
            .get_or("relay_socket_path", DEFAULT_RELAY_SOCKET_PATH)
            .to_string(),
        tag: config.get_or("relay_tag", DEFAULT_RELAY_TAG).to_string(),
        write_timeout_secs: config
            .parse_or("relay_write_timeout_secs", DEFAULT_RELAY_WRITE_TIMEOUT_SECS)?,
    };
    check(&settings, |field| format!("relay_{field}"))?;
    Ok(Some(settings))
}

fn cloud_settings(config: &Configuration) -> Result<Option<CloudIngestSettings>, ContractError> {
    let Some(endpoint) = config.non_empty("cloud_ingest_endpoint") else {
        return Ok(None);
    };

    let settings = CloudIngestSettings {
        endpoint: endpoint.trim_end_matches('/').to_string(),
        database: required(config, "cloud_ingest_database")?,
        table: required(config, "cloud_ingest_table")?,
        tenant_id: required(config, "cloud_tenant_id")?,
        client_id: required(config, "cloud_client_id")?,
        client_secret: required(config, "cloud_client_secret")?,
        authority: config
            .get_or("cloud_authority", DEFAULT_CLOUD_AUTHORITY)
            .trim_end_matches('/')
            .to_string(),
        mapping: config.non_empty("cloud_ingest_mapping").map(str::to_string),
        timeout_secs: config.parse_or("cloud_timeout_secs", DEFAULT_CLOUD_TIMEOUT_SECS)?,
    };
    check(&settings, |field| match field {
        "endpoint" | "database" | "table" | "mapping" => format!("cloud_ingest_{field}"),
        other => format!("cloud_{other}"),
    })?;
    Ok(Some(settings))
}

fn buffer_settings(config: &Configuration) -> Result<BufferSettings, ContractError> {
    let settings = BufferSettings {
        capacity: config.parse_or("buffer_capacity", DEFAULT_BUFFER_CAPACITY)?,
        overflow_policy: config.parse_or("overflow_policy", OverflowPolicy::default())?,
        enqueue_timeout_ms: config.parse_or("enqueue_timeout_ms", DEFAULT_ENQUEUE_TIMEOUT_MS)?,
    };
    check(&settings, |field| match field {
        "capacity" => "buffer_capacity".to_string(),
        other => other.to_string(),
    })?;
    Ok(settings)
}

fn dispatch_settings(config: &Configuration) -> Result<DispatchSettings, ContractError> {
    let settings = DispatchSettings {
        backoff_base_ms: config.parse_or("backoff_base_ms", DEFAULT_BACKOFF_BASE_MS)?,
        backoff_cap_ms: config.parse_or("backoff_cap_ms", DEFAULT_BACKOFF_CAP_MS)?,
        drain_batch_size: config.parse_or("drain_batch_size", DEFAULT_DRAIN_BATCH_SIZE)?,
        shutdown_flush_timeout_secs: config.parse_or(
            "shutdown_flush_timeout_secs",
            DEFAULT_SHUTDOWN_FLUSH_TIMEOUT_SECS,
        )?,
    };
    check(&settings, |field| field.to_string())?;
    Ok(settings)
}

/// 校验退避范围
fn validate_backoff(dispatch: &DispatchSettings) -> Result<(), ContractError> {
    if dispatch.backoff_base_ms > dispatch.backoff_cap_ms {
        return Err(ContractError::config_validation(
            "backoff_base_ms / backoff_cap_ms",
            format!(
                "backoff_base_ms ({}) must be <= backoff_cap_ms ({})",
                dispatch.backoff_base_ms, dispatch.backoff_cap_ms
            ),
        ));
    }
    Ok(())
}
