//! Command-line settings
//!
//! Builds a [`PerchConfig`] from an optional JSON file plus flag overrides.

use anyhow::{Context, Result};
use colored::Colorize;
use perch_core::PerchConfig;
use perch_registry::{Change, Instance, RegistrationState};
use std::path::Path;
use tokio::sync::watch;

/// Log filter for a `-v` count
pub fn log_filter(verbose: u8) -> &'static str {
    match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    }
}

/// Parse a `key=value` tag
pub fn parse_tag(raw: &str) -> std::result::Result<(String, String), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("tag {:?} must be key=value", raw))?;
    if key.is_empty() {
        return Err(format!("tag {:?} has an empty key", raw));
    }
    Ok((key.to_string(), value.to_string()))
}

/// Split a comma separated endpoint list
pub fn parse_endpoints(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|e| !e.is_empty())
        .map(String::from)
        .collect()
}

/// Load the config file (if any) and apply flag overrides
pub fn load_config(
    path: Option<&Path>,
    endpoints: Option<&str>,
    prefix: Option<&str>,
) -> Result<PerchConfig> {
    let mut config = match path {
        Some(path) => PerchConfig::from_json_file(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => PerchConfig::default(),
    };

    if let Some(endpoints) = endpoints {
        config.store.endpoints = parse_endpoints(endpoints);
    }
    if let Some(prefix) = prefix {
        config.registry.key_prefix = Some(prefix.to_string());
    }

    config.validate().context("Invalid configuration")?;
    Ok(config)
}

/// Next published registration state
///
/// Yields None once the registration is gone and clears `rx`, after which
/// it never resolves.
pub async fn next_state(
    rx: &mut Option<watch::Receiver<RegistrationState>>,
) -> Option<RegistrationState> {
    let Some(receiver) = rx.as_mut() else {
        return std::future::pending().await;
    };
    match receiver.changed().await {
        Ok(()) => Some(*receiver.borrow_and_update()),
        Err(_) => {
            *rx = None;
            None
        }
    }
}

/// One instance as a single line
pub fn format_instance(instance: &Instance) -> String {
    let mut line = format!(
        "{} {} weight={}",
        instance.network, instance.address, instance.weight
    );
    for (key, value) in &instance.tags {
        line.push_str(&format!(" {}={}", key, value));
    }
    line
}

/// Print a diff, one line per changed instance
pub fn print_change(change: &Change) {
    for instance in &change.added {
        println!("  {} {}", "+".green().bold(), format_instance(instance));
    }
    for instance in &change.updated {
        println!("  {} {}", "~".yellow().bold(), format_instance(instance));
    }
    for instance in &change.removed {
        println!("  {} {}", "-".red().bold(), format_instance(instance));
    }
}
