// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::path::{Path, PathBuf};

use anyhow::Context;
use serde_yaml::Value as YamlValue;
use tracing::debug;

use crate::Config;

/// Environment variable that pins an extra config file without touching the
/// command line.  It ranks above the discovered layers and below `--config`.
pub const CONFIG_ENV_VAR: &str = "MAESTRO_CONFIG";

/// One parsed configuration layer, kept with its origin for diagnostics.
struct Layer {
    origin: PathBuf,
    value: YamlValue,
}

/// Candidate files from lowest to highest priority: machine-wide defaults,
/// the user's config directory, project-local files in the working
/// directory, then the operator-pinned `MAESTRO_CONFIG` file.
fn discovery_order() -> Vec<PathBuf> {
    let mut candidates = Vec::new();

    for name in ["config.yaml", "config.yml"] {
        candidates.push(Path::new("/etc/maestro").join(name));
    }
    if let Some(base) = dirs::config_dir() {
        for name in ["config.yaml", "config.yml"] {
            candidates.push(base.join("maestro").join(name));
        }
    }
    for name in [".maestro.yaml", "maestro.yaml", "maestro.yml"] {
        candidates.push(PathBuf::from(name));
    }
    if let Ok(pinned) = std::env::var(CONFIG_ENV_VAR) {
        if !pinned.is_empty() {
            candidates.push(PathBuf::from(pinned));
        }
    }

    candidates
}

/// Parse one candidate file.  Optional candidates that do not exist resolve
/// to `None`; a `required` candidate (the explicit `--config` path) must
/// exist and parse.
fn read_layer(path: &Path, required: bool) -> anyhow::Result<Option<Layer>> {
    if !path.is_file() {
        if required {
            anyhow::bail!("config file {} does not exist", path.display());
        }
        return Ok(None);
    }
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading config file {}", path.display()))?;
    let value: YamlValue = serde_yaml::from_str(&text)
        .with_context(|| format!("parsing config file {}", path.display()))?;
    Ok(Some(Layer {
        origin: path.to_path_buf(),
        value,
    }))
}

/// Overlay `patch` onto `base`.
///
/// Mappings combine key by key, so a later layer can adjust a single server
/// or RAG source entry without restating the whole table.  Scalars and
/// sequences replace the base value outright — tool lists and group lists
/// are not appended across layers.
fn overlay(base: YamlValue, patch: YamlValue) -> YamlValue {
    match (base, patch) {
        (YamlValue::Mapping(mut merged), YamlValue::Mapping(patch)) => {
            for (key, patch_value) in patch {
                let combined = match merged.remove(&key) {
                    Some(existing) => overlay(existing, patch_value),
                    None => patch_value,
                };
                merged.insert(key, combined);
            }
            YamlValue::Mapping(merged)
        }
        (_, replacement) => replacement,
    }
}

/// Load configuration by overlaying every discovered layer in priority
/// order.  The `extra` argument is the explicit `--config` path and always
/// wins.  The merged result must deserialize cleanly and pass
/// [`Config::validate`].
pub fn load(extra: Option<&Path>) -> anyhow::Result<Config> {
    let mut layers = Vec::new();
    for candidate in discovery_order() {
        if let Some(layer) = read_layer(&candidate, false)? {
            layers.push(layer);
        }
    }
    if let Some(path) = extra {
        let layer = read_layer(path, true)?.expect("required layer exists after read");
        layers.push(layer);
    }

    if layers.is_empty() {
        return Ok(Config::default());
    }

    for layer in &layers {
        debug!(origin = %layer.origin.display(), "applying config layer");
    }
    let merged = layers
        .into_iter()
        .map(|layer| layer.value)
        .reduce(overlay)
        .expect("at least one layer");

    let config: Config =
        serde_yaml::from_value(merged).context("deserializing merged configuration")?;
    config.validate()?;
    Ok(config)
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
