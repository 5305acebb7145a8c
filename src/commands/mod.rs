pub mod bundle;
pub mod issue;
pub mod keygen;
pub mod pins;
pub mod verify;

use agentpin_engine::VerifierConfig;
use anyhow::Context;
use std::path::Path;

/// Config from `--config` when given, defaults plus `AGENTPIN_*` otherwise.
pub fn load_config(path: Option<&str>) -> anyhow::Result<VerifierConfig> {
    match path {
        Some(path) => VerifierConfig::from_file(Path::new(path))
            .with_context(|| format!("loading config {}", path)),
        None => VerifierConfig::from_env().context("reading AGENTPIN_* environment"),
    }
}

pub fn read_json<T: serde::de::DeserializeOwned>(path: &str) -> anyhow::Result<T> {
    let content =
        std::fs::read_to_string(path).with_context(|| format!("reading {}", path))?;
    serde_json::from_str(&content).with_context(|| format!("parsing {}", path))
}
