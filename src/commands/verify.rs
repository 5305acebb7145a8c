use agentpin_engine::discovery::parse_revocation_document;
use agentpin_engine::{
    CredentialVerifier, DiscoveryDocument, DiscoveryMode, TrustBundle, VerificationResult,
};
use anyhow::Context;
use clap::ArgMatches;
use std::io::Read;
use std::path::PathBuf;

use super::{load_config, read_json};

pub async fn run(matches: &ArgMatches, config_path: Option<&str>) -> anyhow::Result<bool> {
    let credential = read_credential(
        matches
            .get_one::<String>("credential")
            .context("credential argument is required")?,
    )?;
    let required: Option<Vec<String>> = matches
        .get_many::<String>("require")
        .map(|values| values.cloned().collect());
    let required = required.as_deref();
    let config = load_config(config_path)?;

    let bundle_path = matches
        .get_one::<String>("bundle")
        .map(PathBuf::from)
        .or_else(|| match config.discovery_mode {
            DiscoveryMode::Bundle => config.trust_bundle_path.clone(),
            DiscoveryMode::WellKnown => None,
        });
    let discovery_path = matches.get_one::<String>("discovery");

    let verifier = if bundle_path.is_some() || discovery_path.is_some() {
        CredentialVerifier::offline(config)?
    } else {
        CredentialVerifier::from_config(config)?
    };

    let result = if let Some(discovery_path) = discovery_path {
        let discovery: DiscoveryDocument = read_json(discovery_path)?;
        let revocation = match matches.get_one::<String>("revocation") {
            Some(path) => {
                let body: serde_json::Value = read_json(path)?;
                let fetched_at = std::fs::metadata(path)
                    .and_then(|m| m.modified())
                    .with_context(|| format!("reading modification time of {}", path))?;
                let state = parse_revocation_document(body, fetched_at.into())
                    .map_err(|reason| anyhow::anyhow!("{}: {}", path, reason))?;
                Some(state)
            }
            None => None,
        };
        verifier.verify_credential_offline(&credential, &discovery, revocation.as_ref(), required)
    } else if let Some(bundle_path) = bundle_path {
        let bundle = TrustBundle::load(&bundle_path)?;
        verifier.verify_credential_with_bundle(&credential, &bundle, required)
    } else {
        verifier.verify_credential(&credential, required).await
    };

    if let Err(e) = verifier.pin_store().flush() {
        tracing::warn!("Failed to persist AgentPin key store: {}", e);
    }

    println!("{}", serde_json::to_string_pretty(&render(&result))?);
    Ok(result.is_verified())
}

fn read_credential(arg: &str) -> anyhow::Result<String> {
    if arg != "-" {
        return Ok(arg.to_string());
    }
    let mut buf = String::new();
    std::io::stdin()
        .read_to_string(&mut buf)
        .context("reading credential from stdin")?;
    Ok(buf.trim().to_string())
}

fn render(result: &VerificationResult) -> serde_json::Value {
    let error = result.error().map(|e| {
        serde_json::json!({
            "kind": e.kind(),
            "message": e.to_string(),
        })
    });
    serde_json::json!({
        "verified": result.is_verified(),
        "evidence_source": result.evidence_source,
        "claims": result.claims,
        "error": error,
        "warnings": result.warnings,
    })
}
