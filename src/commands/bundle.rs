use agentpin_engine::{EvidenceResolver, HttpEvidenceFetcher, TrustBundle};
use anyhow::Context;
use clap::ArgMatches;
use std::path::Path;
use std::sync::Arc;

use super::load_config;

pub async fn run(matches: &ArgMatches, config_path: Option<&str>) -> anyhow::Result<bool> {
    match matches.subcommand() {
        Some(("export", sub_matches)) => export(sub_matches, config_path).await,
        Some(("inspect", sub_matches)) => inspect(sub_matches),
        _ => anyhow::bail!("unknown bundle command"),
    }
}

async fn export(matches: &ArgMatches, config_path: Option<&str>) -> anyhow::Result<bool> {
    let issuers: Vec<String> = matches
        .get_many::<String>("issuers")
        .context("at least one issuer is required")?
        .cloned()
        .collect();
    let out = matches
        .get_one::<String>("out")
        .context("--out is required")?;

    let config = load_config(config_path)?;
    let fetcher = Arc::new(HttpEvidenceFetcher::new(config.fetch_timeout())?);
    let resolver = EvidenceResolver::new(fetcher, &config);

    let bundle = resolver.export_bundle(&issuers).await?;
    bundle.save(Path::new(out))?;

    println!("Exported {} issuer(s) to {}", bundle.len(), out);
    Ok(true)
}

fn inspect(matches: &ArgMatches) -> anyhow::Result<bool> {
    let file = matches
        .get_one::<String>("file")
        .context("bundle file is required")?;
    let bundle = TrustBundle::load(Path::new(file))?;
    let now = std::time::SystemTime::now().into();

    println!(
        "Trust bundle {} (created {}, {}s old)",
        file,
        bundle.created_at,
        bundle.age_secs(now)
    );
    for (issuer, entry) in &bundle.entries {
        let kids: Vec<&str> = entry.discovery.keys.iter().map(|k| k.kid.as_str()).collect();
        println!("  {}", issuer);
        println!("    keys: {}", kids.join(", "));
        match &entry.revocation_snapshot {
            Some(state) => println!(
                "    revocation: as of {} ({} kid(s), {} credential(s), {} agent(s) revoked)",
                state.as_of,
                state.revoked_kids.len(),
                state.revoked_credential_ids.len(),
                state.revoked_agent_ids.len()
            ),
            None => println!("    revocation: no snapshot"),
        }
    }
    Ok(true)
}
