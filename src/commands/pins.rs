use agentpin_engine::{from_jwk, Jwk, KeyPinStore};
use anyhow::Context;
use clap::ArgMatches;

use super::{load_config, read_json};

pub fn run(matches: &ArgMatches, config_path: Option<&str>) -> anyhow::Result<bool> {
    let config = load_config(config_path)?;
    let store_path = config
        .key_store_path
        .context("no pin store configured (key_store_path / AGENTPIN_KEY_STORE_PATH)")?;
    let store = KeyPinStore::open(&store_path)?;

    match matches.subcommand() {
        Some(("list", _)) => {
            let records = store.records();
            if records.is_empty() {
                println!("No pinned keys in {}", store_path.display());
            }
            for record in records {
                println!(
                    "{}  {}  x={}  first_seen={}  last_seen={}",
                    record.issuer,
                    record.kid,
                    record.pinned_key.x,
                    record.first_seen,
                    record.last_seen
                );
            }
            Ok(true)
        }
        Some(("repin", sub_matches)) => {
            let (issuer, kid) = issuer_and_kid(sub_matches)?;
            let jwk_path = sub_matches
                .get_one::<String>("jwk")
                .context("--jwk is required")?;
            let jwk: Jwk = read_json(jwk_path)?;
            from_jwk(&jwk).with_context(|| format!("validating {}", jwk_path))?;

            store.repin(issuer, kid, &jwk);
            store.flush()?;
            println!("Repinned {} {}", issuer, kid);
            Ok(true)
        }
        Some(("remove", sub_matches)) => {
            let (issuer, kid) = issuer_and_kid(sub_matches)?;
            if store.remove(issuer, kid).is_none() {
                println!("No pin for {} {}", issuer, kid);
                return Ok(false);
            }
            store.flush()?;
            println!("Removed pin for {} {}", issuer, kid);
            Ok(true)
        }
        _ => anyhow::bail!("unknown pins command"),
    }
}

fn issuer_and_kid(matches: &ArgMatches) -> anyhow::Result<(&String, &String)> {
    let issuer = matches
        .get_one::<String>("issuer")
        .context("--issuer is required")?;
    let kid = matches
        .get_one::<String>("kid")
        .context("--kid is required")?;
    Ok((issuer, kid))
}
