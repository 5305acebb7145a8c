use agentpin_engine::{generate_key_id, generate_key_pair, public_key_to_pem};
use anyhow::Context;
use clap::ArgMatches;
use std::fs;
use std::path::Path;

pub fn run(matches: &ArgMatches) -> anyhow::Result<bool> {
    let out = matches
        .get_one::<String>("out")
        .context("--out is required")?;

    let pair = generate_key_pair()?;
    let kid = matches
        .get_one::<String>("kid")
        .cloned()
        .unwrap_or_else(|| generate_key_id(pair.public_key()));

    let format = matches
        .get_one::<String>("format")
        .map(String::as_str)
        .unwrap_or("jwk");

    if format == "pem" {
        write_secret(Path::new(out), &pair.to_pkcs8_pem()?)?;
        tracing::info!("Wrote PKCS#8 private key {} to {}", kid, out);
        print!("{}", public_key_to_pem(pair.public_key())?);
    } else {
        let json = serde_json::to_string_pretty(&pair.to_private_jwk(&kid))?;
        write_secret(Path::new(out), &json)?;
        tracing::info!("Wrote private key {} to {}", kid, out);
        println!("{}", serde_json::to_string_pretty(&pair.public_jwk(&kid))?);
    }
    Ok(true)
}

fn write_secret(path: &Path, content: &str) -> anyhow::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("creating {}", parent.display()))?;
    }
    fs::write(path, content).with_context(|| format!("writing {}", path.display()))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(0o600))
            .with_context(|| format!("restricting permissions on {}", path.display()))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use agentpin_engine::{KeyPair, PrivateJwk};
    use tempfile::TempDir;

    #[test]
    fn test_written_key_loads_back() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("keys/issuer.json");
        let pair = generate_key_pair().unwrap();

        let json = serde_json::to_string_pretty(&pair.to_private_jwk("k1")).unwrap();
        write_secret(&path, &json).unwrap();

        let loaded: PrivateJwk =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        let restored = KeyPair::from_private_jwk(&loaded).unwrap();
        assert_eq!(restored.public_key(), pair.public_key());

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = fs::metadata(&path).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o600);
        }
    }
}
