use agentpin_engine::{
    generate_key_id, issue_credential_with, CredentialRequest, KeyPair, PrivateJwk,
};
use anyhow::Context;
use clap::ArgMatches;

pub fn run(matches: &ArgMatches) -> anyhow::Result<bool> {
    let key_path = matches
        .get_one::<String>("key")
        .context("--key is required")?;
    let issuer = matches
        .get_one::<String>("issuer")
        .context("--issuer is required")?;
    let agent = matches
        .get_one::<String>("agent")
        .context("--agent is required")?;
    let ttl = *matches
        .get_one::<i64>("ttl")
        .context("--ttl is required")?;
    let capabilities: Vec<String> = matches
        .get_many::<String>("capability")
        .map(|values| values.cloned().collect())
        .unwrap_or_default();

    let content =
        std::fs::read_to_string(key_path).with_context(|| format!("reading {}", key_path))?;
    let (pair, key_kid) = load_signing_key(&content)
        .with_context(|| format!("loading signing key {}", key_path))?;
    let kid = matches.get_one::<String>("kid").cloned().unwrap_or(key_kid);

    let mut request = CredentialRequest::new(&kid, issuer, agent, capabilities, ttl);
    if let Some(audience) = matches.get_one::<String>("audience") {
        request = request.with_audience(audience);
    }

    println!("{}", issue_credential_with(&pair, request)?);
    Ok(true)
}

/// Accepts a private JWK or a PKCS#8 PEM key. PEM keys carry no key id, so
/// the public key thumbprint stands in unless `--kid` overrides it.
fn load_signing_key(content: &str) -> anyhow::Result<(KeyPair, String)> {
    if content.trim_start().starts_with("-----BEGIN") {
        let pair = KeyPair::from_pkcs8_pem(content)?;
        let kid = generate_key_id(pair.public_key());
        return Ok((pair, kid));
    }
    let private: PrivateJwk = serde_json::from_str(content).context("parsing private JWK")?;
    let pair = KeyPair::from_private_jwk(&private)?;
    Ok((pair, private.public.kid.clone()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use agentpin_engine::generate_key_pair;

    #[test]
    fn test_loads_pem_and_jwk_keys() {
        let pair = generate_key_pair().unwrap();

        let pem = pair.to_pkcs8_pem().unwrap();
        let (from_pem, kid) = load_signing_key(&pem).unwrap();
        assert_eq!(from_pem.public_key(), pair.public_key());
        assert_eq!(kid, generate_key_id(pair.public_key()));

        let jwk = serde_json::to_string(&pair.to_private_jwk("k7")).unwrap();
        let (from_jwk, kid) = load_signing_key(&jwk).unwrap();
        assert_eq!(from_jwk.public_key(), pair.public_key());
        assert_eq!(kid, "k7");
    }

    #[test]
    fn test_rejects_unrecognised_key_file() {
        assert!(load_signing_key("hello").is_err());
    }
}
