#![allow(clippy::multiple_crate_versions)]

use clap::{Arg, ArgAction, Command};

mod commands;

const VERSION: &str = env!("CARGO_PKG_VERSION");

fn issuer_kid_args(cmd: Command) -> Command {
    cmd.arg(
        Arg::new("issuer")
            .long("issuer")
            .value_name("DOMAIN")
            .help("Issuer domain of the pin")
            .required(true),
    )
    .arg(
        Arg::new("kid")
            .long("kid")
            .value_name("KID")
            .help("Key id of the pin")
            .required(true),
    )
}

fn cli() -> Command {
    Command::new("agentpin")
        .version(VERSION)
        .about("AgentPin - domain-anchored identity credentials for AI agents")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("Verifier config (TOML); AGENTPIN_* environment variables otherwise")
                .global(true),
        )
        .subcommand(
            Command::new("keygen")
                .about("Generate a P-256 signing key")
                .arg(
                    Arg::new("out")
                        .short('o')
                        .long("out")
                        .value_name("FILE")
                        .help("Where to write the private key")
                        .required(true),
                )
                .arg(
                    Arg::new("kid")
                        .long("kid")
                        .value_name("KID")
                        .help("Key id; defaults to the SHA-256 thumbprint of the public key"),
                )
                .arg(
                    Arg::new("format")
                        .long("format")
                        .value_name("FORMAT")
                        .help("Private key encoding")
                        .value_parser(["jwk", "pem"])
                        .default_value("jwk"),
                ),
        )
        .subcommand(
            Command::new("issue")
                .about("Issue a signed credential")
                .arg(
                    Arg::new("key")
                        .short('k')
                        .long("key")
                        .value_name("FILE")
                        .help("Private key: JWK from keygen, or PKCS#8 PEM")
                        .required(true),
                )
                .arg(
                    Arg::new("kid")
                        .long("kid")
                        .value_name("KID")
                        .help("Key id for the header; defaults to the JWK kid or the PEM key thumbprint"),
                )
                .arg(
                    Arg::new("issuer")
                        .long("issuer")
                        .value_name("DOMAIN")
                        .help("Issuer domain")
                        .required(true),
                )
                .arg(
                    Arg::new("agent")
                        .long("agent")
                        .value_name("AGENT_ID")
                        .help("Agent identifier (sub)")
                        .required(true),
                )
                .arg(
                    Arg::new("capability")
                        .long("capability")
                        .value_name("CAP")
                        .help("Granted capability; repeatable")
                        .action(ArgAction::Append),
                )
                .arg(
                    Arg::new("ttl")
                        .long("ttl")
                        .value_name("SECONDS")
                        .help("Credential lifetime in seconds")
                        .value_parser(clap::value_parser!(i64))
                        .required(true),
                )
                .arg(
                    Arg::new("audience")
                        .long("audience")
                        .value_name("DOMAIN")
                        .help("Intended verifier (aud)"),
                ),
        )
        .subcommand(
            Command::new("verify")
                .about("Verify a credential")
                .arg(
                    Arg::new("credential")
                        .value_name("CREDENTIAL")
                        .help("Compact credential, or '-' to read stdin")
                        .required(true),
                )
                .arg(
                    Arg::new("discovery")
                        .long("discovery")
                        .value_name("FILE")
                        .help("Pre-fetched discovery document (offline mode)")
                        .conflicts_with("bundle"),
                )
                .arg(
                    Arg::new("revocation")
                        .long("revocation")
                        .value_name("FILE")
                        .help("Pre-fetched revocation document")
                        .requires("discovery"),
                )
                .arg(
                    Arg::new("bundle")
                        .long("bundle")
                        .value_name("FILE")
                        .help("Trust bundle (bundle mode)"),
                )
                .arg(
                    Arg::new("require")
                        .long("require")
                        .value_name("CAP")
                        .help("Required capability; repeatable")
                        .action(ArgAction::Append),
                ),
        )
        .subcommand(
            Command::new("bundle")
                .about("Manage trust bundles")
                .subcommand_required(true)
                .subcommand(
                    Command::new("export")
                        .about("Fetch issuers over the network into a trust bundle")
                        .arg(
                            Arg::new("issuers")
                                .value_name("DOMAIN")
                                .help("Issuer domains to include")
                                .num_args(1..)
                                .required(true),
                        )
                        .arg(
                            Arg::new("out")
                                .short('o')
                                .long("out")
                                .value_name("FILE")
                                .help("Bundle output path")
                                .required(true),
                        ),
                )
                .subcommand(
                    Command::new("inspect")
                        .about("Summarize a trust bundle")
                        .arg(
                            Arg::new("file")
                                .value_name("FILE")
                                .help("Bundle to inspect")
                                .required(true),
                        ),
                ),
        )
        .subcommand(
            Command::new("pins")
                .about("Administer the TOFU pin store")
                .subcommand_required(true)
                .subcommand(Command::new("list").about("List pinned keys"))
                .subcommand(
                    issuer_kid_args(Command::new("repin").about("Replace a pinned key")).arg(
                        Arg::new("jwk")
                            .long("jwk")
                            .value_name("FILE")
                            .help("Public JWK to pin")
                            .required(true),
                    ),
                )
                .subcommand(issuer_kid_args(
                    Command::new("remove").about("Forget a pinned key"),
                )),
        )
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let matches = cli().get_matches();
    let config_path = matches.get_one::<String>("config").cloned();

    let result = match matches.subcommand() {
        Some(("keygen", sub_matches)) => commands::keygen::run(sub_matches),
        Some(("issue", sub_matches)) => commands::issue::run(sub_matches),
        Some(("verify", sub_matches)) => {
            commands::verify::run(sub_matches, config_path.as_deref()).await
        }
        Some(("bundle", sub_matches)) => {
            commands::bundle::run(sub_matches, config_path.as_deref()).await
        }
        Some(("pins", sub_matches)) => commands::pins::run(sub_matches, config_path.as_deref()),
        _ => {
            println!("AgentPin v{}", VERSION);
            println!("Use --help for available commands");
            Ok(true)
        }
    };

    match result {
        Ok(true) => {}
        Ok(false) => std::process::exit(1),
        Err(e) => {
            eprintln!("Error: {:#}", e);
            std::process::exit(2);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_definition_is_consistent() {
        cli().debug_assert();
    }

    #[test]
    fn test_verify_modes_conflict() {
        let result = cli().try_get_matches_from([
            "agentpin",
            "verify",
            "token",
            "--discovery",
            "d.json",
            "--bundle",
            "b.json",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn test_repeatable_capabilities() {
        let matches = cli()
            .try_get_matches_from([
                "agentpin",
                "issue",
                "--key",
                "k.json",
                "--issuer",
                "a.example",
                "--agent",
                "agent-1",
                "--capability",
                "read",
                "--capability",
                "write",
                "--ttl",
                "300",
            ])
            .unwrap();
        let (_, sub) = matches.subcommand().unwrap();
        let caps: Vec<&String> = sub.get_many::<String>("capability").unwrap().collect();
        assert_eq!(caps, vec!["read", "write"]);
        assert_eq!(sub.get_one::<i64>("ttl"), Some(&300));
    }
}
