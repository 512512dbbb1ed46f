// Import and re-export the `error` module
pub use self::error::{Error, Result};
mod error;

use std::sync::Arc;

use clap::Parser;
use cli::{Cli, Commands};
use tunnistamo_core::authentication::{Authenticator, signature};
use tunnistamo_core::models::{Assertion, Organization, RawAttributes};
use tunnistamo_core::verification::email::{placeholder_address, validate_candidate};
use tunnistamo_core::verification::metadata::MetadataCollector;
use tunnistamo_core::{InMemoryStore, SignIn, TunnistamoConfig};

mod cli;
mod logging;

fn main() -> Result<()> {
    if let Err(e) = run() {
        log::error!("{}", e);
        std::process::exit(1);
    }
    Ok(())
}

fn run() -> Result<()> {
    dotenvy::dotenv().ok();
    logging::init()?;

    let args = Cli::parse();

    match &args.command {
        Commands::Version => {
            println!("{} {}", env!("CARGO_PKG_NAME"), tunnistamo_core::version());
        }
        Commands::Digest { subject } => {
            let config = load_config(&args)?;
            println!("{}", digest(&config, subject)?);
        }
        Commands::Signature { uid, provider } => {
            let config = load_config(&args)?;
            let provider = provider.as_deref().unwrap_or(&config.provider);
            println!("{}", signature(provider, uid, &config.secret_key_base));
        }
        Commands::PlaceholderEmail { subject, host } => {
            let config = load_config(&args)?;
            let digest = digest(&config, subject)?;
            println!(
                "{}",
                placeholder_address(&digest, config.placeholder_domain(host))
            );
        }
        Commands::CheckEmail { email } => {
            let config = load_config(&args)?;
            let normalized = validate_candidate(email, &config.disposable_domains)
                .map_err(|e| Error::Custom(format!("{email}: {e}")))?;
            println!("{normalized}");
        }
        Commands::Config => {
            let config = load_config(&args)?;
            print_config(&config);
        }
        Commands::SignIn { assertion, host } => {
            let config = load_config(&args)?;
            let assertion: Assertion =
                serde_json::from_str(&std::fs::read_to_string(assertion)?)?;
            sign_in(config, assertion, host)?;
        }
    }

    Ok(())
}

fn load_config(args: &Cli) -> Result<TunnistamoConfig> {
    let mut config = TunnistamoConfig::from_env()?;
    if let Some(secret) = &args.secret_key_base {
        config.secret_key_base = secret.clone();
    }
    Ok(config)
}

fn digest(config: &TunnistamoConfig, subject: &str) -> Result<String> {
    let raw = RawAttributes::with_subject(subject);
    MetadataCollector::new(&raw, &config.secret_key_base)
        .person_identifier_digest()
        .ok_or_else(|| Error::Custom("subject must not be blank".to_string()))
}

fn print_config(config: &TunnistamoConfig) {
    println!("provider: {}", config.provider);
    println!("confirm_emails: {}", config.confirm_emails);
    println!(
        "auto_email_domain: {}",
        config.auto_email_domain.as_deref().unwrap_or("(organization host)")
    );
    println!(
        "strong_identity_providers: {}",
        config.strong_identity_providers.join(",")
    );
    println!("code_ttl_minutes: {}", config.code_ttl_minutes);
    println!(
        "max_confirmation_attempts: {}",
        config.max_confirmation_attempts
    );
    println!("disposable_domains: {}", config.disposable_domains.len());
    println!("application_host: {}", config.application_host);
}

fn sign_in(config: TunnistamoConfig, assertion: Assertion, host: &str) -> Result<()> {
    let organization = Organization::new(host);
    let params = Authenticator::new(&config, &organization, &assertion).registration_params();
    println!("{}", serde_json::to_string_pretty(&params)?);

    let runtime = tokio::runtime::Runtime::new()?;
    let signin = SignIn::new(Arc::new(config), Arc::new(InMemoryStore::new()));
    let outcome = runtime.block_on(signin.sign_in(&organization, &assertion, None))?;
    println!(
        "{}",
        serde_json::json!({
            "accountId": outcome.account.id,
            "email": outcome.account.email,
            "registered": outcome.registered,
            "needsEmailConfirmation": outcome.needs_email_confirmation,
            "forgetRememberedSession": outcome.forget_remembered_session,
        })
    );
    Ok(())
}
