//! Operator CLI for onboarding partners and issuing contributor tokens.
//!
//! ```text
//! provision partner <name> <email> [tier1|tier2|tier3] [balance]
//! provision token <contributor_id>
//! ```

use std::{env, process, str::FromStr};

use bandshare_domain::config::{hydrate_env_file, ConfigError};
use bandshare_domain::model::{
    generate_hex_secret, ContributorId, CredentialError, NewContributorToken, NewPartner,
    PartnerCredentials, PartnerId, PricingTier, TokenHash,
};
use bandshare_domain::storage::{EarningsStore, PartnerStore, StorageError, TokenStore};
use bandshare_storage::SeaOrmStorage;
use chrono::Utc;
use thiserror::Error;

const USAGE: &str = "Usage:\n  provision partner <name> <email> [tier1|tier2|tier3] [balance]\n  provision token <contributor_id>";
const DEFAULT_STARTING_BALANCE: f64 = 100.0;
const TOKEN_BYTES: usize = 32;

#[derive(Debug, Error)]
enum ProvisionError {
    #[error("{0}")]
    Usage(String),
    #[error("config error: {0}")]
    Config(#[from] ConfigError),
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
    #[error("credential error: {0}")]
    Credentials(#[from] CredentialError),
}

#[tokio::main]
async fn main() {
    let args: Vec<String> = env::args().skip(1).collect();
    if let Err(err) = run(&args).await {
        eprintln!("{err}");
        if matches!(err, ProvisionError::Usage(_)) {
            eprintln!("{USAGE}");
        }
        process::exit(1);
    }
}

async fn run(args: &[String]) -> Result<(), ProvisionError> {
    let (command, rest) = args
        .split_first()
        .ok_or_else(|| ProvisionError::Usage("missing command".into()))?;
    match command.as_str() {
        "partner" => provision_partner(rest).await,
        "token" => provision_token(rest).await,
        other => Err(ProvisionError::Usage(format!("unknown command `{other}`"))),
    }
}

async fn connect() -> Result<SeaOrmStorage, ProvisionError> {
    hydrate_env_file()?;
    let url = env::var("DATABASE_URL")
        .ok()
        .filter(|value| !value.trim().is_empty())
        .ok_or(ConfigError::MissingVar {
            key: "DATABASE_URL",
        })?;
    Ok(SeaOrmStorage::connect(url.trim()).await?)
}

async fn provision_partner(args: &[String]) -> Result<(), ProvisionError> {
    let [name, email, optional @ ..] = args else {
        return Err(ProvisionError::Usage("partner needs <name> <email>".into()));
    };
    let tier = match optional.first() {
        Some(raw) => PricingTier::from_str(&raw.to_ascii_lowercase())
            .map_err(|_| ProvisionError::Usage(format!("unknown tier `{raw}`")))?,
        None => PricingTier::Tier1,
    };
    let balance = match optional.get(1) {
        Some(raw) => raw
            .parse::<f64>()
            .ok()
            .filter(|value| value.is_finite() && *value >= 0.0)
            .ok_or_else(|| ProvisionError::Usage(format!("invalid balance `{raw}`")))?,
        None => DEFAULT_STARTING_BALANCE,
    };

    let storage = connect().await?;
    let credentials = PartnerCredentials::generate()?;
    let partner = storage
        .insert_partner(NewPartner {
            id: PartnerId::generate()?,
            name: name.clone(),
            email: email.clone(),
            api_key: credentials.api_key.clone(),
            api_secret_hash: credentials.secret_hash(),
            pricing_tier: tier,
            price_per_gb: tier.price_per_gb(),
            balance,
            created_at: Utc::now(),
        })
        .await?;

    println!("Partner ID: {}", partner.id);
    println!("Tier: {} (${:.2}/GB)", tier.label(), partner.price_per_gb);
    println!("Balance: ${:.2}", partner.balance);
    println!("API key: {}", credentials.api_key);
    println!("API secret: {}", credentials.api_secret);
    println!("The secret is not stored and will not be shown again.");
    Ok(())
}

async fn provision_token(args: &[String]) -> Result<(), ProvisionError> {
    let [contributor] = args else {
        return Err(ProvisionError::Usage("token needs <contributor_id>".into()));
    };
    let contributor = contributor.trim();
    if contributor.is_empty() {
        return Err(ProvisionError::Usage("contributor id must not be empty".into()));
    }

    let storage = connect().await?;
    let contributor = ContributorId::from(contributor);
    let raw_token = generate_hex_secret(TOKEN_BYTES)?;
    let now = Utc::now();
    storage
        .insert_token(NewContributorToken {
            token_hash: TokenHash::of(&raw_token),
            contributor_id: contributor.clone(),
            issued_at: now,
        })
        .await?;
    storage.ensure_earnings(&contributor, now).await?;

    println!("Contributor: {contributor}");
    println!("Bearer token: {raw_token}");
    Ok(())
}
