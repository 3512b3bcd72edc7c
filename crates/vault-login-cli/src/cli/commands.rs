use std::io::{Read, Write};

use anyhow::{bail, Context, Result};
use serde::Serialize;
use vault_login::config::{resolve_cache, ConfigFile};
use vault_login::{CredentialCache, CredentialHelper, HelperConfig, VaultLoginError};

use super::args::{Cli, Command};
use crate::exit_codes;
use crate::logging;

pub const NOT_IMPLEMENTED: &str = "not implemented";

/// Credentials in the shape Docker expects from `get`.
#[derive(Debug, Serialize)]
struct HelperCredentials<'a> {
    #[serde(rename = "ServerURL")]
    server_url: &'a str,
    #[serde(rename = "Username")]
    username: &'a str,
    #[serde(rename = "Secret")]
    secret: &'a str,
}

fn env(key: &str) -> Option<String> {
    std::env::var(key).ok()
}

pub async fn dispatch(cli: Cli) -> i32 {
    let result = match cli.cmd {
        Command::Store | Command::Erase | Command::List => {
            println!("{}", NOT_IMPLEMENTED);
            return exit_codes::NOT_IMPLEMENTED;
        }
        Command::Version => {
            println!("docker-credential-vault-login {}", env!("CARGO_PKG_VERSION"));
            return exit_codes::SUCCESS;
        }
        Command::Get => {
            let stdout = std::io::stdout();
            get(std::io::stdin().lock(), &mut stdout.lock()).await
        }
        Command::ClearCache => clear_cache().await,
    };

    match result {
        Ok(()) => exit_codes::SUCCESS,
        Err(e) => {
            tracing::error!(error = %format!("{:#}", e), "command failed");
            // Helper protocol: errors are reported on stdout.
            println!("{}", e);
            e.downcast_ref::<VaultLoginError>()
                .map(VaultLoginError::exit_code)
                .unwrap_or(exit_codes::INTERNAL_ERROR)
        }
    }
}

/// Config file plus logging; logging problems only produce a warning.
fn load_config_file() -> Result<ConfigFile> {
    let file = ConfigFile::locate(env)?;
    let setup = logging::log_dir(env(logging::ENV_LOG_DIR), file.log_dir.as_deref())
        .and_then(|dir| logging::init(&dir));
    if let Err(e) = setup {
        eprintln!("warning: logging disabled: {:#}", e);
    }
    Ok(file)
}

async fn get(mut input: impl Read, out: &mut impl Write) -> Result<()> {
    let mut server_url = String::new();
    input
        .read_to_string(&mut server_url)
        .context("failed to read server URL from stdin")?;
    let server_url = server_url.trim();
    if server_url.is_empty() {
        bail!("no credentials server URL");
    }

    let file = load_config_file()?;
    let config = HelperConfig::resolve(&file, env)?;
    tracing::debug!(server = server_url, method = %config.method, "get");

    let helper = CredentialHelper::new(config)?;
    let creds = helper.get_credentials(server_url).await?;

    let payload = HelperCredentials {
        server_url,
        username: &creds.username,
        secret: &creds.password,
    };
    serde_json::to_writer(&mut *out, &payload)?;
    writeln!(out)?;
    Ok(())
}

async fn clear_cache() -> Result<()> {
    let file = load_config_file()?;
    let cache_config = resolve_cache(&file, &env)?;
    if !cache_config.enabled {
        println!("credential cache is disabled");
        return Ok(());
    }

    CredentialCache::new(&cache_config).clear().await?;
    println!("cleared {}", cache_config.path.display());
    Ok(())
}
