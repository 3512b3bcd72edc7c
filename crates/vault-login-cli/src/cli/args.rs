use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "docker-credential-vault-login",
    version,
    about = "Docker credential helper backed by a secrets backend with AWS authentication"
)]
pub struct Cli {
    #[command(subcommand)]
    pub cmd: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Print credentials for the registry read from stdin
    Get,
    /// Not supported: credentials are never stored locally
    Store,
    /// Not supported: credentials are never stored locally
    Erase,
    /// Not supported: credentials are never stored locally
    List,
    /// Print the version
    Version,
    /// Remove all cached credentials
    #[command(hide = true)]
    ClearCache,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_protocol_commands() {
        for (arg, expected) in [
            ("get", "get"),
            ("store", "store"),
            ("erase", "erase"),
            ("list", "list"),
            ("clear-cache", "clear-cache"),
        ] {
            let cli = Cli::try_parse_from(["docker-credential-vault-login", arg]).unwrap();
            let name = match cli.cmd {
                Command::Get => "get",
                Command::Store => "store",
                Command::Erase => "erase",
                Command::List => "list",
                Command::Version => "version",
                Command::ClearCache => "clear-cache",
            };
            assert_eq!(name, expected);
        }
    }

    #[test]
    fn test_unknown_command_rejected() {
        assert!(Cli::try_parse_from(["docker-credential-vault-login", "login"]).is_err());
    }
}
