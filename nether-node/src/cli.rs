use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "nether-node")]
#[command(about = "Nether peer node: leader election and signed ledger")]
pub struct Cli {
    /// JSON config file, created with defaults when missing
    #[arg(long, value_name = "FILE", default_value = "config.json")]
    pub config: PathBuf,

    /// Overrides `listen_addr` from the config
    #[arg(long, value_name = "ADDR")]
    pub listen: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum Commands {
    /// Start as the first leader of a new network
    Lead,
    /// Join an existing network through any of its peers
    Join {
        #[arg(value_name = "ADDR")]
        address: String,
    },
    /// Create a fresh ledger holding only a genesis block
    NewLedger,
    /// Print and verify every block of the local ledger
    ShowLedger,
    /// Append a block of random records to the local ledger
    AppendRandom {
        #[arg(short, long, default_value_t = 3)]
        records: usize,
    },
    /// Print the node's public key, generating it if needed
    Keygen,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_join_with_overrides() {
        let cli = Cli::try_parse_from([
            "nether-node",
            "--config",
            "node2/config.json",
            "--listen",
            "0.0.0.0:7002",
            "join",
            "10.0.0.5:6660",
        ])
        .unwrap();

        assert_eq!(cli.config, PathBuf::from("node2/config.json"));
        assert_eq!(cli.listen.as_deref(), Some("0.0.0.0:7002"));
        assert_eq!(cli.command, Commands::Join { address: "10.0.0.5:6660".into() });
    }

    #[test]
    fn test_defaults() {
        let cli = Cli::try_parse_from(["nether-node", "append-random"]).unwrap();
        assert_eq!(cli.config, PathBuf::from("config.json"));
        assert_eq!(cli.command, Commands::AppendRandom { records: 3 });

        assert!(Cli::try_parse_from(["nether-node"]).is_err());
        assert!(Cli::try_parse_from(["nether-node", "join"]).is_err());
    }
}
