use std::path::PathBuf;

use clap::Parser;

use crate::{Commands, Config};

/// Main CLI application arguments and command structure
#[derive(Parser)]
#[clap(
    version,
    about = "Timestamped memos kept in daily markdown notes"
)]
pub struct Cli {
    /// Path to the configuration file
    #[clap(short = 'c', long, value_parser)]
    pub config: Option<PathBuf>,

    /// Path to the vault directory
    #[clap(long, value_parser)]
    pub vault: Option<PathBuf>,

    /// Daily notes folder inside the vault
    #[clap(long)]
    pub folder: Option<String>,

    /// Verbose output mode
    #[clap(short, long)]
    pub verbose: bool,

    /// Subcommands for the jmemos application
    #[clap(subcommand)]
    pub command: Commands,
}

impl Cli {
    /// Applies command-line overrides on top of a loaded configuration.
    pub fn apply_overrides(&self, config: &mut Config) {
        if let Some(vault) = &self.vault {
            config.vault_dir = vault.clone();
        }
        if let Some(folder) = &self.folder {
            config.daily_notes_folder = folder.clone();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_and_override() {
        let cli = Cli::parse_from([
            "jmemos", "--vault", "/tmp/vault", "--folder", "Journal", "list", "-t", "work", "-n", "5",
        ]);
        let mut config = Config::default();
        cli.apply_overrides(&mut config);
        assert_eq!(config.vault_dir, PathBuf::from("/tmp/vault"));
        assert_eq!(config.daily_notes_folder, "Journal");
        assert!(matches!(
            cli.command,
            Commands::List { limit: 5, tag: Some(ref tag), .. } if tag == "work"
        ));
    }

    #[test]
    fn test_export_rejects_unknown_format() {
        assert!(Cli::try_parse_from(["jmemos", "export", "-o", "out.pdf", "-f", "pdf"]).is_err());
    }
}
