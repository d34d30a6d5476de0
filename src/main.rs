mod import;
mod settings;

use crate::import::{read_rows, Importer};
use crate::settings::{Settings, SettingsArgs};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::debug;

use std::fs::File;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(
    name = "tally",
    about = "Plain text accounting journal tools"
)]
#[command(disable_help_subcommand = true)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Parse a journal, following includes, and print it back
    Parse {
        /// Journal file
        file: PathBuf,
    },
    /// Categorize bank CSV rows into journal transactions
    Import {
        #[command(flatten)]
        settings: SettingsArgs,

        /// CSV file to import, stdin when omitted
        input: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "tally=warn,libtally=warn".into());
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(io::stderr)
        .init();

    let args = Args::parse();
    match args.command {
        Commands::Parse { file } => parse(&file),
        Commands::Import { settings, input } => import(&settings, input.as_deref()),
    }
}

fn parse(file: &Path) -> Result<()> {
    let tokens = libtally::parse_file(file)
        .with_context(|| format!("Failed to parse journal: {}", file.display()))?;
    debug!(tokens = tokens.len(), "parsed journal");

    let mut out = String::new();
    for token in &tokens {
        out.push_str(&token.to_string());
        out.push_str("\n\n");
    }
    io::stdout().lock().write_all(out.as_bytes())?;
    Ok(())
}

fn import(args: &SettingsArgs, input: Option<&Path>) -> Result<()> {
    let settings = Settings::resolve(args)?;

    let journal = libtally::parse_file(&settings.train_file).with_context(|| {
        format!(
            "Failed to parse training journal: {}",
            settings.train_file.display()
        )
    })?;
    let importer = Importer::train(&settings, &journal);

    let rows = match input {
        Some(path) => {
            let file = File::open(path)
                .with_context(|| format!("Failed to open CSV file: {}", path.display()))?;
            read_rows(file, &settings)?
        }
        None => read_rows(io::stdin().lock(), &settings)?,
    };
    debug!(rows = rows.len(), "read CSV rows");

    // nothing is written unless every row converts
    let output = importer.render(&rows)?;
    io::stdout().lock().write_all(output.as_bytes())?;
    Ok(())
}
