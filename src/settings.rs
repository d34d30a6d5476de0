use anyhow::{anyhow, Context, Result};
use clap::Args;
use serde::Deserialize;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// `column=text`: rows whose `column` cell equals `text` are debits.
#[derive(Clone, Debug, PartialEq)]
pub struct Debit {
    pub column: usize,
    pub text: String,
}

impl FromStr for Debit {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (column, text) = s
            .split_once('=')
            .ok_or_else(|| format!("expected `column=text', got `{}'", s))?;
        let column = column
            .trim()
            .parse()
            .map_err(|_| format!("invalid debit column `{}'", column))?;
        Ok(Debit {
            column,
            text: text.to_string(),
        })
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Settings {
    pub train_file: PathBuf,
    pub default_account: String,
    pub csv_date_format: String,
    pub csv_date_column: usize,
    pub csv_payee_column: usize,
    pub csv_amount_column: usize,
    pub csv_description_column: usize,
    pub csv_amount_debit: Option<Debit>,
    pub csv_token_separators: String,
    pub csv_skip_rows: usize,
    pub csv_reverse_rows: bool,
    pub csv_decimal_separator: char,
    pub ledger_date_format: String,
    pub ledger_token_separators: String,
    pub ledger_currency: String,
    pub payee_min_score: f64,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            train_file: PathBuf::from("ledger.dat"),
            default_account: "Expenses:Unknown".to_string(),
            csv_date_format: "%Y-%m-%d".to_string(),
            csv_date_column: 0,
            csv_payee_column: 1,
            csv_amount_column: 2,
            csv_description_column: 3,
            csv_amount_debit: None,
            csv_token_separators: ",; \t\"'/:".to_string(),
            csv_skip_rows: 0,
            csv_reverse_rows: false,
            csv_decimal_separator: '.',
            ledger_date_format: "%Y-%m-%d".to_string(),
            ledger_token_separators: ",; \t\"':".to_string(),
            ledger_currency: "€".to_string(),
            payee_min_score: 0.2,
        }
    }
}

/// One named table of the settings file.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
struct Section {
    train_file: Option<PathBuf>,
    default_account: Option<String>,
    csv_date_format: Option<String>,
    csv_date_column: Option<usize>,
    csv_payee_column: Option<usize>,
    csv_amount_column: Option<usize>,
    csv_description_column: Option<usize>,
    csv_amount_debit: Option<String>,
    csv_token_separators: Option<String>,
    csv_skip_rows: Option<usize>,
    csv_reverse_rows: Option<bool>,
    csv_decimal_separator: Option<char>,
    ledger_date_format: Option<String>,
    ledger_token_separators: Option<String>,
    ledger_currency: Option<String>,
    payee_min_score: Option<f64>,
}

#[derive(Args, Debug, Default)]
pub struct SettingsArgs {
    /// Settings file
    #[arg(short, long, default_value = ".tally.toml")]
    pub config: PathBuf,

    /// Settings file section to apply
    #[arg(short, long)]
    pub section: Option<String>,

    /// Journal used to train the categorizers [default: ledger.dat]
    #[arg(short, long)]
    pub train_file: Option<PathBuf>,

    /// Account used when nothing matches [default: Expenses:Unknown]
    #[arg(long)]
    pub default_account: Option<String>,

    /// Date format of the CSV date column [default: %Y-%m-%d]
    #[arg(short = 'f', long)]
    pub csv_date_format: Option<String>,

    /// CSV column holding the date [default: 0]
    #[arg(short = 'd', long)]
    pub csv_date_column: Option<usize>,

    /// CSV column holding the payee [default: 1]
    #[arg(short = 'p', long)]
    pub csv_payee_column: Option<usize>,

    /// CSV column holding the amount [default: 2]
    #[arg(short = 'a', long)]
    pub csv_amount_column: Option<usize>,

    /// CSV column holding the description [default: 3]
    #[arg(short = 'n', long)]
    pub csv_description_column: Option<usize>,

    /// Flip the amount sign of rows matching `column=text`
    #[arg(long)]
    pub csv_amount_debit: Option<Debit>,

    /// Characters splitting CSV text into tokens
    #[arg(long)]
    pub csv_token_separators: Option<String>,

    /// Leading CSV rows to drop [default: 0]
    #[arg(long)]
    pub csv_skip_rows: Option<usize>,

    /// Emit CSV rows in reverse order; `--csv-reverse-rows=false` turns a
    /// section's setting off
    #[arg(
        short = 'r',
        long,
        num_args = 0..=1,
        require_equals = true,
        default_missing_value = "true"
    )]
    pub csv_reverse_rows: Option<bool>,

    /// Decimal mark of CSV amounts [default: .]
    #[arg(long)]
    pub csv_decimal_separator: Option<char>,

    /// Date format of emitted transactions [default: %Y-%m-%d]
    #[arg(short = 'g', long)]
    pub ledger_date_format: Option<String>,

    /// Characters splitting journal notes into tokens
    #[arg(long)]
    pub ledger_token_separators: Option<String>,

    /// Unit written before emitted amounts [default: €]
    #[arg(long)]
    pub ledger_currency: Option<String>,

    /// Minimum score for a learned payee [default: 0.2]
    #[arg(long)]
    pub payee_min_score: Option<f64>,
}

/// Copies every field that is set in `$source` over the one in `$settings`.
macro_rules! merge {
    ($settings:expr, $source:expr, $($field:ident),+ $(,)?) => {
        $(
            if let Some(value) = &$source.$field {
                $settings.$field = value.clone();
            }
        )+
    };
}

impl Settings {
    /// Defaults, then the requested settings file section, then flags.
    pub fn resolve(args: &SettingsArgs) -> Result<Settings> {
        let mut settings = Settings::default();
        if let Some(section) = &args.section {
            settings.apply_file(&args.config, section)?;
        }
        settings.apply_args(args);
        Ok(settings)
    }

    fn apply_file(&mut self, path: &Path, name: &str) -> Result<()> {
        let base_dir = path.parent().map(ToOwned::to_owned).unwrap_or_default();

        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read settings file: {}", path.display()))?;
        let mut sections: HashMap<String, Section> = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse settings file: {}", path.display()))?;
        let section = sections
            .remove(name)
            .ok_or_else(|| anyhow!("no section `{}' in {}", name, path.display()))?;

        self.apply_section(section, &base_dir)
            .with_context(|| format!("Invalid section `{}' in {}", name, path.display()))
    }

    fn apply_section(&mut self, section: Section, base_dir: &Path) -> Result<()> {
        merge!(
            self,
            section,
            default_account,
            csv_date_format,
            csv_date_column,
            csv_payee_column,
            csv_amount_column,
            csv_description_column,
            csv_skip_rows,
            csv_reverse_rows,
            csv_decimal_separator,
            ledger_date_format,
            ledger_currency,
            payee_min_score,
        );
        if let Some(train_file) = section.train_file {
            self.train_file = base_dir.join(train_file);
        }
        if let Some(debit) = section.csv_amount_debit {
            self.csv_amount_debit = Some(debit.parse().map_err(|e: String| anyhow!(e))?);
        }
        if let Some(separators) = section.csv_token_separators {
            self.csv_token_separators = interpret_escapes(&separators);
        }
        if let Some(separators) = section.ledger_token_separators {
            self.ledger_token_separators = interpret_escapes(&separators);
        }
        Ok(())
    }

    fn apply_args(&mut self, args: &SettingsArgs) {
        merge!(
            self,
            args,
            train_file,
            default_account,
            csv_date_format,
            csv_date_column,
            csv_payee_column,
            csv_amount_column,
            csv_description_column,
            csv_skip_rows,
            csv_reverse_rows,
            csv_decimal_separator,
            ledger_date_format,
            ledger_currency,
            payee_min_score,
        );
        if args.csv_amount_debit.is_some() {
            self.csv_amount_debit = args.csv_amount_debit.clone();
        }
        if let Some(separators) = &args.csv_token_separators {
            self.csv_token_separators = interpret_escapes(separators);
        }
        if let Some(separators) = &args.ledger_token_separators {
            self.ledger_token_separators = interpret_escapes(separators);
        }
    }

    /// Rows narrower than this cannot be imported.
    pub fn required_columns(&self) -> usize {
        [
            self.csv_date_column,
            self.csv_payee_column,
            self.csv_amount_column,
            self.csv_description_column,
        ]
        .into_iter()
        .max()
        .unwrap_or(0)
            + 1
    }
}

/// Turns the two-character sequences `\t`, `\n`, `\r` and `\\` into the
/// characters they name. Other backslashes are kept.
pub fn interpret_escapes(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        let escaped = match chars.peek() {
            Some('t') => '\t',
            Some('n') => '\n',
            Some('r') => '\r',
            Some('\\') => '\\',
            _ => {
                out.push(c);
                continue;
            }
        };
        chars.next();
        out.push(escaped);
    }
    out
}
