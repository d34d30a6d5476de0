use crate::settings::Settings;

use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use libtally::categorizer::Categorizer;
use libtally::history::{originating_account, tokenize, transactions, Histories};
use libtally::transaction::Token;
use rust_decimal::Decimal;
use tracing::{debug, info};

use std::fmt::Write as _;
use std::io::Read;
use std::str::FromStr;

const FALLBACK_ORIGINATING_ACCOUNT: &str = "Assets:Banking";
const ACCOUNT_WIDTH: usize = 65;

/// Two categorizers trained on a journal, turning bank CSV rows into
/// transactions against the journal's originating account.
pub struct Importer<'s> {
    settings: &'s Settings,
    originating: String,
    accounts: Categorizer,
    payees: Categorizer,
}

impl<'s> Importer<'s> {
    pub fn train(settings: &'s Settings, journal: &[Token]) -> Importer<'s> {
        let transactions = transactions(journal);
        let originating = originating_account(&transactions)
            .unwrap_or(FALLBACK_ORIGINATING_ACCOUNT)
            .to_string();
        let histories = Histories::build(
            &transactions,
            &originating,
            &settings.ledger_token_separators,
        );
        info!(
            transactions = transactions.len(),
            originating = %originating,
            accounts = histories.accounts.len(),
            payees = histories.payees.len(),
            "trained categorizers"
        );

        Importer {
            settings,
            originating,
            accounts: Categorizer::train(&histories.accounts),
            payees: Categorizer::train(&histories.payees),
        }
    }

    pub fn originating_account(&self) -> &str {
        &self.originating
    }

    /// Renders every row, or fails on the first row that cannot be imported.
    pub fn render(&self, rows: &[Vec<String>]) -> Result<String> {
        let mut out = String::new();
        for (idx, row) in rows.iter().enumerate() {
            self.render_row(row, &mut out)
                .with_context(|| format!("Failed to import CSV row {}", idx + 1))?;
        }
        Ok(out)
    }

    fn render_row(&self, row: &[String], out: &mut String) -> Result<()> {
        let settings = self.settings;
        let required = settings.required_columns();
        if row.len() < required {
            bail!(
                "row has {} columns, at least {} expected",
                row.len(),
                required
            );
        }
        let cell = move |column: usize| row[column].as_str();

        let tokens = tokenize(&row.join(" "), &settings.csv_token_separators);
        let (account, payee) = if tokens.is_empty() {
            (
                settings.default_account.as_str(),
                cell(settings.csv_payee_column),
            )
        } else {
            let account = self
                .accounts
                .categorize(&tokens)
                .first()
                .map(|&(account, _)| account)
                .unwrap_or(settings.default_account.as_str());
            let payee = self
                .payees
                .categorize(&tokens)
                .into_iter()
                .find(|&(_, score)| score >= settings.payee_min_score)
                .map(|(payee, _)| payee)
                .unwrap_or(cell(settings.csv_payee_column));
            (account, payee)
        };
        debug!(?tokens, account, payee, "categorized row");

        let mut amount = parse_decimal(
            cell(settings.csv_amount_column),
            settings.csv_decimal_separator,
        )?;
        if let Some(debit) = &settings.csv_amount_debit {
            if row.get(debit.column) == Some(&debit.text) {
                amount = -amount;
            }
        }

        let date_cell = cell(settings.csv_date_column);
        let date = NaiveDate::parse_from_str(date_cell.trim(), &settings.csv_date_format)
            .with_context(|| {
                format!(
                    "could not parse date `{}' as `{}'",
                    date_cell, settings.csv_date_format
                )
            })?;

        writeln!(out)?;
        writeln!(
            out,
            "{} * {}",
            date.format(&settings.ledger_date_format),
            payee
        )?;
        writeln!(out, "    ; CSV: {}", quote_row(row))?;
        writeln!(out, "    {}", account)?;
        writeln!(
            out,
            "    {:<width$} {}",
            self.originating,
            format_amount(amount, &settings.ledger_currency),
            width = ACCOUNT_WIDTH
        )?;
        Ok(())
    }
}

/// Reads headerless CSV records of any width, then applies the skip and
/// reverse settings.
pub fn read_rows(input: impl Read, settings: &Settings) -> Result<Vec<Vec<String>>> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(input);

    let mut rows = Vec::new();
    for (idx, record) in reader
        .records()
        .enumerate()
        .skip(settings.csv_skip_rows)
    {
        let record = record.with_context(|| format!("Failed to read CSV row {}", idx + 1))?;
        rows.push(record.iter().map(|cell| cell.to_string()).collect());
    }

    if settings.csv_reverse_rows {
        rows.reverse();
    }
    Ok(rows)
}

/// Parses an amount cell, keeping digits, a leading minus and the decimal
/// separator; anything else (grouping marks, currency signs) is dropped.
pub fn parse_decimal(text: &str, decimal_separator: char) -> Result<Decimal> {
    let normalized: String = text
        .chars()
        .filter_map(|c| match c {
            c if c == decimal_separator => Some('.'),
            '0'..='9' | '-' => Some(c),
            _ => None,
        })
        .collect();
    Decimal::from_str(&normalized).with_context(|| format!("could not parse amount `{}'", text))
}

fn quote_row(row: &[String]) -> String {
    row.iter()
        .map(|cell| format!("\"{}\"", cell.replace('"', "\"\"")))
        .collect::<Vec<_>>()
        .join(",")
}

fn format_amount(amount: Decimal, currency: &str) -> String {
    if currency.is_empty() {
        format!("{:.2}", amount)
    } else {
        format!("{} {:.2}", currency, amount)
    }
}

#[cfg(test)]
mod tests {
    use crate::import::{parse_decimal, quote_row, read_rows, Importer};
    use crate::settings::{Debit, Settings};

    use anyhow::Result;
    use libtally::transaction::Token;
    use rust_decimal::Decimal;
    use std::str::FromStr;

    const JOURNAL: &str = "\
2016-01-04 * Albert Heijn
    ; CSV: \"2016-01-04\",\"ALBERT HEIJN 1234\",\"-12.50\",\"Pinbetaling\"
    Expenses:Groceries
    Assets:Checking  € -12.50

2016-01-05 * Shell
    ; CSV: \"2016-01-05\",\"SHELL EINDHOVEN\",\"-40.00\",\"Pinbetaling\"
    Expenses:Fuel
    Assets:Checking  € -40.00

2016-01-25 * Employer
    ; CSV: \"2016-01-25\",\"ACME BV\",\"2000.00\",\"Salaris\"
    Assets:Checking  € 2000.00
    Income:Salary
";

    fn row(cells: &[&str]) -> Vec<String> {
        cells.iter().map(|cell| cell.to_string()).collect()
    }

    #[test]
    fn decimals() -> Result<()> {
        assert_eq!(parse_decimal("-7.25", '.')?, Decimal::from_str("-7.25")?);
        assert_eq!(parse_decimal("1.234,56", ',')?, Decimal::from_str("1234.56")?);
        assert_eq!(parse_decimal("€ 3", '.')?, Decimal::from(3));
        assert!(parse_decimal("n/a", '.').is_err());
        Ok(())
    }

    #[test]
    fn quoting() {
        assert_eq!(
            quote_row(&row(&["a", "say \"hi\"", ""])),
            "\"a\",\"say \"\"hi\"\"\",\"\""
        );
    }

    #[test]
    fn render_known_and_unknown_rows() -> Result<()> {
        let settings = Settings::default();
        let journal = libtally::scan(JOURNAL)?;
        let importer = Importer::train(&settings, &journal);
        assert_eq!(importer.originating_account(), "Assets:Checking");

        let rows = vec![
            row(&["2016-02-01", "ALBERT HEIJN 5678", "-7.25", "Pinbetaling"]),
            row(&["2016-02-02", "Bakery", "-3.1", "Contant"]),
        ];
        let out = importer.render(&rows)?;

        let expected = format!(
            "
2016-02-01 * Albert Heijn
    ; CSV: \"2016-02-01\",\"ALBERT HEIJN 5678\",\"-7.25\",\"Pinbetaling\"
    Expenses:Groceries
    {:<65} € -7.25

2016-02-02 * Bakery
    ; CSV: \"2016-02-02\",\"Bakery\",\"-3.1\",\"Contant\"
    Expenses:Unknown
    {:<65} € -3.10
",
            "Assets:Checking", "Assets:Checking"
        );
        assert_eq!(out, expected);
        Ok(())
    }

    #[test]
    fn rendered_output_is_a_journal() -> Result<()> {
        let settings = Settings::default();
        let importer = Importer::train(&settings, &libtally::scan(JOURNAL)?);
        let out = importer.render(&[row(&["2016-02-05", "SHELL", "-50", "Pinbetaling"])])?;

        let tokens = libtally::scan(&out)?;
        assert_eq!(tokens.len(), 1);
        let Token::Transaction(transaction) = &tokens[0] else {
            panic!("expected a transaction, got {:?}", tokens[0]);
        };
        assert_eq!(transaction.payee, "Shell");
        assert!(transaction.settled);
        assert_eq!(transaction.postings[0].account, "Expenses:Fuel");
        assert_eq!(transaction.postings[1].account, "Assets:Checking");
        let amount = transaction.postings[1].amount.as_ref().map(|a| a.magnitude);
        assert_eq!(amount, Some(-50.0));
        Ok(())
    }

    #[test]
    fn empty_journal_uses_fallbacks() -> Result<()> {
        let settings = Settings {
            ledger_currency: String::new(),
            ..Default::default()
        };
        let importer = Importer::train(&settings, &[]);
        assert_eq!(importer.originating_account(), "Assets:Banking");

        let out = importer.render(&[row(&["2016-02-01", "Kiosk", "2", ""])])?;
        assert!(out.contains("2016-02-01 * Kiosk\n"));
        assert!(out.contains("    Expenses:Unknown\n"));
        assert!(out.ends_with(&format!("    {:<65} 2.00\n", "Assets:Banking")));
        Ok(())
    }

    #[test]
    fn debit_rows_are_negated() -> Result<()> {
        let settings = Settings {
            csv_date_format: "%d-%m-%Y".to_string(),
            ledger_date_format: "%Y/%m/%d".to_string(),
            csv_decimal_separator: ',',
            csv_amount_debit: Some(Debit {
                column: 4,
                text: "Af".to_string(),
            }),
            ..Default::default()
        };
        let importer = Importer::train(&settings, &libtally::scan(JOURNAL)?);
        let out = importer.render(&[
            row(&["01-02-2016", "Shop", "1.250,00", "", "Af"]),
            row(&["02-02-2016", "Refund", "10,5", "", "Bij"]),
        ])?;

        assert!(out.contains("2016/02/01 * Shop\n"));
        assert!(out.contains("€ -1250.00\n"));
        assert!(out.contains("€ 10.50\n"));
        Ok(())
    }

    #[test]
    fn rejects_bad_rows() -> Result<()> {
        let settings = Settings::default();
        let importer = Importer::train(&settings, &libtally::scan(JOURNAL)?);

        assert!(importer.render(&[row(&["2016-02-01", "Shop", "1"])]).is_err());
        assert!(importer
            .render(&[row(&["yesterday", "Shop", "1", ""])])
            .is_err());
        assert!(importer
            .render(&[row(&["2016-02-01", "Shop", "one", ""])])
            .is_err());
        Ok(())
    }

    #[test]
    fn empty_tokens_skip_categorization() -> Result<()> {
        let settings = Settings {
            csv_token_separators: "0123456789-., ".to_string(),
            ..Default::default()
        };
        let importer = Importer::train(&settings, &libtally::scan(JOURNAL)?);
        let out = importer.render(&[row(&["2016-02-01", "", "-1.00", ""])])?;
        assert!(out.contains("2016-02-01 * \n"));
        assert!(out.contains("    Expenses:Unknown\n"));
        Ok(())
    }

    #[test]
    fn read_skip_and_reverse() -> Result<()> {
        let input = "Date,Name,Amount\n2016-01-01,A,1\n2016-01-02,\"B, C\",2,extra\n";
        let settings = Settings {
            csv_skip_rows: 1,
            csv_reverse_rows: true,
            ..Default::default()
        };
        let rows = read_rows(input.as_bytes(), &settings)?;
        assert_eq!(
            rows,
            vec![
                row(&["2016-01-02", "B, C", "2", "extra"]),
                row(&["2016-01-01", "A", "1"]),
            ]
        );

        let all = read_rows(input.as_bytes(), &Settings::default())?;
        assert_eq!(all.len(), 3);
        Ok(())
    }
}
