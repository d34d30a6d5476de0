use crate::amount::Amount;

use std::fmt;

/// A top level journal construct.
#[derive(Clone, Debug, PartialEq)]
pub enum Token {
    Transaction(Transaction),
    Include(String),
    Note(String),
}

/// Transaction date as written, e.g. `2016-01-01`. The three digit groups are
/// kept as text and never checked against a calendar.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Date {
    pub year: String,
    pub month: String,
    pub day: String,
}

impl Date {
    pub fn new(year: &str, month: &str, day: &str) -> Date {
        Date {
            year: year.to_string(),
            month: month.to_string(),
            day: day.to_string(),
        }
    }

    pub fn parts(&self) -> (&str, &str, &str) {
        (&self.year, &self.month, &self.day)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Transaction {
    pub date: Date,
    pub settled: bool,
    pub payee: String,
    pub notes: Vec<String>,
    pub postings: Vec<Posting>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Posting {
    pub account: String,
    pub amount: Option<Amount>,
    pub balance: Option<Amount>,
    pub notes: Vec<String>,
}

impl Posting {
    pub fn new(account: &str) -> Posting {
        Posting {
            account: account.to_string(),
            amount: None,
            balance: None,
            notes: vec![],
        }
    }
}

impl fmt::Display for Date {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}-{}", self.year, self.month, self.day)
    }
}

impl fmt::Display for Posting {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "    {}", self.account)?;
        if let Some(amount) = &self.amount {
            write!(f, "  {}", amount)?;
        }
        if let Some(balance) = &self.balance {
            write!(f, "  = {}", balance)?;
        }
        for note in &self.notes {
            write!(f, "\n    ; {}", note)?;
        }
        Ok(())
    }
}

impl fmt::Display for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.date)?;
        if self.settled {
            write!(f, " *")?;
        }
        if !self.payee.is_empty() {
            write!(f, " {}", self.payee)?;
        }
        for note in &self.notes {
            write!(f, "\n    ; {}", note)?;
        }
        for posting in &self.postings {
            write!(f, "\n{}", posting)?;
        }
        Ok(())
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Transaction(transaction) => write!(f, "{}", transaction),
            Token::Include(pattern) => write!(f, "include {}", pattern),
            Token::Note(note) => write!(f, "; {}", note),
        }
    }
}
