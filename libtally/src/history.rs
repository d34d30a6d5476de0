use crate::categorizer::{frequencies, History};
use crate::transaction::{Token, Transaction};

/// Uppercases `text` and splits it on any character in `separators`,
/// dropping empty pieces.
pub fn tokenize(text: &str, separators: &str) -> Vec<String> {
    text.to_uppercase()
        .split(|c: char| separators.contains(c))
        .filter(|token| !token.is_empty())
        .map(|token| token.to_string())
        .collect()
}

pub fn transactions(tokens: &[Token]) -> Vec<&Transaction> {
    tokens
        .iter()
        .filter_map(|token| match token {
            Token::Transaction(transaction) => Some(transaction),
            Token::Include(_) | Token::Note(_) => None,
        })
        .collect()
}

/// The account posted to most often, i.e. the account a bank statement
/// belongs to. Ties go to the account seen first.
pub fn originating_account<'t>(transactions: &[&'t Transaction]) -> Option<&'t str> {
    let counts = frequencies(
        transactions
            .iter()
            .flat_map(|transaction| transaction.postings.iter())
            .map(|posting| posting.account.as_str()),
    );

    let mut best: Option<(&str, usize)> = None;
    for (account, count) in counts {
        if best.map_or(true, |(_, most)| count > most) {
            best = Some((account, count));
        }
    }
    best.map(|(account, _)| account)
}

/// Training data for the two categorizers of an import.
#[derive(Debug, Default, PartialEq)]
pub struct Histories {
    /// Counter accounts of the originating account.
    pub accounts: History,
    pub payees: History,
}

impl Histories {
    /// Every transaction contributes its header notes as tokens: once under
    /// its payee, and once per posting under the posting's account, skipping
    /// postings to `originating`.
    pub fn build(transactions: &[&Transaction], originating: &str, separators: &str) -> Self {
        let mut histories = Histories::default();

        for transaction in transactions {
            let tokens: Vec<String> = transaction
                .notes
                .iter()
                .flat_map(|note| tokenize(note, separators))
                .collect();

            histories.payees.push(&transaction.payee, tokens.clone());
            for posting in &transaction.postings {
                if posting.account == originating {
                    continue;
                }
                histories.accounts.push(&posting.account, tokens.clone());
            }
        }

        histories
    }
}
