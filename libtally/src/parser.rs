use crate::amount::{eval_factor, Amount};
use crate::transaction::{Date, Posting, Token, Transaction};
use crate::{Fault, LedgerError, Position};

use pest::error::{Error, LineColLocation};
use pest::iterators::Pair;
use pest::{Parser, Span};
use tracing::{debug, warn};

use std::fs;
use std::iter::{Enumerate, Peekable};
use std::path::{Path, PathBuf};
use std::str::Lines;

#[derive(Parser)]
#[grammar = "journal.pest"]
pub struct JournalParser;

impl From<Error<Rule>> for Fault {
    fn from(err: Error<Rule>) -> Fault {
        let (row, column) = match err.line_col {
            LineColLocation::Pos(pos) => pos,
            LineColLocation::Span(start, _) => start,
        };
        Fault::Syntax {
            position: Position { row, column },
            message: err.variant.message().into_owned(),
        }
    }
}

macro_rules! next_pair {
    ($pairs:ident, $span:expr, $expected:literal) => {
        $pairs
            .next()
            .ok_or_else(|| $crate::parser::unexpected_end($span, $expected))?
    };
}

pub(crate) use next_pair;

pub(crate) fn position_of(pos: pest::Position<'_>) -> Position {
    let (row, column) = pos.line_col();
    Position { row, column }
}

pub(crate) fn unexpected(pair: &Pair<'_, Rule>) -> Fault {
    Fault::Syntax {
        position: position_of(pair.as_span().start_pos()),
        message: format!("unexpected token `{}'", pair.as_str()),
    }
}

pub(crate) fn unexpected_end(span: Span<'_>, expected: &str) -> Fault {
    Fault::Syntax {
        position: position_of(span.end_pos()),
        message: format!("invalid next token, expected {}", expected),
    }
}

/// Parses the journal at `path`, expanding `include` directives.
///
/// Included files are not tracked: a file that (directly or through other
/// files) includes itself recurses until the stack is exhausted.
pub fn parse_file(path: &Path) -> Result<Vec<Token>, LedgerError> {
    let input = fs::read_to_string(path).map_err(|source| LedgerError::Io {
        path: path.to_owned(),
        source,
    })?;
    parse(&input, path)
}

/// Parses journal text that was read from `path`.
///
/// `include` patterns are globbed relative to the directory of `path` unless
/// they are absolute, and the tokens of every match are spliced in where the
/// directive was, in the order the glob reports them.
pub fn parse(input: &str, path: &Path) -> Result<Vec<Token>, LedgerError> {
    debug!(path = %path.display(), "parsing journal");

    let tokens = scan(input).map_err(|fault| LedgerError::Parse {
        path: path.to_owned(),
        fault,
    })?;

    let mut expanded = Vec::with_capacity(tokens.len());
    for token in tokens {
        match token {
            Token::Include(pattern) => {
                for included in expand_include(path, &pattern)? {
                    let tokens =
                        parse_file(&included).map_err(|source| LedgerError::ReferencedFile {
                            path: path.to_owned(),
                            source: Box::new(source),
                        })?;
                    expanded.extend(tokens);
                }
            }
            token => expanded.push(token),
        }
    }

    Ok(expanded)
}

fn expand_include(path: &Path, pattern: &str) -> Result<Vec<PathBuf>, LedgerError> {
    let full_pattern = match path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
        Some(dir) if !Path::new(pattern).is_absolute() => {
            let dir = glob::Pattern::escape(&dir.to_string_lossy());
            Path::new(&dir).join(pattern).to_string_lossy().into_owned()
        }
        _ => pattern.to_string(),
    };

    let entries = glob::glob(&full_pattern).map_err(|source| LedgerError::Pattern {
        pattern: full_pattern.clone(),
        source,
    })?;

    let mut matches = Vec::new();
    for entry in entries {
        let included = entry.map_err(|err| LedgerError::Io {
            path: err.path().to_owned(),
            source: err.into(),
        })?;
        matches.push(included);
    }

    if matches.is_empty() {
        warn!(pattern = %full_pattern, "include pattern matched no files");
    } else {
        debug!(pattern = %full_pattern, matches = matches.len(), "expanding include");
    }
    Ok(matches)
}

#[derive(Clone, Copy, Debug)]
struct Line<'s> {
    row: usize,
    text: &'s str,
}

impl<'s> Line<'s> {
    fn is_blank(&self) -> bool {
        self.text.trim().is_empty()
    }

    fn is_indented(&self) -> bool {
        self.text.starts_with([' ', '\t'])
    }

    /// The line without its indentation.
    fn body(&self) -> &'s str {
        self.text.trim_start_matches([' ', '\t'])
    }

    fn starts_note(&self) -> bool {
        self.body().starts_with(';')
    }

    fn parse(&self, rule: Rule) -> Result<Pair<'s, Rule>, Fault> {
        let mut pairs = JournalParser::parse(rule, self.text)
            .map_err(|err| Fault::from(err).at_row(self.row))?;
        pairs.next().ok_or_else(|| Fault::Syntax {
            position: Position {
                row: self.row,
                column: 1,
            },
            message: format!("expected {:?}", rule),
        })
    }
}

struct Cursor<'s> {
    lines: Peekable<Enumerate<Lines<'s>>>,
    row: usize,
}

impl<'s> Cursor<'s> {
    fn new(input: &'s str) -> Self {
        Cursor {
            lines: input.lines().enumerate().peekable(),
            row: 0,
        }
    }

    fn peek(&mut self) -> Option<Line<'s>> {
        self.lines
            .peek()
            .map(|&(idx, text)| Line { row: idx + 1, text })
    }

    fn advance(&mut self) {
        if let Some((idx, _)) = self.lines.next() {
            self.row = idx + 1;
        }
    }

    /// Steps over blank lines when the first non-blank line after them is
    /// indented, i.e. still part of the current block.
    fn skip_blanks_in_block(&mut self) {
        let mut ahead = self.lines.clone();
        let mut blanks = 0;
        while ahead.next_if(|(_, text)| text.trim().is_empty()).is_some() {
            blanks += 1;
        }
        let continues = ahead
            .peek()
            .map_or(false, |(_, text)| text.starts_with([' ', '\t']));
        if continues {
            for _ in 0..blanks {
                self.advance();
            }
        }
    }

    /// Row of the next line, or of the line that would follow the input.
    fn next_row(&mut self) -> usize {
        self.peek().map_or(self.row + 1, |line| line.row)
    }
}

/// Scans the text of a single file into tokens, leaving `include`
/// directives unexpanded.
pub fn scan(input: &str) -> Result<Vec<Token>, Fault> {
    let mut cursor = Cursor::new(input);
    let mut tokens = Vec::new();

    while let Some(line) = cursor.peek() {
        if line.is_blank() {
            cursor.advance();
            continue;
        }
        tokens.push(scan_token(&mut cursor, line)?);
    }

    Ok(tokens)
}

// Each alternative returns `Ok(None)` when the line is not its construct,
// leaving the cursor untouched so the next alternative can try.
fn scan_token<'s>(cursor: &mut Cursor<'s>, line: Line<'s>) -> Result<Token, Fault> {
    if let Some(token) = scan_transaction(cursor, line)? {
        return Ok(token);
    }
    if let Some(token) = scan_note(cursor, line)? {
        return Ok(token);
    }
    if let Some(token) = scan_include(cursor, line)? {
        return Ok(token);
    }

    Err(Fault::UnsupportedToken {
        position: Position {
            row: line.row,
            column: line.text.chars().count() - line.body().chars().count() + 1,
        },
    })
}

fn scan_transaction<'s>(cursor: &mut Cursor<'s>, line: Line<'s>) -> Result<Option<Token>, Fault> {
    if !line.body().starts_with(|c: char| c.is_ascii_digit()) {
        return Ok(None);
    }

    let header = line.parse(Rule::header)?;
    cursor.advance();

    let mut date = None;
    let mut settled = false;
    let mut payee = "";
    for pair in header.into_inner() {
        match pair.as_rule() {
            Rule::date => date = Some(parse_date(pair, line.row)?),
            Rule::settled => settled = true,
            Rule::payee => payee = pair.as_str(),
            Rule::EOI => {}
            _ => return Err(unexpected(&pair).at_row(line.row)),
        }
    }
    let date = date.ok_or_else(|| Fault::Syntax {
        position: Position {
            row: line.row,
            column: 1,
        },
        message: "expected date".to_string(),
    })?;

    let mut notes = Vec::new();
    cursor.skip_blanks_in_block();
    while let Some(line) = cursor.peek() {
        if line.is_blank() || !line.starts_note() {
            break;
        }
        notes.push(parse_note(line)?);
        cursor.advance();
    }

    // An unindented line always ends the posting block; blank lines end it
    // only when no indented line follows them.
    let mut postings: Vec<Posting> = Vec::new();
    loop {
        cursor.skip_blanks_in_block();
        let Some(line) = cursor.peek() else {
            break;
        };
        if line.is_blank() || !line.is_indented() {
            break;
        }
        if line.starts_note() {
            let note = parse_note(line)?;
            match postings.last_mut() {
                Some(posting) => posting.notes.push(note),
                None => notes.push(note),
            }
        } else {
            postings.push(parse_posting(line)?);
        }
        cursor.advance();
    }

    if postings.is_empty() {
        return Err(Fault::Syntax {
            position: Position {
                row: cursor.next_row(),
                column: 1,
            },
            message: "expected an indented posting".to_string(),
        });
    }

    Ok(Some(Token::Transaction(Transaction {
        date,
        settled,
        payee: payee.to_string(),
        notes,
        postings,
    })))
}

fn scan_note<'s>(cursor: &mut Cursor<'s>, line: Line<'s>) -> Result<Option<Token>, Fault> {
    if !line.starts_note() {
        return Ok(None);
    }
    let note = parse_note(line)?;
    cursor.advance();
    Ok(Some(Token::Note(note)))
}

fn scan_include<'s>(cursor: &mut Cursor<'s>, line: Line<'s>) -> Result<Option<Token>, Fault> {
    let directive = line
        .text
        .strip_prefix("include")
        .map_or(false, |rest| rest.is_empty() || rest.starts_with([' ', '\t']));
    if !directive {
        return Ok(None);
    }

    let include = line.parse(Rule::include_line)?;
    let pattern = include
        .into_inner()
        .find(|pair| pair.as_rule() == Rule::include_pattern)
        .map(|pair| pair.as_str().to_string())
        .ok_or_else(|| Fault::Syntax {
            position: Position {
                row: line.row,
                column: "include ".len() + 1,
            },
            message: "expected include pattern".to_string(),
        })?;
    cursor.advance();
    Ok(Some(Token::Include(pattern)))
}

fn parse_date(pair: Pair<'_, Rule>, row: usize) -> Result<Date, Fault> {
    let span = pair.as_span();
    let mut parts = pair.into_inner();
    let mut next_part = || {
        parts
            .next()
            .map(|part| part.as_str())
            .ok_or_else(|| unexpected_end(span, "date part").at_row(row))
    };
    let year = next_part()?;
    let month = next_part()?;
    let day = next_part()?;
    Ok(Date::new(year, month, day))
}

fn parse_note(line: Line<'_>) -> Result<String, Fault> {
    let note = line.parse(Rule::note_line)?;
    Ok(note
        .into_inner()
        .find(|pair| pair.as_rule() == Rule::note_text)
        .map(|pair| pair.as_str().to_string())
        .unwrap_or_default())
}

fn parse_posting(line: Line<'_>) -> Result<Posting, Fault> {
    let posting = line.parse(Rule::posting)?;
    let mut parsed = Posting::new("");

    for pair in posting.into_inner() {
        match pair.as_rule() {
            Rule::account => parsed.account = pair.as_str().to_string(),
            Rule::posted_amount => parsed.amount = Some(eval_inner_factor(pair, line.row)?),
            Rule::balance_assertion => parsed.balance = Some(eval_inner_factor(pair, line.row)?),
            Rule::inline_note => parsed.notes.push(
                pair.into_inner()
                    .next()
                    .map(|text| text.as_str().to_string())
                    .unwrap_or_default(),
            ),
            Rule::EOI => {}
            _ => return Err(unexpected(&pair).at_row(line.row)),
        }
    }

    Ok(parsed)
}

fn eval_inner_factor(pair: Pair<'_, Rule>, row: usize) -> Result<Amount, Fault> {
    let span = pair.as_span();
    let factor = pair
        .into_inner()
        .next()
        .ok_or_else(|| unexpected_end(span, "amount"))
        .map_err(|fault| fault.at_row(row))?;
    eval_factor(factor).map_err(|fault| fault.at_row(row))
}
