use crate::parser::{next_pair, position_of, unexpected, JournalParser, Rule};
use crate::Fault;

use pest::iterators::Pair;
use pest::Parser;

use std::fmt;

/// A signed magnitude with an optional currency unit.
#[derive(Clone, Debug, PartialEq)]
pub struct Amount {
    pub magnitude: f64,
    pub unit: Option<String>,
}

impl Amount {
    pub fn new(magnitude: f64, unit: Option<&str>) -> Amount {
        Amount {
            magnitude,
            unit: unit.map(|u| u.to_string()),
        }
    }

    /// Applies `operator`, or returns `None` when the units don't combine.
    ///
    /// Sums and differences need both sides in the same unit (or both
    /// unitless). Products and quotients allow at most one side to carry a
    /// unit, and the result takes it.
    pub fn checked(&self, operator: Operator, rhs: &Amount) -> Option<Amount> {
        let unit = match operator {
            Operator::Add | Operator::Subtract => {
                if self.unit != rhs.unit {
                    return None;
                }
                self.unit.clone()
            }
            Operator::Multiply | Operator::Divide => match (&self.unit, &rhs.unit) {
                (Some(_), Some(_)) => return None,
                (unit @ Some(_), None) | (None, unit) => unit.clone(),
            },
        };

        let magnitude = match operator {
            Operator::Add => self.magnitude + rhs.magnitude,
            Operator::Subtract => self.magnitude - rhs.magnitude,
            Operator::Multiply => self.magnitude * rhs.magnitude,
            Operator::Divide => self.magnitude / rhs.magnitude,
        };

        Some(Amount { magnitude, unit })
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.unit {
            Some(unit) => write!(f, "{} {}", self.magnitude, unit),
            None => write!(f, "{}", self.magnitude),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Operator {
    Add,      // '+'
    Subtract, // '-'
    Multiply, // '*'
    Divide,   // '/'
}

impl Operator {
    pub fn symbol(self) -> char {
        match self {
            Operator::Add => '+',
            Operator::Subtract => '-',
            Operator::Multiply => '*',
            Operator::Divide => '/',
        }
    }

    fn from_symbol(s: &str) -> Option<Operator> {
        match s {
            "+" => Some(Operator::Add),
            "-" => Some(Operator::Subtract),
            "*" => Some(Operator::Multiply),
            "/" => Some(Operator::Divide),
            _ => None,
        }
    }
}

/// Evaluates a complete amount expression such as `(€5 * 5)` or `1 + 1`.
///
/// Faults report row 1; the column is counted from the start of `input`.
pub fn evaluate(input: &str) -> Result<Amount, Fault> {
    let mut pairs = JournalParser::parse(Rule::calculation, input)?;
    let calculation = pairs
        .next()
        .ok_or_else(|| Fault::Syntax {
            position: crate::Position { row: 1, column: 1 },
            message: "empty amount expression".to_string(),
        })?;
    let span = calculation.as_span();
    let mut inner = calculation.into_inner();
    eval_expression(next_pair!(inner, span, "expression"))
}

pub(crate) fn eval_factor(factor: Pair<'_, Rule>) -> Result<Amount, Fault> {
    let span = factor.as_span();
    let mut inner = factor.into_inner();
    let pair = next_pair!(inner, span, "amount or parenthesized expression");
    match pair.as_rule() {
        Rule::amount => eval_amount(pair),
        Rule::expression => eval_expression(pair),
        _ => Err(unexpected(&pair)),
    }
}

fn eval_term(term: Pair<'_, Rule>) -> Result<Amount, Fault> {
    let span = term.as_span();
    let mut inner = term.into_inner();
    let lhs = eval_factor(next_pair!(inner, span, "factor"))?;
    match inner.next() {
        None => Ok(lhs),
        Some(operator) => {
            let rhs = eval_term(next_pair!(inner, span, "term"))?;
            combine(&lhs, &operator, &rhs)
        }
    }
}

fn eval_expression(expression: Pair<'_, Rule>) -> Result<Amount, Fault> {
    let span = expression.as_span();
    let mut inner = expression.into_inner();
    let lhs = eval_term(next_pair!(inner, span, "term"))?;
    match inner.next() {
        None => Ok(lhs),
        Some(operator) => {
            let rhs = eval_expression(next_pair!(inner, span, "expression"))?;
            combine(&lhs, &operator, &rhs)
        }
    }
}

fn eval_amount(amount: Pair<'_, Rule>) -> Result<Amount, Fault> {
    let span = amount.as_span();
    let mut magnitude = None;
    let mut unit = None;

    for pair in amount.into_inner() {
        match pair.as_rule() {
            Rule::number => {
                let parsed = pair.as_str().parse::<f64>().map_err(|e| Fault::Syntax {
                    position: position_of(pair.as_span().start_pos()),
                    message: format!("invalid number `{}': {}", pair.as_str(), e),
                })?;
                if !parsed.is_finite() {
                    return Err(Fault::NotFinite {
                        position: position_of(pair.as_span().start_pos()),
                    });
                }
                magnitude = Some(parsed);
            }
            Rule::unit => unit = Some(pair.as_str().to_string()),
            _ => return Err(unexpected(&pair)),
        }
    }

    match magnitude {
        Some(magnitude) => Ok(Amount { magnitude, unit }),
        None => Err(Fault::Syntax {
            position: position_of(span.start_pos()),
            message: format!("amount `{}' has no number", span.as_str()),
        }),
    }
}

fn combine(lhs: &Amount, operator: &Pair<'_, Rule>, rhs: &Amount) -> Result<Amount, Fault> {
    let op = Operator::from_symbol(operator.as_str()).ok_or_else(|| unexpected(operator))?;
    let position = position_of(operator.as_span().start_pos());
    let result = lhs.checked(op, rhs).ok_or_else(|| Fault::UnitMismatch {
        position,
        operator: op.symbol(),
        lhs: lhs.to_string(),
        rhs: rhs.to_string(),
    })?;
    // inf and NaN have no journal syntax
    if !result.magnitude.is_finite() {
        return Err(Fault::NotFinite { position });
    }
    Ok(result)
}

#[cfg(test)]
mod tests {
    use crate::amount::{evaluate, Amount, Operator};
    use crate::{Fault, Position};

    use anyhow::Result;

    #[test]
    fn evaluate_simple_amounts() -> Result<()> {
        let cases = [
            ("5.12 EUR", Amount::new(5.12, Some("EUR"))),
            ("6.99EUR", Amount::new(6.99, Some("EUR"))),
            ("€ 1234.00", Amount::new(1234.0, Some("€"))),
            ("€9", Amount::new(9.0, Some("€"))),
            ("-5.12 EUR", Amount::new(-5.12, Some("EUR"))),
            ("-6.99EUR", Amount::new(-6.99, Some("EUR"))),
            ("€ -1234.00", Amount::new(-1234.0, Some("€"))),
            ("€-9", Amount::new(-9.0, Some("€"))),
            ("-123.45", Amount::new(-123.45, None)),
            ("5", Amount::new(5.0, None)),
        ];

        for (input, expected) in cases {
            assert_eq!(evaluate(input)?, expected, "evaluating {:?}", input);
        }
        Ok(())
    }

    #[test]
    fn evaluate_expressions() -> Result<()> {
        let cases = [
            ("(1+1)", Amount::new(2.0, None)),
            ("1+1", Amount::new(2.0, None)),
            ("(2-1)", Amount::new(1.0, None)),
            ("(€5*5)", Amount::new(25.0, Some("€"))),
            ("(25€/5)", Amount::new(5.0, Some("€"))),
            ("(1 +1)", Amount::new(2.0, None)),
            ("(1 +(1 -1))", Amount::new(1.0, None)),
            ("(2- 1)", Amount::new(1.0, None)),
            ("(€5 * 5)", Amount::new(25.0, Some("€"))),
            ("(25€/ 5)", Amount::new(5.0, Some("€"))),
            ("(5 * 5)", Amount::new(25.0, None)),
            ("2 * 3 EUR", Amount::new(6.0, Some("EUR"))),
            ("(1 EUR + 2 EUR) * 2", Amount::new(6.0, Some("EUR"))),
        ];

        for (input, expected) in cases {
            assert_eq!(evaluate(input)?, expected, "evaluating {:?}", input);
        }
        Ok(())
    }

    #[test]
    fn subtraction_groups_to_the_right() -> Result<()> {
        // expression := term ('-' expression), so 10 - 4 - 3 is 10 - (4 - 3)
        assert_eq!(evaluate("10 - 4 - 3")?, Amount::new(9.0, None));
        assert_eq!(evaluate("(10 - 4) - 3")?, Amount::new(3.0, None));
        Ok(())
    }

    #[test]
    fn reject_malformed_amounts() {
        for input in ["", "9€90", "EUR", "(1 + 1", "1 @ 2"] {
            match evaluate(input) {
                Err(Fault::Syntax { .. }) => {}
                other => panic!("{:?} should be a syntax fault, got {:?}", input, other),
            }
        }
    }

    #[test]
    fn reject_incompatible_units() {
        assert_eq!(
            evaluate("1 EUR + 1 USD"),
            Err(Fault::UnitMismatch {
                position: Position { row: 1, column: 7 },
                operator: '+',
                lhs: "1 EUR".to_string(),
                rhs: "1 USD".to_string(),
            })
        );
        assert!(matches!(
            evaluate("(1 EUR - 1)"),
            Err(Fault::UnitMismatch { operator: '-', .. })
        ));
        assert!(matches!(
            evaluate("(€5 * €5)"),
            Err(Fault::UnitMismatch { operator: '*', .. })
        ));
        assert!(matches!(
            evaluate("(€5 / 5 USD)"),
            Err(Fault::UnitMismatch { operator: '/', .. })
        ));
    }

    #[test]
    fn reject_non_finite_results() {
        assert_eq!(
            evaluate("(1 EUR / 0)"),
            Err(Fault::NotFinite {
                position: Position { row: 1, column: 8 }
            })
        );
        assert!(matches!(
            evaluate("0 / 0"),
            Err(Fault::NotFinite { .. })
        ));
        let huge = "9".repeat(400);
        assert_eq!(
            evaluate(&format!("€ {}", huge)),
            Err(Fault::NotFinite {
                position: Position { row: 1, column: 3 }
            })
        );
    }

    #[test]
    fn checked_units() {
        let euro = Amount::new(10.0, Some("€"));
        let plain = Amount::new(4.0, None);

        assert_eq!(
            euro.checked(Operator::Subtract, &Amount::new(2.5, Some("€"))),
            Some(Amount::new(7.5, Some("€")))
        );
        assert_eq!(
            plain.checked(Operator::Divide, &euro),
            Some(Amount::new(0.4, Some("€")))
        );
        assert_eq!(euro.checked(Operator::Add, &plain), None);
        assert_eq!(euro.checked(Operator::Multiply, &euro), None);
    }

    #[test]
    fn display_amount() {
        assert_eq!(Amount::new(-12.5, Some("€")).to_string(), "-12.5 €");
        assert_eq!(Amount::new(100.0, None).to_string(), "100");
    }
}
