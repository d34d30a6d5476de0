use indexmap::IndexMap;

use std::cell::RefCell;
use std::collections::HashMap;
use std::hash::Hash;

/// Training observations: which category a list of tokens was filed under.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct History(Vec<(String, Vec<String>)>);

impl History {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn push(&mut self, category: &str, tokens: Vec<String>) {
        self.0.push((category.to_string(), tokens));
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.0
            .iter()
            .map(|(category, tokens)| (category.as_str(), tokens.as_slice()))
    }
}

impl FromIterator<(String, Vec<String>)> for History {
    fn from_iter<I: IntoIterator<Item = (String, Vec<String>)>>(iter: I) -> Self {
        History(iter.into_iter().collect())
    }
}

/// Counts occurrences, keyed in first-seen order.
pub fn frequencies<T, I>(items: I) -> IndexMap<T, usize>
where
    T: Hash + Eq,
    I: IntoIterator<Item = T>,
{
    let mut counts = IndexMap::new();
    for item in items {
        *counts.entry(item).or_insert(0) += 1;
    }
    counts
}

/// Lazily filled lookup table, owned by one trained model.
#[derive(Debug, Default)]
struct Memo<K>(RefCell<HashMap<K, f64>>);

impl<K: Hash + Eq + Copy> Memo<K> {
    fn get_or_insert_with(&self, key: K, f: impl FnOnce() -> f64) -> f64 {
        if let Some(&value) = self.0.borrow().get(&key) {
            return value;
        }
        let value = f();
        self.0.borrow_mut().insert(key, value);
        value
    }
}

/// Division that treats an undefined result as zero probability.
fn ratio(numerator: f64, denominator: f64) -> f64 {
    let p = numerator / denominator;
    if p.is_finite() {
        p
    } else {
        0f64
    }
}

/// Frequency tables over a closed [`History`], scoring how likely each known
/// category is for a list of tokens.
///
/// The model never changes after training. Probabilities are memoized in
/// caches owned by the model, so it can be moved to another thread but not
/// shared between threads.
#[derive(Debug)]
pub struct Categorizer {
    tokens: IndexMap<String, usize>,
    categories: IndexMap<String, usize>,
    // per category index: token index -> count
    joint: Vec<HashMap<usize, usize>>,
    token_total: usize,
    category_total: usize,
    joint_totals: Vec<usize>,

    p_token: Memo<usize>,
    p_category: Memo<usize>,
    p_token_in_category: Memo<(usize, usize)>,
}

impl Categorizer {
    pub fn train(history: &History) -> Categorizer {
        let tokens: IndexMap<String, usize> = frequencies(
            history
                .iter()
                .flat_map(|(_, tokens)| tokens.iter().cloned()),
        );
        let categories: IndexMap<String, usize> =
            frequencies(history.iter().map(|(category, _)| category.to_string()));

        let mut joint = vec![HashMap::new(); categories.len()];
        for (category, observed) in history.iter() {
            let Some(c) = categories.get_index_of(category) else {
                continue;
            };
            for token in observed {
                if let Some(t) = tokens.get_index_of(token.as_str()) {
                    *joint[c].entry(t).or_insert(0) += 1;
                }
            }
        }

        let joint_totals: Vec<usize> = joint
            .iter()
            .map(|counts: &HashMap<usize, usize>| counts.values().sum())
            .collect();

        Categorizer {
            token_total: tokens.values().sum(),
            category_total: categories.values().sum(),
            tokens,
            categories,
            joint,
            joint_totals,
            p_token: Memo::default(),
            p_category: Memo::default(),
            p_token_in_category: Memo::default(),
        }
    }

    /// Known categories, in the order they first appeared in the history.
    pub fn categories(&self) -> impl Iterator<Item = &str> {
        self.categories.keys().map(|category| category.as_str())
    }

    fn probability_token(&self, t: usize) -> f64 {
        self.p_token.get_or_insert_with(t, || {
            ratio(self.tokens[t] as f64, self.token_total as f64)
        })
    }

    fn probability_category(&self, c: usize) -> f64 {
        self.p_category.get_or_insert_with(c, || {
            ratio(self.categories[c] as f64, self.category_total as f64)
        })
    }

    fn probability_token_in_category(&self, t: usize, c: usize) -> f64 {
        self.p_token_in_category.get_or_insert_with((c, t), || {
            let count = self.joint[c].get(&t).copied().unwrap_or(0);
            ratio(count as f64, self.joint_totals[c] as f64)
        })
    }

    /// P(category | token); zero for tokens never seen in training.
    fn probability_category_for_token(&self, c: usize, t: Option<usize>) -> f64 {
        match t {
            Some(t) => ratio(
                self.probability_token_in_category(t, c) * self.probability_category(c),
                self.probability_token(t),
            ),
            None => 0f64,
        }
    }

    fn mean_probability(&self, c: usize, tokens: &[Option<usize>]) -> f64 {
        let sum: f64 = tokens
            .iter()
            .map(|&t| self.probability_category_for_token(c, t))
            .sum();
        sum / tokens.len() as f64
    }

    fn lookup<S: AsRef<str>>(&self, tokens: &[S]) -> Vec<Option<usize>> {
        assert!(!tokens.is_empty(), "cannot score an empty token list");
        tokens
            .iter()
            .map(|token| self.tokens.get_index_of(token.as_ref()))
            .collect()
    }

    /// Mean P(category | token) over `tokens`. Unknown categories score zero.
    ///
    /// # Panics
    ///
    /// Panics if `tokens` is empty.
    pub fn score<S: AsRef<str>>(&self, category: &str, tokens: &[S]) -> f64 {
        let tokens = self.lookup(tokens);
        match self.categories.get_index_of(category) {
            Some(c) => self.mean_probability(c, &tokens),
            None => 0f64,
        }
    }

    /// Scores every known category and returns those above zero, best first.
    /// Equal scores keep the order in which categories were first seen.
    ///
    /// # Panics
    ///
    /// Panics if `tokens` is empty.
    pub fn categorize<S: AsRef<str>>(&self, tokens: &[S]) -> Vec<(&str, f64)> {
        let tokens = self.lookup(tokens);
        let mut ranked: Vec<(&str, f64)> = self
            .categories
            .keys()
            .enumerate()
            .map(|(c, category)| (category.as_str(), self.mean_probability(c, &tokens)))
            .filter(|&(_, score)| score > 0f64)
            .collect();
        ranked.sort_by(|a, b| b.1.total_cmp(&a.1));
        ranked
    }
}

#[cfg(test)]
mod tests {
    use crate::categorizer::{frequencies, Categorizer, History};

    fn tokens(s: &str) -> Vec<String> {
        s.split_whitespace().map(|t| t.to_string()).collect()
    }

    fn groceries() -> History {
        let mut history = History::new();
        history.push("Expenses:Food", tokens("ALBERT HEIJN"));
        history.push("Expenses:Food", tokens("JUMBO"));
        history.push("Expenses:Fuel", tokens("SHELL"));
        history
    }

    #[test]
    fn count_frequencies() {
        let counts = frequencies(["b", "a", "b", "c", "b"]);
        assert_eq!(
            counts.into_iter().collect::<Vec<_>>(),
            vec![("b", 3), ("a", 1), ("c", 1)]
        );
    }

    #[test]
    fn rank_categories() {
        let model = Categorizer::train(&groceries());

        // P(SHELL|Fuel) = 1, P(Fuel) = 1/3, P(SHELL) = 1/4
        let ranked = model.categorize(&["SHELL"]);
        assert_eq!(ranked.len(), 1);
        assert_eq!(ranked[0].0, "Expenses:Fuel");
        assert!((ranked[0].1 - 4.0 / 3.0).abs() < 1e-12);

        // (1/3 * 2/3) / (1/4) for ALBERT, averaged with an unknown token
        let ranked = model.categorize(&["ALBERT", "NEVER-SEEN"]);
        assert_eq!(ranked.len(), 1);
        assert_eq!(ranked[0].0, "Expenses:Food");
        assert!((ranked[0].1 - 4.0 / 9.0).abs() < 1e-12);
    }

    #[test]
    fn unknown_tokens_score_zero() {
        let model = Categorizer::train(&groceries());
        assert_eq!(model.categorize(&["ESSO"]), vec![]);
        assert_eq!(model.score("Expenses:Food", &["ESSO"]), 0f64);
        assert_eq!(model.score("Expenses:Rent", &["SHELL"]), 0f64);
    }

    #[test]
    fn ties_keep_first_seen_order() {
        let mut history = History::new();
        history.push("Zeta", tokens("X"));
        history.push("Alpha", tokens("X"));
        let model = Categorizer::train(&history);

        assert_eq!(model.categorize(&["X"]), vec![("Zeta", 0.5), ("Alpha", 0.5)]);
        assert_eq!(model.categories().collect::<Vec<_>>(), vec!["Zeta", "Alpha"]);
    }

    #[test]
    fn training_is_pure() {
        let first = Categorizer::train(&groceries());
        let second = Categorizer::train(&groceries());
        let query = ["ALBERT", "JUMBO", "SHELL"];

        assert_eq!(first.categorize(&query), second.categorize(&query));
        // cached lookups agree with the first computation
        assert_eq!(first.categorize(&query), second.categorize(&query));
    }

    #[test]
    fn empty_history() {
        let model = Categorizer::train(&History::new());
        assert_eq!(model.categorize(&["ANYTHING"]), vec![]);
    }

    #[test]
    fn categories_without_tokens() {
        let mut history = groceries();
        history.push("Expenses:Misc", vec![]);
        let model = Categorizer::train(&history);
        assert_eq!(model.score("Expenses:Misc", &["SHELL"]), 0f64);
        assert_eq!(model.categorize(&["SHELL"])[0].0, "Expenses:Fuel");
    }

    #[test]
    #[should_panic(expected = "empty token list")]
    fn empty_query_is_rejected() {
        let model = Categorizer::train(&groceries());
        let empty: [&str; 0] = [];
        model.categorize(&empty);
    }

    #[test]
    fn independent_models_on_threads() {
        let handles: Vec<_> = (0..4)
            .map(|_| {
                std::thread::spawn(|| {
                    let model = Categorizer::train(&groceries());
                    model
                        .categorize(&["JUMBO"])
                        .into_iter()
                        .map(|(category, score)| (category.to_string(), score))
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        for handle in handles {
            let ranked = handle.join().expect("categorizer thread panicked");
            assert_eq!(ranked[0].0, "Expenses:Food");
        }
    }

    #[test]
    fn model_can_move_between_threads() {
        fn assert_send<T: Send>() {}
        assert_send::<Categorizer>();
    }

    #[test]
    fn history_from_iterator() {
        let history: History = vec![("A".to_string(), tokens("X Y"))]
            .into_iter()
            .collect();
        assert_eq!(history.len(), 1);
        assert_eq!(
            history.iter().collect::<Vec<_>>(),
            vec![("A", &["X".to_string(), "Y".to_string()][..])]
        );
    }
}
