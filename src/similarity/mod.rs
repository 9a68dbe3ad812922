//! TF-IDF vector space and cosine scoring.
//!
//! The query and every candidate are vectorized in one joint fit so that IDF
//! weights reflect the whole candidate population and scores stay comparable
//! across candidates within a run.

mod stop_words;

pub use stop_words::{is_stop_word, ENGLISH_STOP_WORDS};

use std::collections::{BTreeMap, BTreeSet, HashMap};
use thiserror::Error;

/// Tokens shorter than this are ignored.
const MIN_TOKEN_CHARS: usize = 2;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SimilarityError {
    /// Nothing in the corpus survived tokenization and stopword removal.
    #[error("empty vocabulary: every document contains only stop words or single characters")]
    EmptyVocabulary,
}

/// L2-normalized sparse vector, entries sorted by term index.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SparseVector {
    entries: Vec<(usize, f64)>,
}

impl SparseVector {
    pub fn is_zero(&self) -> bool {
        self.entries.is_empty()
    }

    /// Dot product. Both vectors are unit length (or zero), so this is the
    /// cosine similarity.
    pub fn dot(&self, other: &SparseVector) -> f64 {
        let (mut i, mut j) = (0, 0);
        let mut sum = 0.0;
        while i < self.entries.len() && j < other.entries.len() {
            let (a_idx, a_val) = self.entries[i];
            let (b_idx, b_val) = other.entries[j];
            match a_idx.cmp(&b_idx) {
                std::cmp::Ordering::Less => i += 1,
                std::cmp::Ordering::Greater => j += 1,
                std::cmp::Ordering::Equal => {
                    sum += a_val * b_val;
                    i += 1;
                    j += 1;
                }
            }
        }
        sum
    }
}

/// Cosine similarity of two fitted vectors, clamped to `[0, 1]`.
pub fn cosine(a: &SparseVector, b: &SparseVector) -> f64 {
    if a.is_zero() || b.is_zero() {
        return 0.0;
    }
    a.dot(b).clamp(0.0, 1.0)
}

/// Unigrams and bigrams of a normalized document, with stopwords removed
/// before the bigrams are formed.
pub fn terms(text: &str) -> Vec<String> {
    let tokens: Vec<&str> = text
        .split_whitespace()
        .filter(|t| t.chars().count() >= MIN_TOKEN_CHARS)
        .filter(|t| !is_stop_word(t))
        .collect();

    let mut out: Vec<String> = tokens.iter().map(|t| t.to_string()).collect();
    out.extend(tokens.windows(2).map(|w| format!("{} {}", w[0], w[1])));
    out
}

/// Result of fitting a TF-IDF model over a corpus.
#[derive(Debug, Clone)]
pub struct TfIdfMatrix {
    vocabulary: BTreeMap<String, usize>,
    idf: Vec<f64>,
    rows: Vec<SparseVector>,
}

impl TfIdfMatrix {
    /// Fit and transform a corpus in one pass.
    ///
    /// Term frequency is the raw count; IDF is smoothed as
    /// `ln((1 + n) / (1 + df)) + 1`; each row is L2-normalized.
    pub fn fit_transform<S: AsRef<str>>(corpus: &[S]) -> Result<Self, SimilarityError> {
        let counts: Vec<HashMap<String, u32>> = corpus
            .iter()
            .map(|doc| {
                let mut tf = HashMap::new();
                for term in terms(doc.as_ref()) {
                    *tf.entry(term).or_insert(0) += 1;
                }
                tf
            })
            .collect();

        // Sorted term order keeps indices independent of document order.
        let all_terms: BTreeSet<&str> = counts
            .iter()
            .flat_map(|tf| tf.keys().map(String::as_str))
            .collect();
        if all_terms.is_empty() {
            return Err(SimilarityError::EmptyVocabulary);
        }
        let vocabulary: BTreeMap<String, usize> = all_terms
            .into_iter()
            .enumerate()
            .map(|(idx, term)| (term.to_string(), idx))
            .collect();

        let mut doc_freq = vec![0usize; vocabulary.len()];
        for tf in &counts {
            for term in tf.keys() {
                if let Some(&idx) = vocabulary.get(term) {
                    doc_freq[idx] += 1;
                }
            }
        }

        let n = corpus.len() as f64;
        let idf: Vec<f64> = doc_freq
            .iter()
            .map(|&df| ((1.0 + n) / (1.0 + df as f64)).ln() + 1.0)
            .collect();

        let rows = counts
            .iter()
            .map(|tf| {
                let mut entries: Vec<(usize, f64)> = tf
                    .iter()
                    .filter_map(|(term, &count)| {
                        vocabulary
                            .get(term)
                            .map(|&idx| (idx, f64::from(count) * idf[idx]))
                    })
                    .collect();
                entries.sort_by_key(|&(idx, _)| idx);

                let norm = entries.iter().map(|(_, w)| w * w).sum::<f64>().sqrt();
                if norm > 0.0 {
                    for (_, w) in entries.iter_mut() {
                        *w /= norm;
                    }
                }
                SparseVector { entries }
            })
            .collect();

        Ok(Self {
            vocabulary,
            idf,
            rows,
        })
    }

    pub fn vocabulary_len(&self) -> usize {
        self.vocabulary.len()
    }

    pub fn idf(&self, term: &str) -> Option<f64> {
        self.vocabulary.get(term).map(|&idx| self.idf[idx])
    }

    pub fn rows(&self) -> &[SparseVector] {
        &self.rows
    }
}

/// Scores one query document against a batch of candidates.
#[derive(Debug, Clone, Copy)]
pub struct SimilarityEngine {
    min_text_length: usize,
}

impl SimilarityEngine {
    pub fn new(min_text_length: usize) -> Self {
        Self { min_text_length }
    }

    /// Whether a normalized query is long enough to be compared at all.
    pub fn accepts_query(&self, normalized_query: &str) -> bool {
        normalized_query.chars().count() >= self.min_text_length
    }

    /// Score `query` against each candidate.
    ///
    /// Returns `(candidate_index, score)` pairs sorted by descending score;
    /// equal scores keep candidate order. A short query or an empty
    /// candidate list yields an empty result. A failed fit aborts the whole
    /// batch.
    pub fn score<S: AsRef<str>>(
        &self,
        query: &str,
        candidates: &[S],
    ) -> Result<Vec<(usize, f64)>, SimilarityError> {
        if !self.accepts_query(query) || candidates.is_empty() {
            return Ok(Vec::new());
        }

        let mut corpus: Vec<&str> = Vec::with_capacity(candidates.len() + 1);
        corpus.push(query);
        corpus.extend(candidates.iter().map(|c| c.as_ref()));

        let matrix = TfIdfMatrix::fit_transform(&corpus)?;
        let query_vec = &matrix.rows[0];

        let mut scored: Vec<(usize, f64)> = matrix.rows[1..]
            .iter()
            .enumerate()
            .map(|(idx, row)| (idx, cosine(query_vec, row)))
            .collect();

        // `sort_by` is stable, so ties stay in fetch order.
        scored.sort_by(|a, b| b.1.total_cmp(&a.1));
        Ok(scored)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const EPS: f64 = 1e-9;

    #[test]
    fn test_terms_drop_stop_words_and_short_tokens() {
        let t = terms("add a dark theme option in settings x");
        assert_eq!(
            t,
            vec![
                "add",
                "dark",
                "theme",
                "option",
                "settings",
                "add dark",
                "dark theme",
                "theme option",
                "option settings",
            ]
        );
    }

    #[test]
    fn test_idf_is_smoothed() {
        let m = TfIdfMatrix::fit_transform(&["alpha beta", "alpha gamma"]).unwrap();
        // df = 2 of n = 2 -> ln(3/3) + 1
        assert!((m.idf("alpha").unwrap() - 1.0).abs() < EPS);
        // df = 1 of n = 2 -> ln(3/2) + 1
        assert!((m.idf("beta").unwrap() - ((1.5f64).ln() + 1.0)).abs() < EPS);
        assert!(m.idf("missing").is_none());
    }

    #[test]
    fn test_rows_are_unit_length() {
        let m = TfIdfMatrix::fit_transform(&["crash on login page", "login button broken"]).unwrap();
        for row in m.rows() {
            assert!((row.dot(row) - 1.0).abs() < EPS);
        }
    }

    #[test]
    fn test_empty_vocabulary_is_error() {
        let err = TfIdfMatrix::fit_transform(&["the and of", "a b c"]).unwrap_err();
        assert_eq!(err, SimilarityError::EmptyVocabulary);
    }

    #[test]
    fn test_zero_vector_scores_zero() {
        let engine = SimilarityEngine::new(0);
        let scores = engine.score("crash on startup", &["the of and"]).unwrap();
        assert_eq!(scores, vec![(0, 0.0)]);
    }

    #[test]
    fn test_self_similarity_is_one() {
        let engine = SimilarityEngine::new(0);
        let query = "application crashes when opening the settings page";
        let scores = engine
            .score(query, &["unrelated feature request for exports", query])
            .unwrap();
        assert_eq!(scores[0].0, 1);
        assert!((scores[0].1 - 1.0).abs() < EPS);
    }

    #[test]
    fn test_known_pair_score() {
        // Shared: add, dark, settings, "add dark" (idf 1). Query has 3 more
        // terms, candidate 5 more, each with idf ln(1.5) + 1.
        let engine = SimilarityEngine::new(0);
        let scores = engine
            .score("add dark mode to settings", &["add a dark theme option in settings"])
            .unwrap();
        let u = (1.5f64).ln() + 1.0;
        let expected = 4.0 / ((4.0 + 3.0 * u * u) * (4.0 + 5.0 * u * u)).sqrt();
        assert!((scores[0].1 - expected).abs() < EPS);
        assert!(scores[0].1 > 0.3 && scores[0].1 < 0.4);
    }

    #[test]
    fn test_short_query_returns_empty() {
        let engine = SimilarityEngine::new(20);
        assert!(!engine.accepts_query("too short"));
        assert!(engine.score("too short", &["too short"]).unwrap().is_empty());
    }

    #[test]
    fn test_empty_candidates_returns_empty() {
        let engine = SimilarityEngine::new(0);
        let none: [&str; 0] = [];
        assert!(engine.score("anything at all here", &none).unwrap().is_empty());
    }

    #[test]
    fn test_sorted_descending_with_stable_ties() {
        let engine = SimilarityEngine::new(0);
        let scores = engine
            .score(
                "memory leak in parser",
                &["totally different words", "memory leak in parser", "totally different words"],
            )
            .unwrap();
        assert_eq!(scores[0].0, 1);
        assert_eq!(scores[1].0, 0);
        assert_eq!(scores[2].0, 2);
        assert_eq!(scores[1].1, scores[2].1);
    }

    proptest! {
        #[test]
        fn prop_pairwise_symmetry(
            a in "[a-z]{2,8}( [a-z]{2,8}){1,10}",
            b in "[a-z]{2,8}( [a-z]{2,8}){1,10}",
        ) {
            let engine = SimilarityEngine::new(0);
            let ab = engine.score(&a, &[b.as_str()]);
            let ba = engine.score(&b, &[a.as_str()]);
            match (ab, ba) {
                (Ok(ab), Ok(ba)) => prop_assert!((ab[0].1 - ba[0].1).abs() < EPS),
                (Err(e1), Err(e2)) => prop_assert_eq!(e1, e2),
                _ => prop_assert!(false, "fit succeeded for one order only"),
            }
        }

        #[test]
        fn prop_scores_in_unit_interval(
            q in "[a-z]{2,6}( [a-z]{2,6}){0,8}",
            cands in proptest::collection::vec("[a-z]{2,6}( [a-z]{2,6}){0,8}", 1..6),
        ) {
            let engine = SimilarityEngine::new(0);
            if let Ok(scores) = engine.score(&q, &cands) {
                prop_assert_eq!(scores.len(), cands.len());
                for (_, s) in &scores {
                    prop_assert!((0.0..=1.0).contains(s));
                }
                prop_assert!(scores.windows(2).all(|w| w[0].1 >= w[1].1));
            }
        }
    }
}
