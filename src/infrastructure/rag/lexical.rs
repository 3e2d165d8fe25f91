//! Okapi BM25 over a small in-memory corpus

use std::collections::HashMap;

use crate::infrastructure::text::tokenize;

pub const BM25_K1: f32 = 1.2;
pub const BM25_B: f32 = 0.75;

/// BM25 index built over a handful of candidate texts
#[derive(Debug)]
pub struct Bm25Index {
    doc_terms: Vec<HashMap<String, usize>>,
    doc_lengths: Vec<usize>,
    doc_freq: HashMap<String, usize>,
    avg_doc_len: f32,
}

impl Bm25Index {
    pub fn new<S: AsRef<str>>(documents: &[S]) -> Self {
        let mut doc_terms = Vec::with_capacity(documents.len());
        let mut doc_lengths = Vec::with_capacity(documents.len());
        let mut doc_freq: HashMap<String, usize> = HashMap::new();

        for doc in documents {
            let tokens = tokenize(doc.as_ref());
            doc_lengths.push(tokens.len());

            let mut terms: HashMap<String, usize> = HashMap::new();
            for token in tokens {
                *terms.entry(token).or_insert(0) += 1;
            }
            for term in terms.keys() {
                *doc_freq.entry(term.clone()).or_insert(0) += 1;
            }
            doc_terms.push(terms);
        }

        let total: usize = doc_lengths.iter().sum();
        let avg_doc_len = if doc_lengths.is_empty() {
            0.0
        } else {
            total as f32 / doc_lengths.len() as f32
        };

        Self {
            doc_terms,
            doc_lengths,
            doc_freq,
            avg_doc_len,
        }
    }

    pub fn len(&self) -> usize {
        self.doc_terms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.doc_terms.is_empty()
    }

    /// Score of every document for the query, in document order
    pub fn scores(&self, query: &str) -> Vec<f32> {
        let query_terms = tokenize(query);
        let n = self.len() as f32;

        (0..self.len())
            .map(|i| {
                let length_norm = if self.avg_doc_len > 0.0 {
                    self.doc_lengths[i] as f32 / self.avg_doc_len
                } else {
                    0.0
                };

                query_terms
                    .iter()
                    .filter_map(|term| {
                        let tf = *self.doc_terms[i].get(term)? as f32;
                        let df = *self.doc_freq.get(term)? as f32;
                        let idf = (1.0 + (n - df + 0.5) / (df + 0.5)).ln();
                        Some(
                            idf * tf * (BM25_K1 + 1.0)
                                / (tf + BM25_K1 * (1.0 - BM25_B + BM25_B * length_norm)),
                        )
                    })
                    .sum()
            })
            .collect()
    }

    /// Best `k` documents as `(position, score)`, highest first
    pub fn top(&self, query: &str, k: usize) -> Vec<(usize, f32)> {
        let mut ranked: Vec<(usize, f32)> = self.scores(query).into_iter().enumerate().collect();
        ranked.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
        ranked.truncate(k);
        ranked
    }
}
