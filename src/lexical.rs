//! Lexical matching of question text against indexed cell values.
//!
//! A question is cut into n-gram queries, the queries of every question on
//! a database go to the text index in one batch, and the returned cell
//! values are kept only if most of the value occurs verbatim in the
//! question.

use anyhow::Result;
use std::collections::{HashMap, HashSet};

use crate::config::LexicalConfig;
use crate::models::{group_hits, Relevance, RetrievalHit, ValueMap};
use crate::text_index::{IndexDocument, TextSearchIndex};

/// Separator between the parts of an index document id.
pub const ID_SEPARATOR: &str = "-**-";

/// Documents returned per query, parsed and deduplicated per query.
pub type QueryHits = HashMap<String, Vec<IndexDocument>>;

const CLITICS: &[&str] = &["n't", "'s", "'re", "'ve", "'ll", "'d", "'m"];

/// Split text into word and punctuation tokens.
///
/// Words are runs of alphanumerics and `_`; `-`, `.` and `'` stay inside a
/// word when both neighbours are alphanumeric. English clitics (`'s`,
/// `n't`, ..) are split off as their own tokens. Every other non-space
/// character is a token by itself.
pub fn tokenize(text: &str) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    let is_word = |c: char| c.is_alphanumeric() || c == '_';
    let mut tokens = Vec::new();
    let mut current = String::new();

    for (i, &c) in chars.iter().enumerate() {
        if is_word(c) {
            current.push(c);
            continue;
        }
        let joins = matches!(c, '-' | '.' | '\'')
            && !current.is_empty()
            && chars.get(i + 1).is_some_and(|&n| n.is_alphanumeric());
        if joins {
            current.push(c);
            continue;
        }
        if !current.is_empty() {
            push_word(&mut tokens, std::mem::take(&mut current));
        }
        if !c.is_whitespace() {
            tokens.push(c.to_string());
        }
    }
    if !current.is_empty() {
        push_word(&mut tokens, current);
    }
    tokens
}

fn push_word(tokens: &mut Vec<String>, word: String) {
    let lower = word.to_lowercase();
    for clitic in CLITICS {
        if lower.len() > clitic.len() && lower.ends_with(clitic) {
            let cut = word.len() - clitic.len();
            if word.is_char_boundary(cut) {
                tokens.push(word[..cut].to_string());
                tokens.push(word[cut..].to_string());
                return;
            }
        }
    }
    tokens.push(word);
}

/// All contiguous n-grams of the tokens of `text`, for n = 1..=max_n,
/// shortest first. Tokens inside a gram are joined by one space.
pub fn obtain_n_grams(text: &str, max_n: usize) -> Vec<String> {
    let tokens = tokenize(text);
    let mut grams = Vec::new();
    for n in 1..=max_n.min(tokens.len()) {
        for window in tokens.windows(n) {
            grams.push(window.join(" "));
        }
    }
    grams
}

/// The n-grams of `question_text` followed by the text itself, with
/// duplicates removed in first-seen order.
pub fn build_queries(question_text: &str, max_n: usize) -> Vec<String> {
    let mut queries = obtain_n_grams(question_text, max_n);
    queries.push(question_text.to_string());
    dedup_preserving_order(queries)
}

pub fn dedup_preserving_order<T: Clone + Eq + std::hash::Hash>(items: Vec<T>) -> Vec<T> {
    let mut seen = HashSet::with_capacity(items.len());
    items
        .into_iter()
        .filter(|item| seen.insert(item.clone()))
        .collect()
}

/// Fraction of `query` covered by its longest substring that occurs in
/// `target`, ignoring case. Zero when nothing matches or `query` is empty.
pub fn substring_match_score(query: &str, target: &str) -> f64 {
    let query: Vec<char> = query.to_lowercase().chars().collect();
    let target = target.to_lowercase();
    if query.is_empty() {
        return 0.0;
    }

    let mut best = 0usize;
    for start in 0..query.len() {
        // A longer match from this start implies every shorter one matched.
        let mut end = start + best + 1;
        while end <= query.len() {
            let candidate: String = query[start..end].iter().collect();
            if !target.contains(&candidate) {
                break;
            }
            best = end - start;
            end += 1;
        }
    }
    best as f64 / query.len() as f64
}

/// Split a document id `table-**-column-**-discriminator`.
pub fn parse_document_id(id: &str) -> Option<(&str, &str)> {
    let parts: Vec<&str> = id.split(ID_SEPARATOR).collect();
    match parts.as_slice() {
        [table, column, _] => Some((table, column)),
        _ => None,
    }
}

pub struct LexicalMatcher {
    max_ngram: usize,
    k: usize,
    threads: usize,
    min_score: f64,
    top_n: usize,
}

impl LexicalMatcher {
    pub fn new(config: &LexicalConfig) -> Self {
        Self {
            max_ngram: config.max_ngram,
            k: config.k,
            threads: config.threads,
            min_score: config.min_score,
            top_n: config.top_n,
        }
    }

    pub fn queries_for(&self, question_text: &str) -> Vec<String> {
        build_queries(question_text, self.max_ngram)
    }

    /// Search the queries of every question on one database in a single
    /// batch call.
    pub async fn search_database(
        &self,
        index: &dyn TextSearchIndex,
        question_texts: &[String],
    ) -> Result<QueryHits> {
        let queries = dedup_preserving_order(
            question_texts
                .iter()
                .flat_map(|text| self.queries_for(text))
                .collect(),
        );
        tracing::debug!(queries = queries.len(), "issuing lexical batch search");

        let results = index.batch_search(&queries, self.k, self.threads).await?;

        let mut query_hits = QueryHits::with_capacity(results.len());
        for (query, hits) in results {
            let raws = dedup_preserving_order(hits.into_iter().map(|h| h.raw).collect());
            let docs = raws
                .iter()
                .filter_map(|raw| match serde_json::from_str::<IndexDocument>(raw) {
                    Ok(doc) => Some(doc),
                    Err(e) => {
                        tracing::warn!(query = %query, "unparseable index document: {}", e);
                        None
                    }
                })
                .collect();
            query_hits.insert(query, docs);
        }
        Ok(query_hits)
    }

    /// Hits for one question gathered over its queries, deduplicated in
    /// first-seen order.
    pub fn gather(&self, query_hits: &QueryHits, question_text: &str) -> Vec<IndexDocument> {
        let docs: Vec<IndexDocument> = self
            .queries_for(question_text)
            .iter()
            .filter_map(|q| query_hits.get(q))
            .flatten()
            .cloned()
            .collect();
        dedup_by_id_and_contents(docs)
    }

    /// Score documents against the question, keep those above the minimum
    /// score, and return the best `top_n` ordered by score, value length,
    /// then original position, all descending.
    pub fn relevant_hits(&self, docs: &[IndexDocument], question_text: &str) -> Vec<RetrievalHit> {
        let mut accepted: Vec<(f64, usize, usize, RetrievalHit)> = Vec::new();

        for (index, doc) in docs.iter().enumerate() {
            let Some((table, column)) = parse_document_id(&doc.id) else {
                tracing::warn!(id = %doc.id, "malformed index document id");
                continue;
            };
            let score = substring_match_score(&doc.contents, question_text);
            if score > self.min_score {
                accepted.push((
                    score,
                    doc.contents.chars().count(),
                    index,
                    RetrievalHit {
                        table: table.to_string(),
                        column: column.to_string(),
                        content: doc.contents.clone(),
                        relevance: Relevance::Lexical(score),
                    },
                ));
            }
        }

        accepted.sort_by(|a, b| {
            b.0.partial_cmp(&a.0)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(b.1.cmp(&a.1))
                .then(b.2.cmp(&a.2))
        });
        accepted.truncate(self.top_n);
        accepted.into_iter().map(|(_, _, _, hit)| hit).collect()
    }

    /// Relevant values of one question, grouped by `table.column`.
    pub fn relevant_values(&self, query_hits: &QueryHits, question_text: &str) -> ValueMap {
        let docs = self.gather(query_hits, question_text);
        group_hits(&self.relevant_hits(&docs, question_text))
    }

    /// Single-question convenience: search, gather and score.
    pub async fn match_question(
        &self,
        index: &dyn TextSearchIndex,
        question_text: &str,
    ) -> Result<ValueMap> {
        let query_hits = self
            .search_database(index, &[question_text.to_string()])
            .await?;
        Ok(self.relevant_values(&query_hits, question_text))
    }
}

fn dedup_by_id_and_contents(docs: Vec<IndexDocument>) -> Vec<IndexDocument> {
    let mut seen: HashSet<(String, String)> = HashSet::new();
    docs.into_iter()
        .filter(|d| seen.insert((d.id.clone(), d.contents.clone())))
        .collect()
}
