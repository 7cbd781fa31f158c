use regex::{Regex, RegexBuilder};

use ti_format::Container;
use ti_tensor::Tensor;

use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::types::{SearchMatch, SearchResult};

/// A compiled search query.
#[derive(Debug)]
pub struct Query {
    text: String,
    regex: Option<Regex>,
    case_sensitive: bool,
    /// Numeric value of the query, when value search applies.
    number: Option<f64>,
}

impl Query {
    /// Compile `text`.
    ///
    /// With `use_regex` the text is a pattern and value search is disabled.
    /// Otherwise it is a substring, and also a value to look for when it
    /// parses as a finite number.
    pub fn new(text: &str, use_regex: bool, case_sensitive: bool) -> Result<Query> {
        let regex = if use_regex {
            let re = RegexBuilder::new(text)
                .case_insensitive(!case_sensitive)
                .build()
                .map_err(|e| EngineError::InvalidQuery(e.to_string()))?;
            Some(re)
        } else {
            None
        };
        let number = if use_regex {
            None
        } else {
            text.trim().parse::<f64>().ok().filter(|v| v.is_finite())
        };
        Ok(Query {
            text: text.to_string(),
            regex,
            case_sensitive,
            number,
        })
    }

    pub fn number(&self) -> Option<f64> {
        self.number
    }

    pub fn matches_key(&self, key: &str) -> bool {
        match &self.regex {
            Some(re) => re.is_match(key),
            None if self.case_sensitive => key.contains(&self.text),
            None => key.to_lowercase().contains(&self.text.to_lowercase()),
        }
    }
}

/// Elements of `tensor` equal to `target`, capped at `cap` entries.
///
/// Floats match within the absolute `tolerance`; integers match the target
/// truncated toward zero. Returns the reported matches (ending in a
/// `Truncated` marker when over the cap) and the uncapped count.
pub fn value_matches(
    tensor: &Tensor,
    target: f64,
    tolerance: f64,
    cap: usize,
) -> (Vec<SearchMatch>, usize) {
    let mut hits = Vec::new();
    let dtype = tensor.dtype();
    if dtype.is_float() {
        tensor.storage().for_each_f64(|i, v| {
            if (v - target).abs() < tolerance {
                hits.push(i);
            }
        });
    } else if dtype.is_integer() {
        tensor
            .storage()
            .for_each_int_eq(target.trunc() as i128, |i| hits.push(i));
    }

    let total = hits.len();
    let mut matches: Vec<SearchMatch> = hits
        .into_iter()
        .take(cap)
        .filter_map(|i| {
            tensor.element(i).map(|value| SearchMatch::Value {
                position: tensor.unravel(i),
                value,
            })
        })
        .collect();
    if total > cap {
        matches.push(SearchMatch::Truncated {
            remaining: total - cap,
        });
    }
    (matches, total)
}

/// Search every tensor of `container` for `query`, by key and by value.
///
/// Tensors are materialized one at a time and only when a value search
/// applies. Tensors without any match are left out of the result.
pub fn search_container(
    container: &Container,
    query: &Query,
    config: &EngineConfig,
) -> Result<Vec<SearchResult>> {
    let mut results = Vec::new();
    for entry in container.entries() {
        let mut matches = Vec::new();
        let mut total = 0;
        if query.matches_key(&entry.key) {
            matches.push(SearchMatch::Key);
            total += 1;
        }

        if let Some(target) = query.number() {
            if entry.dtype.is_numeric() {
                match container.read_tensor(&entry.key) {
                    Ok(tensor) => {
                        let (values, count) = value_matches(
                            &tensor,
                            target,
                            config.float_tolerance,
                            config.max_search_matches,
                        );
                        matches.extend(values);
                        total += count;
                    }
                    Err(e) => {
                        tracing::warn!("value search skipped for {}: {}", entry.key, e);
                    }
                }
            }
        }

        if !matches.is_empty() {
            results.push(SearchResult {
                key: entry.key.clone(),
                matches,
                total_matches: total,
            });
        }
    }
    Ok(results)
}
