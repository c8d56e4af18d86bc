//! Splitting free-text analysis labels into sample name, analysis name and
//! session index.

pub mod rules;

use crate::constants::DELIMITERS;
use crate::error::{ImportError, Result};
use crate::pipeline::processing::table::{Cell, DecodedTable, MetaFrame};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use tracing::{debug, info, instrument};

pub use rules::{SuffixRule, SuffixRules};

/// Composite key of a generalized row
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct AnalysisKey {
    /// `None` for spot-only data
    pub sample_name: Option<String>,
    pub analysis_name: Option<String>,
    pub session_index: Option<i64>,
}

/// One measurement row after name generalization
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GeneralizedRow {
    pub key: AnalysisKey,
    /// The cleaned original label
    pub analysis: String,
    pub values: Vec<Cell>,
}

/// Decoded table re-keyed by `(sample_name, analysis_name, session_index)`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GeneralizedTable {
    pub meta: MetaFrame,
    pub rows: Vec<GeneralizedRow>,
}

impl GeneralizedTable {
    /// Distinct sample names in order of first appearance
    pub fn sample_names(&self) -> Vec<Option<String>> {
        let mut seen = HashSet::new();
        self.rows
            .iter()
            .filter(|r| seen.insert(r.key.sample_name.clone()))
            .map(|r| r.key.sample_name.clone())
            .collect()
    }

    /// Rows belonging to one sample (a `None` name selects spot-only rows)
    pub fn rows_for_sample<'a, 'b>(
        &'a self,
        sample_name: Option<&'b str>,
    ) -> impl Iterator<Item = &'a GeneralizedRow> + 'b
    where
        'a: 'b,
    {
        self.rows
            .iter()
            .filter(move |r| r.key.sample_name.as_deref() == sample_name)
    }

    /// Row count per sample, in order of first appearance
    pub fn sample_counts(&self) -> Vec<(Option<String>, usize)> {
        self.sample_names()
            .into_iter()
            .map(|name| {
                let n = self.rows_for_sample(name.as_deref()).count();
                (name, n)
            })
            .collect()
    }

    /// Value of a named column in a row
    pub fn value<'a>(&self, row: &'a GeneralizedRow, key: &str) -> Option<&'a Cell> {
        self.meta.position(key).and_then(|i| row.values.get(i))
    }
}

/// Thresholds for deciding whether a split is trustworthy
#[derive(Debug, Clone, Copy)]
pub struct GeneralizeOptions {
    pub uniqueness_threshold: f64,
    pub max_sample_fraction: f64,
    pub min_samples_for_check: usize,
}

impl Default for GeneralizeOptions {
    fn default() -> Self {
        Self {
            uniqueness_threshold: 0.4,
            max_sample_fraction: 0.3,
            min_samples_for_check: 20,
        }
    }
}

impl From<&crate::config::ImportConfig> for GeneralizeOptions {
    fn from(config: &crate::config::ImportConfig) -> Self {
        Self {
            uniqueness_threshold: config.uniqueness_threshold,
            max_sample_fraction: config.max_sample_fraction,
            min_samples_for_check: config.min_samples_for_check,
        }
    }
}

pub struct SampleGeneralizer {
    rules: SuffixRules,
    options: GeneralizeOptions,
}

impl Default for SampleGeneralizer {
    fn default() -> Self {
        Self::new(SuffixRules::default(), GeneralizeOptions::default())
    }
}

struct Split {
    label: String,
    sample_name: Option<String>,
    analysis_name: Option<String>,
    values: Vec<Cell>,
}

impl SampleGeneralizer {
    pub fn new(rules: SuffixRules, options: GeneralizeOptions) -> Self {
        Self { rules, options }
    }

    /// Split one label into `(sample_name, analysis_name)` before any
    /// group-level consistency checks.
    pub fn split_label(&self, label: &str) -> (String, Option<String>) {
        let analysis_name = self.rules.extract(label).map(|(_, suffix)| suffix);
        let stem = match &analysis_name {
            Some(suffix) => label.strip_suffix(suffix.as_str()).unwrap_or(label),
            None => label,
        };
        (stem.trim_end_matches(DELIMITERS).to_string(), analysis_name)
    }

    #[instrument(skip(self, table), fields(rows = table.data.len()))]
    pub fn generalize(&self, table: DecodedTable) -> Result<GeneralizedTable> {
        let DecodedTable { data, meta } = table;

        let mut splits: Vec<Split> = data
            .into_rows()
            .into_iter()
            .map(|row| {
                let label = row.label.trim_matches(DELIMITERS).to_string();
                let (sample, analysis_name) = self.split_label(&label);
                Split {
                    label,
                    sample_name: Some(sample),
                    analysis_name,
                    values: row.values,
                }
            })
            .collect();

        // Group rows by their provisional sample name, keeping first-seen order
        let mut order: Vec<String> = Vec::new();
        let mut groups: HashMap<String, Vec<usize>> = HashMap::new();
        for (i, split) in splits.iter().enumerate() {
            let name = split.sample_name.clone().unwrap_or_default();
            groups
                .entry(name.clone())
                .or_insert_with(|| {
                    order.push(name);
                    Vec::new()
                })
                .push(i);
        }

        for name in &order {
            let members = &groups[name];
            let unique: HashSet<Option<&str>> = members
                .iter()
                .map(|&i| splits[i].analysis_name.as_deref())
                .collect();
            let ratio = unique.len() as f64 / members.len() as f64;

            if ratio < self.options.uniqueness_threshold {
                // Suffixes do not discriminate spots; they are part of the sample id
                debug!(sample = %name, ratio, "Falling back to full labels for sample group");
                for &i in members {
                    splits[i].sample_name = Some(splits[i].label.clone());
                    splits[i].analysis_name = None;
                }
            }

            if name.starts_with("Spot") {
                // No sample name at all, only spot identifiers
                for &i in members {
                    splits[i].sample_name = None;
                    splits[i].analysis_name = Some(splits[i].label.clone());
                }
            }
        }

        let distinct: HashSet<&Option<String>> = splits.iter().map(|s| &s.sample_name).collect();
        let n_samples = distinct.len();
        let rows = splits.len();
        if n_samples as f64 > self.options.max_sample_fraction * rows as f64
            && n_samples > self.options.min_samples_for_check
        {
            return Err(ImportError::TooManyUniqueSamples {
                samples: n_samples,
                rows,
            });
        }

        let rows: Vec<GeneralizedRow> = splits
            .into_iter()
            .map(|s| {
                let session_index = s.analysis_name.as_deref().and_then(session_index);
                GeneralizedRow {
                    key: AnalysisKey {
                        sample_name: s.sample_name,
                        analysis_name: s.analysis_name,
                        session_index,
                    },
                    analysis: s.label,
                    values: s.values,
                }
            })
            .collect();

        let table = GeneralizedTable { meta, rows };
        for (name, count) in table.sample_counts() {
            info!(
                sample = name.as_deref().unwrap_or("<spots only>"),
                analyses = count,
                "Sample"
            );
        }
        Ok(table)
    }
}

/// Numeric session index of an analysis name, ignoring a literal `Spot`.
pub fn session_index(analysis_name: &str) -> Option<i64> {
    let cleaned = analysis_name.replace("Spot", "");
    let cleaned = cleaned.trim_matches(DELIMITERS);
    if let Ok(ix) = cleaned.parse::<i64>() {
        return Some(ix);
    }
    cleaned
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .map(|v| v.trunc() as i64)
}
