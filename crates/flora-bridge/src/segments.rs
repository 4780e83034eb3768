//! Segment planner
//!
//! Every statement whose cost grows with the table is split into half-open
//! `[start, end)` ranges over the name keyspace and run one range at a time.
//! Each range is bounded, retryable on its own, and resumable: the step's
//! predicate (e.g. `parent_id IS NULL`) skips rows a finished range already
//! fixed, so repeating a range is a no-op.
//!
//! Names compare in codepoint order (`COLLATE "C"` on the SQL side, plain
//! `str` ordering here), which is what makes the Rust-side [`Segment::contains`]
//! agree with the SQL predicate.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tracing::{info, warn};

use crate::db::{Database, Statement};
use crate::error::{BridgeError, BridgeResult};

/// Upper bound on rows fed to the quantile sort
const QUANTILE_SAMPLE_TARGET: f64 = 500_000.0;

/// Leading-letter bucket split in two because it is overrepresented
const SPLIT_LETTER: char = 'S';
const SPLIT_AT: &str = "Sm";

/// A half-open interval of names; `end == None` means "no upper bound"
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    pub name: String,
    pub start: String,
    pub end: Option<String>,
}

impl Segment {
    pub fn new(name: impl Into<String>, start: impl Into<String>, end: Option<&str>) -> Self {
        Self {
            name: name.into(),
            start: start.into(),
            end: end.map(str::to_string),
        }
    }

    pub fn contains(&self, value: &str) -> bool {
        value >= self.start.as_str() && self.end.as_deref().map_or(true, |end| value < end)
    }

    /// SQL predicate restricting `column` to this segment
    ///
    /// Uses placeholders starting at `$first_param`; the end placeholder only
    /// exists for bounded segments, matching [`Statement::bind_segment`].
    pub fn sql_predicate(&self, column: &str, first_param: usize) -> String {
        match self.end {
            Some(_) => format!(
                "{column} COLLATE \"C\" >= ${first_param} AND {column} COLLATE \"C\" < ${}",
                first_param + 1
            ),
            None => format!("{column} COLLATE \"C\" >= ${first_param}"),
        }
    }
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.end {
            Some(end) => write!(f, "{} [{:?}, {:?})", self.name, self.start, end),
            None => write!(f, "{} [{:?}, ∞)", self.name, self.start),
        }
    }
}

/// How the keyspace is partitioned
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SegmentStrategy {
    /// Fixed per-letter buckets
    #[default]
    Alphabetic,
    /// Balanced buckets sampled from the data
    Quantile { buckets: u16 },
}

impl FromStr for SegmentStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lowered = s.trim().to_lowercase();
        if lowered == "alphabetic" {
            return Ok(SegmentStrategy::Alphabetic);
        }

        let buckets = lowered
            .strip_prefix("quantile:")
            .ok_or_else(|| format!("expected 'alphabetic' or 'quantile:<n>', got '{s}'"))?
            .parse::<u16>()
            .map_err(|e| format!("invalid bucket count: {e}"))?;

        if buckets < 2 {
            return Err("quantile segmentation needs at least 2 buckets".to_string());
        }

        Ok(SegmentStrategy::Quantile { buckets })
    }
}

impl fmt::Display for SegmentStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SegmentStrategy::Alphabetic => write!(f, "alphabetic"),
            SegmentStrategy::Quantile { buckets } => write!(f, "quantile:{buckets}"),
        }
    }
}

/// Ordered, contiguous segments covering the whole keyspace
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentPlan {
    segments: Vec<Segment>,
}

impl SegmentPlan {
    /// One bucket per leading letter, `S` split at `"Sm"`
    ///
    /// The first bucket starts at the empty string (everything sorting before
    /// `B`, digits and punctuation included) and the last one is unbounded, so
    /// lowercase and non-Latin leading characters land in `Z`.
    pub fn alphabetic() -> Self {
        let mut bounds: Vec<(String, String)> = Vec::new();
        for letter in 'B'..='Z' {
            bounds.push((letter.to_string(), letter.to_string()));
            if letter == SPLIT_LETTER {
                bounds.push((SPLIT_AT.to_string(), SPLIT_AT.to_string()));
            }
        }

        let mut segments = Vec::with_capacity(bounds.len() + 1);
        let mut start = (String::from("A"), String::new());
        for (name, cut) in bounds {
            segments.push(Segment {
                name: start.0,
                start: start.1,
                end: Some(cut.clone()),
            });
            start = (name, cut);
        }
        segments.push(Segment {
            name: start.0,
            start: start.1,
            end: None,
        });

        Self { segments }
    }

    /// Contiguous plan from arbitrary cut points
    ///
    /// Cut points are sorted and deduplicated; empty strings are ignored since
    /// the first segment always starts at the empty string.
    pub fn from_boundaries<I, S>(cuts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut cuts: Vec<String> = cuts
            .into_iter()
            .map(Into::into)
            .filter(|c| !c.is_empty())
            .collect();
        cuts.sort_unstable();
        cuts.dedup();

        let mut segments = Vec::with_capacity(cuts.len() + 1);
        let mut start = String::new();
        for (index, cut) in cuts.into_iter().enumerate() {
            segments.push(Segment {
                name: format!("q{:02}", index + 1),
                start: std::mem::replace(&mut start, cut.clone()),
                end: Some(cut),
            });
        }
        segments.push(Segment {
            name: format!("q{:02}", segments.len() + 1),
            start,
            end: None,
        });

        Self { segments }
    }

    /// Balanced plan from a sample of `table.column`
    ///
    /// Falls back to [`SegmentPlan::alphabetic`] when the table is empty.
    pub async fn quantiles(
        db: &mut Database,
        table: &str,
        column: &str,
        buckets: u16,
    ) -> BridgeResult<Self> {
        if buckets < 2 {
            return Err(BridgeError::config("quantile segmentation needs at least 2 buckets"));
        }

        let estimated_rows: Option<f64> = db
            .fetch_scalar(
                &Statement::new(
                    "estimate rows",
                    "SELECT reltuples::float8 FROM pg_class WHERE oid = to_regclass($1)",
                )
                .bind_text(table),
            )
            .await
            .ok()
            .flatten();

        let sample_percent = sample_percent(estimated_rows.unwrap_or(0.0));
        let fractions = quantile_fractions(buckets)
            .iter()
            .map(|f| format!("{f:.6}"))
            .collect::<Vec<_>>()
            .join(",");

        let sql = format!(
            "SELECT percentile_disc(ARRAY[{fractions}]::float8[]) \
             WITHIN GROUP (ORDER BY {column} COLLATE \"C\") \
             FROM {table} TABLESAMPLE BERNOULLI ({sample_percent}) \
             WHERE {column} IS NOT NULL AND {column} <> ''"
        );

        let cuts: Option<Vec<String>> = db
            .fetch_scalar(&Statement::new("sample name quantiles", sql).on_table("pg_class"))
            .await?;

        match cuts {
            Some(cuts) if !cuts.is_empty() => {
                let plan = Self::from_boundaries(cuts);
                info!(table, column, buckets, segments = plan.len(), sample_percent, "Quantile segment plan");
                Ok(plan)
            },
            _ => {
                warn!(table, column, "No names sampled; using alphabetic segments");
                Ok(Self::alphabetic())
            },
        }
    }

    /// Plan for a step over `table.column` according to `strategy`
    pub async fn for_strategy(
        strategy: SegmentStrategy,
        db: &mut Database,
        table: &str,
        column: &str,
    ) -> BridgeResult<Self> {
        match strategy {
            SegmentStrategy::Alphabetic => Ok(Self::alphabetic()),
            SegmentStrategy::Quantile { buckets } => {
                Self::quantiles(db, table, column, buckets).await
            },
        }
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Segment> {
        self.segments.iter()
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// The single segment containing `value`
    pub fn locate(&self, value: &str) -> Option<&Segment> {
        self.segments.iter().find(|s| s.contains(value))
    }
}

impl<'a> IntoIterator for &'a SegmentPlan {
    type Item = &'a Segment;
    type IntoIter = std::slice::Iter<'a, Segment>;

    fn into_iter(self) -> Self::IntoIter {
        self.segments.iter()
    }
}

/// Interior cut fractions for `buckets` equal-sized buckets
fn quantile_fractions(buckets: u16) -> Vec<f64> {
    (1..buckets)
        .map(|i| f64::from(i) / f64::from(buckets))
        .collect()
}

/// Bernoulli sample percentage keeping roughly [`QUANTILE_SAMPLE_TARGET`] rows
fn sample_percent(estimated_rows: f64) -> f64 {
    if estimated_rows <= QUANTILE_SAMPLE_TARGET {
        100.0
    } else {
        (QUANTILE_SAMPLE_TARGET / estimated_rows * 100.0).clamp(0.01, 100.0)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn assert_contiguous(plan: &SegmentPlan) {
        let segments = plan.segments();
        assert_eq!(segments[0].start, "");
        assert!(segments.last().unwrap().end.is_none());
        for pair in segments.windows(2) {
            assert_eq!(pair[0].end.as_deref(), Some(pair[1].start.as_str()));
            assert!(pair[0].start < pair[1].start);
        }
    }

    #[test]
    fn test_alphabetic_plan_shape() {
        let plan = SegmentPlan::alphabetic();
        assert_eq!(plan.len(), 27);
        assert_contiguous(&plan);

        let names: Vec<&str> = plan.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names.first(), Some(&"A"));
        assert_eq!(names.last(), Some(&"Z"));
        assert!(names.contains(&"Sm"));
    }

    #[test]
    fn test_boundary_values_belong_to_exactly_one_segment() {
        let plan = SegmentPlan::alphabetic();
        let mut samples: Vec<String> = plan.iter().map(|s| s.start.clone()).collect();
        samples.extend(plan.iter().filter_map(|s| s.end.clone()));
        samples.extend(
            ["", "0 hybrid", "Abies", "Rz", "Sa", "Sm", "Smilax", "Sz", "Zea", "zea", "Ωmega", "\u{10FFFF}"]
                .map(String::from),
        );

        for sample in samples {
            let hits = plan.iter().filter(|s| s.contains(&sample)).count();
            assert_eq!(hits, 1, "{sample:?} matched {hits} segments");
        }
    }

    #[test]
    fn test_locate_matches_leading_letter() {
        let plan = SegmentPlan::alphabetic();
        assert_eq!(plan.locate("Rosa canina").map(|s| s.name.as_str()), Some("R"));
        assert_eq!(plan.locate("Salix").map(|s| s.name.as_str()), Some("S"));
        assert_eq!(plan.locate("Solanum").map(|s| s.name.as_str()), Some("Sm"));
        assert_eq!(plan.locate("×Crataemespilus").map(|s| s.name.as_str()), Some("Z"));
    }

    #[test]
    fn test_from_boundaries_sorts_and_dedups() {
        let plan = SegmentPlan::from_boundaries(vec!["M", "", "D", "M", "T"]);
        assert_eq!(plan.len(), 4);
        assert_contiguous(&plan);
        assert_eq!(plan.segments()[1].start, "D");
        assert_eq!(plan.locate("Mentha").map(|s| s.name.as_str()), Some("q03"));
    }

    #[test]
    fn test_from_no_boundaries_is_single_unbounded_segment() {
        let plan = SegmentPlan::from_boundaries(Vec::<String>::new());
        assert_eq!(plan.len(), 1);
        assert!(plan.segments()[0].contains("anything"));
    }

    #[test]
    fn test_sql_predicate_placeholders() {
        let bounded = Segment::new("B", "B", Some("C"));
        assert_eq!(
            bounded.sql_predicate("c.full_name", 2),
            "c.full_name COLLATE \"C\" >= $2 AND c.full_name COLLATE \"C\" < $3"
        );

        let open = Segment::new("Z", "Z", None);
        assert_eq!(open.sql_predicate("full_name", 1), "full_name COLLATE \"C\" >= $1");
    }

    #[test]
    fn test_strategy_parsing() {
        assert_eq!("alphabetic".parse(), Ok(SegmentStrategy::Alphabetic));
        assert_eq!("Quantile:40".parse(), Ok(SegmentStrategy::Quantile { buckets: 40 }));
        assert!("quantile:1".parse::<SegmentStrategy>().is_err());
        assert!("random".parse::<SegmentStrategy>().is_err());
        assert_eq!(SegmentStrategy::Quantile { buckets: 8 }.to_string(), "quantile:8");
    }

    #[test]
    fn test_quantile_helpers() {
        assert_eq!(quantile_fractions(4), vec![0.25, 0.5, 0.75]);
        assert_eq!(sample_percent(1_000.0), 100.0);
        assert_eq!(sample_percent(5_000_000.0), 10.0);
    }
}
