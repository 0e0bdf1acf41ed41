//! Failure markers: text that fails a run even when every exit code is zero.
//!
//! Some tools report success despite internal failures and only say so in
//! their output. A [`MarkerSet`] holds the patterns that identify such
//! output; the supervisor checks every captured line against it, and
//! [`scan_for_marker`] does the same for an arbitrary line stream.

use std::pin::pin;

use futures::{Stream, StreamExt};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{HarnessError, HarnessResult};
use crate::stream::LogLine;

/// How a [`MarkerPattern`] is matched against a line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MarkerKind {
    /// The line contains the pattern as a literal substring.
    Contains,
    /// The pattern is a regular expression found anywhere in the line.
    Regex,
}

/// A single failure marker.
#[derive(Debug, Clone)]
pub struct MarkerPattern {
    kind: MarkerKind,
    pattern: String,
    regex: Option<Regex>,
}

impl MarkerPattern {
    /// Literal substring marker.
    pub fn contains(text: impl Into<String>) -> Self {
        Self {
            kind: MarkerKind::Contains,
            pattern: text.into(),
            regex: None,
        }
    }

    /// Regular expression marker. The expression is compiled up front so a
    /// bad pattern is reported before any process starts.
    pub fn regex(pattern: impl Into<String>) -> HarnessResult<Self> {
        let pattern = pattern.into();
        let regex = Regex::new(&pattern).map_err(|source| HarnessError::InvalidMarker {
            pattern: pattern.clone(),
            source,
        })?;
        Ok(Self {
            kind: MarkerKind::Regex,
            pattern,
            regex: Some(regex),
        })
    }

    pub fn kind(&self) -> MarkerKind {
        self.kind
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    pub fn is_match(&self, text: &str) -> bool {
        match (&self.kind, &self.regex) {
            (MarkerKind::Regex, Some(regex)) => regex.is_match(text),
            _ => text.contains(&self.pattern),
        }
    }
}

/// An ordered collection of markers. The first matching pattern wins.
#[derive(Debug, Clone, Default)]
pub struct MarkerSet {
    patterns: Vec<MarkerPattern>,
}

impl MarkerSet {
    pub fn new(patterns: Vec<MarkerPattern>) -> Self {
        Self { patterns }
    }

    /// Build a set from literal and regex pattern lists, as found in
    /// harness files and on the command line. Empty patterns are rejected.
    pub fn from_patterns(literals: &[String], regexes: &[String]) -> HarnessResult<Self> {
        let mut patterns = Vec::with_capacity(literals.len() + regexes.len());
        for literal in literals {
            if literal.is_empty() {
                return Err(HarnessError::EmptyMarker);
            }
            patterns.push(MarkerPattern::contains(literal.as_str()));
        }
        for regex in regexes {
            if regex.is_empty() {
                return Err(HarnessError::EmptyMarker);
            }
            patterns.push(MarkerPattern::regex(regex.as_str())?);
        }
        Ok(Self { patterns })
    }

    pub fn push(&mut self, pattern: MarkerPattern) {
        self.patterns.push(pattern);
    }

    /// A new set holding this set's patterns followed by `other`'s.
    pub fn combined(&self, other: &MarkerSet) -> MarkerSet {
        let mut patterns = self.patterns.clone();
        patterns.extend(other.patterns.iter().cloned());
        MarkerSet { patterns }
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &MarkerPattern> {
        self.patterns.iter()
    }

    /// The first pattern matching `text`, if any.
    pub fn find(&self, text: &str) -> Option<&MarkerPattern> {
        self.patterns.iter().find(|pattern| pattern.is_match(text))
    }
}

/// A line that matched a failure marker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MarkerHit {
    /// Name of the process that printed the line.
    pub source: String,
    /// The offending line.
    pub line: String,
    /// The pattern that matched.
    pub pattern: String,
}

impl MarkerHit {
    pub fn new(line: &LogLine, pattern: &MarkerPattern) -> Self {
        Self {
            source: line.source.clone(),
            line: line.text.clone(),
            pattern: pattern.pattern().to_owned(),
        }
    }
}

/// Result of scanning a whole line stream.
#[derive(Debug, Clone, Default)]
pub struct ScanOutcome {
    /// Number of lines consumed.
    pub lines: usize,
    /// Every line that matched a marker, in stream order.
    pub hits: Vec<MarkerHit>,
}

impl ScanOutcome {
    pub fn is_clean(&self) -> bool {
        self.hits.is_empty()
    }
}

/// Consume `lines` to the end and collect every marker hit.
///
/// The stream is always drained completely, so a hit on an early line does
/// not leave later lines (and their producers) stalled.
pub async fn scan_for_marker<S>(lines: S, markers: &MarkerSet) -> ScanOutcome
where
    S: Stream<Item = LogLine>,
{
    let mut lines = pin!(lines);
    let mut outcome = ScanOutcome::default();

    while let Some(line) = lines.next().await {
        outcome.lines += 1;
        if let Some(pattern) = markers.find(&line.text) {
            outcome.hits.push(MarkerHit::new(&line, pattern));
        }
    }

    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::StreamKind;

    fn line(source: &str, text: &str) -> LogLine {
        LogLine::new(source, StreamKind::Stdout, text)
    }

    #[test]
    fn contains_matches_substring() {
        let marker = MarkerPattern::contains("ERROR");
        assert!(marker.is_match("Jan 01 ERROR coverage failed"));
        assert!(!marker.is_match("error in lowercase"));
        assert_eq!(marker.kind(), MarkerKind::Contains);
    }

    #[test]
    fn regex_matches_anywhere() {
        let marker = MarkerPattern::regex(r"thread '.*' panicked").unwrap();
        assert!(marker.is_match("thread 'main' panicked at src/main.rs:1:1"));
        assert!(!marker.is_match("all good"));
        assert_eq!(marker.kind(), MarkerKind::Regex);
    }

    #[test]
    fn invalid_regex_is_rejected() {
        let err = MarkerPattern::regex("(unclosed").unwrap_err();
        assert!(matches!(err, HarnessError::InvalidMarker { .. }));
    }

    #[test]
    fn from_patterns_rejects_empty() {
        let err = MarkerSet::from_patterns(&[String::new()], &[]).unwrap_err();
        assert!(matches!(err, HarnessError::EmptyMarker));
    }

    #[test]
    fn find_returns_first_match() {
        let set = MarkerSet::from_patterns(
            &["CRIT".to_owned()],
            &["ERRO?R".to_owned()],
        )
        .unwrap();
        assert_eq!(set.len(), 2);
        assert_eq!(set.find("CRIT ERROR").map(MarkerPattern::pattern), Some("CRIT"));
        assert_eq!(set.find("ERRR").map(MarkerPattern::pattern), Some("ERRO?R"));
        assert!(set.find("INFO").is_none());
    }

    #[test]
    fn combined_keeps_order() {
        let global = MarkerSet::new(vec![MarkerPattern::contains("ERROR")]);
        let local = MarkerSet::new(vec![MarkerPattern::contains("CRIT")]);
        let both = global.combined(&local);
        let patterns: Vec<_> = both.iter().map(MarkerPattern::pattern).collect();
        assert_eq!(patterns, vec!["ERROR", "CRIT"]);
        assert_eq!(global.len(), 1);
    }

    #[tokio::test]
    async fn scan_reports_every_hit() {
        let lines = futures::stream::iter(vec![
            line("a", "starting"),
            line("b", "ERROR one"),
            line("a", "fine"),
            line("a", "ERROR two"),
        ]);
        let markers = MarkerSet::new(vec![MarkerPattern::contains("ERROR")]);

        let outcome = scan_for_marker(lines, &markers).await;

        assert_eq!(outcome.lines, 4);
        assert!(!outcome.is_clean());
        assert_eq!(
            outcome.hits,
            vec![
                MarkerHit {
                    source: "b".to_owned(),
                    line: "ERROR one".to_owned(),
                    pattern: "ERROR".to_owned(),
                },
                MarkerHit {
                    source: "a".to_owned(),
                    line: "ERROR two".to_owned(),
                    pattern: "ERROR".to_owned(),
                },
            ]
        );
    }

    #[tokio::test]
    async fn scan_with_no_markers_is_clean() {
        let lines = futures::stream::iter(vec![line("a", "ERROR")]);
        let outcome = scan_for_marker(lines, &MarkerSet::default()).await;
        assert_eq!(outcome.lines, 1);
        assert!(outcome.is_clean());
    }
}
