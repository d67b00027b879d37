//! Span builder: merges top-scoring tokens into bounded character spans.

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::config::EvidenceConfig;
use crate::error::SpanBoundsError;
use crate::interpretability::attribution::TokenAttribution;

/// Which attribution scores count as importance.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenSelection {
    /// Rank by magnitude; strongly negative tokens are evidence too.
    #[default]
    Absolute,
    /// Only tokens pushing the label up.
    Positive,
}

impl TokenSelection {
    fn key(self, score: f64) -> Option<f64> {
        match self {
            Self::Absolute if score != 0.0 => Some(score.abs()),
            Self::Positive if score > 0.0 => Some(score),
            _ => None,
        }
    }
}

/// A half-open character range supporting one label.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvidenceSpan {
    pub start: usize,
    pub end: usize,
    pub token_indices: Vec<usize>,
    /// Sum of the member tokens' signed scores.
    pub score: f64,
    pub label: usize,
}

impl EvidenceSpan {
    pub fn len(&self) -> usize {
        self.end.saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn overlaps(&self, other: &EvidenceSpan) -> bool {
        self.start < other.end && other.start < self.end
    }
}

/// Check `[start, end)` against a text of `text_len` chars.
pub fn check_bounds(start: usize, end: usize, text_len: usize) -> Result<(), SpanBoundsError> {
    if start < end && end <= text_len {
        Ok(())
    } else {
        Err(SpanBoundsError {
            start,
            end,
            text_len,
        })
    }
}

/// Clamp a span into the text, or `None` if nothing of it remains.
pub fn clamp_span(mut span: EvidenceSpan, text_len: usize) -> Option<EvidenceSpan> {
    if let Err(e) = check_bounds(span.start, span.end, text_len) {
        span.end = span.end.min(text_len);
        if span.start >= span.end {
            warn!(label = span.label, error = %e, "dropped out-of-bounds span");
            return None;
        }
        warn!(label = span.label, error = %e, end = span.end, "clamped span end");
    }
    Some(span)
}

/// Display snippet for `[start, end)`: line breaks flattened, trimmed, and
/// truncated to `max_chars` with a `...` suffix.
pub fn snippet(text: &str, start: usize, end: usize, max_chars: usize) -> String {
    let raw: String = text
        .chars()
        .skip(start)
        .take(end.saturating_sub(start))
        .map(|c| if c == '\n' || c == '\r' { ' ' } else { c })
        .collect();
    truncate_snippet(raw.trim(), max_chars)
}

/// Truncate to `max_chars` chars, marking the cut with `...`.
pub fn truncate_snippet(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        return s.to_string();
    }
    let keep = max_chars.saturating_sub(3);
    let mut out: String = s.chars().take(keep).collect();
    out.push_str("...");
    out
}

/// Configured span extraction.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpanBuilder {
    pub top_k: usize,
    pub max_spans: usize,
    pub gap_tolerance: usize,
    pub selection: TokenSelection,
}

impl Default for SpanBuilder {
    fn default() -> Self {
        Self::from_config(&EvidenceConfig::default())
    }
}

struct Draft {
    span: EvidenceSpan,
    weight: f64,
}

impl SpanBuilder {
    pub fn from_config(config: &EvidenceConfig) -> Self {
        Self {
            top_k: config.top_k,
            max_spans: config.max_spans,
            gap_tolerance: config.gap_tolerance,
            selection: config.selection,
        }
    }

    /// Build at most `max_spans` non-overlapping spans for one label, strongest first.
    ///
    /// Ties on aggregate weight go to the earlier span.
    pub fn build(&self, attributions: &[TokenAttribution], text_len: usize) -> Vec<EvidenceSpan> {
        let mut candidates: Vec<(&TokenAttribution, f64)> = attributions
            .iter()
            .filter(|a| !a.special && a.start < a.end)
            .filter_map(|a| self.selection.key(a.score).map(|k| (a, k)))
            .collect();
        candidates.sort_by(|(a, ka), (b, kb)| {
            kb.total_cmp(ka).then(a.token_index.cmp(&b.token_index))
        });
        candidates.truncate(self.top_k);
        candidates.sort_by_key(|(a, _)| (a.start, a.token_index));

        let mut drafts: Vec<Draft> = Vec::new();
        for (attr, key) in candidates {
            match drafts.last_mut() {
                Some(d) if attr.start <= d.span.end + self.gap_tolerance => {
                    d.span.end = d.span.end.max(attr.end);
                    d.span.score += attr.score;
                    d.span.token_indices.push(attr.token_index);
                    d.weight += key;
                }
                _ => drafts.push(Draft {
                    span: EvidenceSpan {
                        start: attr.start,
                        end: attr.end,
                        token_indices: vec![attr.token_index],
                        score: attr.score,
                        label: attr.label,
                    },
                    weight: key,
                }),
            }
        }

        drafts.sort_by(|a, b| {
            b.weight
                .total_cmp(&a.weight)
                .then(a.span.start.cmp(&b.span.start))
        });
        drafts
            .into_iter()
            .filter_map(|d| clamp_span(d.span, text_len))
            .take(self.max_spans)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attr(token_index: usize, start: usize, end: usize, score: f64) -> TokenAttribution {
        TokenAttribution {
            token_index,
            start,
            end,
            score,
            label: 0,
            special: false,
        }
    }

    fn builder() -> SpanBuilder {
        SpanBuilder::default()
    }

    #[test]
    fn test_adjacent_tokens_merge_across_single_space() {
        // "hello world again"
        let attrs = vec![
            attr(1, 0, 5, 0.5),
            attr(2, 6, 11, 0.4),
            attr(3, 12, 17, 0.0),
        ];
        let spans = builder().build(&attrs, 17);
        assert_eq!(spans.len(), 1);
        assert_eq!((spans[0].start, spans[0].end), (0, 11));
        assert_eq!(spans[0].token_indices, vec![1, 2]);
        assert!((spans[0].score - 0.9).abs() < 1e-12);
    }

    #[test]
    fn test_wide_gap_splits_spans() {
        let attrs = vec![attr(1, 0, 3, 0.5), attr(2, 10, 14, 0.6)];
        let spans = builder().build(&attrs, 14);
        assert_eq!(spans.len(), 2);
        assert_eq!(spans[0].start, 10);
        assert!(!spans[0].overlaps(&spans[1]));
    }

    #[test]
    fn test_max_spans_keeps_strongest() {
        let attrs: Vec<_> = (0..6)
            .map(|i| attr(i + 1, i * 10, i * 10 + 4, (i + 1) as f64))
            .collect();
        let spans = builder().build(&attrs, 60);
        assert_eq!(spans.len(), 3);
        let starts: Vec<_> = spans.iter().map(|s| s.start).collect();
        assert_eq!(starts, vec![50, 40, 30]);
    }

    #[test]
    fn test_equal_scores_prefer_earlier_span() {
        let attrs = vec![
            attr(1, 20, 24, 1.0),
            attr(2, 0, 4, 1.0),
            attr(3, 10, 14, 1.0),
            attr(4, 30, 34, 1.0),
        ];
        let spans = builder().build(&attrs, 40);
        let starts: Vec<_> = spans.iter().map(|s| s.start).collect();
        assert_eq!(starts, vec![0, 10, 20]);
    }

    #[test]
    fn test_absolute_selection_keeps_negative_evidence() {
        let attrs = vec![attr(1, 0, 4, -2.0), attr(2, 10, 14, 0.5)];
        let spans = builder().build(&attrs, 14);
        assert_eq!(spans[0].start, 0);
        assert_eq!(spans[0].score, -2.0);

        let positive = SpanBuilder {
            selection: TokenSelection::Positive,
            ..builder()
        };
        let spans = positive.build(&attrs, 14);
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].start, 10);
    }

    #[test]
    fn test_specials_and_zero_scores_never_selected() {
        let mut cls = attr(0, 0, 0, 9.0);
        cls.special = true;
        let attrs = vec![cls, attr(1, 0, 4, 0.0)];
        assert!(builder().build(&attrs, 4).is_empty());
    }

    #[test]
    fn test_top_k_limits_tokens() {
        let attrs: Vec<_> = (0..5)
            .map(|i| attr(i + 1, i * 10, i * 10 + 2, 1.0 + i as f64))
            .collect();
        let b = SpanBuilder {
            top_k: 2,
            ..builder()
        };
        let spans = b.build(&attrs, 50);
        assert_eq!(spans.len(), 2);
        assert!(spans.iter().all(|s| s.start >= 30));
    }

    #[test]
    fn test_out_of_bounds_spans_are_clamped_or_dropped() {
        let attrs = vec![attr(1, 2, 9, 1.0), attr(2, 20, 25, 2.0)];
        let spans = builder().build(&attrs, 6);
        assert_eq!(spans.len(), 1);
        assert_eq!((spans[0].start, spans[0].end), (2, 6));
    }

    #[test]
    fn test_check_bounds() {
        assert!(check_bounds(0, 5, 5).is_ok());
        assert!(check_bounds(3, 3, 5).is_err());
        assert_eq!(
            check_bounds(2, 8, 5).unwrap_err(),
            SpanBoundsError {
                start: 2,
                end: 8,
                text_len: 5
            }
        );
    }

    #[test]
    fn test_snippet_flattens_and_truncates() {
        assert_eq!(snippet("a\nb c", 0, 3, 200), "a b");
        assert_eq!(snippet("  héllo  ", 0, 9, 200), "héllo");
        let long = "x".repeat(250);
        let s = snippet(&long, 0, 250, 200);
        assert_eq!(s.chars().count(), 200);
        assert!(s.ends_with("..."));
    }
}
