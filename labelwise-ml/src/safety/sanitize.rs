//! Sanitizer collaborator: strips shortcut signals and reports residual leakage.

use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::config::SanitizationConfig;
use crate::error::ConfigError;

static URL_PATTERN: &str = r"https?://\S+";
static SUBREDDIT_PATTERN: &str = r"(?i)/?\br/\w+";

/// What the sanitizer did, embedded in record metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SanitizationRecord {
    pub version: String,
    pub rules_applied: Vec<String>,
    /// SHA-256 of the sanitized text, or `"none"` when sanitization was skipped.
    pub hash: String,
}

/// Sanitizer output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SanitizedText {
    pub text: String,
    pub record: SanitizationRecord,
    /// Shortcut signals still present after sanitization.
    pub leakage_findings: Vec<String>,
}

impl SanitizedText {
    pub fn residual_leakage(&self) -> bool {
        !self.leakage_findings.is_empty()
    }
}

/// Reports what, if anything, was stripped from the input.
pub trait Sanitizer: Send + Sync {
    fn sanitize(&self, raw: &str) -> SanitizedText;
}

/// Regex rules for URLs, subreddit references, and configured leakage terms.
#[derive(Debug, Clone)]
pub struct RegexSanitizer {
    config: SanitizationConfig,
    url: Regex,
    subreddit: Regex,
    leakage_terms: Option<Regex>,
}

impl RegexSanitizer {
    pub fn new(config: &SanitizationConfig) -> Result<Self, ConfigError> {
        let compile = |field: &str, pattern: &str| {
            Regex::new(pattern).map_err(|e| ConfigError::invalid(field, e.to_string()))
        };
        let leakage_terms = if config.leakage_terms.is_empty() {
            None
        } else {
            let mut terms: Vec<&String> = config.leakage_terms.iter().collect();
            // Longest first so multi-word terms win over their prefixes.
            terms.sort_by_key(|t| std::cmp::Reverse(t.len()));
            let alternation = terms
                .iter()
                .map(|t| regex::escape(t))
                .collect::<Vec<_>>()
                .join("|");
            Some(compile(
                "sanitization.leakage_terms",
                &format!(r"(?i)\b(?:{alternation})\b"),
            )?)
        };
        Ok(Self {
            config: config.clone(),
            url: compile("sanitization.url", URL_PATTERN)?,
            subreddit: compile("sanitization.subreddit", SUBREDDIT_PATTERN)?,
            leakage_terms,
        })
    }

    fn findings(&self, text: &str) -> Vec<String> {
        let mut findings = Vec::new();
        if !self.config.strip_urls && self.url.is_match(text) {
            findings.push("url".to_string());
        }
        if !self.config.strip_subreddit_refs && self.subreddit.is_match(text) {
            findings.push("subreddit_ref".to_string());
        }
        if let Some(re) = &self.leakage_terms {
            let mut terms: Vec<String> = re
                .find_iter(text)
                .map(|m| format!("leakage_term:{}", m.as_str().to_lowercase()))
                .collect();
            terms.sort();
            terms.dedup();
            findings.extend(terms);
        }
        findings
    }
}

impl Sanitizer for RegexSanitizer {
    fn sanitize(&self, raw: &str) -> SanitizedText {
        if !self.config.enabled {
            return SanitizedText {
                text: raw.to_string(),
                record: SanitizationRecord {
                    version: "skipped".into(),
                    rules_applied: vec!["skipped".into()],
                    hash: "none".into(),
                },
                leakage_findings: self.findings(raw),
            };
        }

        let mut text = raw.to_string();
        let mut rules_applied = Vec::new();
        if self.config.strip_urls && self.url.is_match(&text) {
            text = self.url.replace_all(&text, "").into_owned();
            rules_applied.push("strip_urls".to_string());
        }
        if self.config.strip_subreddit_refs && self.subreddit.is_match(&text) {
            text = self.subreddit.replace_all(&text, "").into_owned();
            rules_applied.push("strip_subreddit_refs".to_string());
        }
        if self.config.normalize_whitespace {
            text = text.split_whitespace().collect::<Vec<_>>().join(" ");
        }

        let hash = format!("{:x}", Sha256::digest(text.as_bytes()));
        let leakage_findings = self.findings(&text);
        SanitizedText {
            text,
            record: SanitizationRecord {
                version: self.config.version.clone(),
                rules_applied,
                hash,
            },
            leakage_findings,
        }
    }
}
