use crate::config::MatchOptions;
use anyhow::{Context, Result};
use regex::bytes::RegexBuilder;

/// Compiled payload filter applied before a new dialog is admitted.
///
/// The expression is compiled once at store construction; `check` on the
/// ingress path only runs the match.
#[derive(Debug, Default)]
pub struct Matcher {
    regex: Option<regex::bytes::Regex>,
    invert: bool,
}

impl Matcher {
    pub fn new(options: &MatchOptions) -> Result<Self> {
        let regex = match options.expr.as_deref() {
            Some(expr) => Some(
                RegexBuilder::new(expr)
                    .multi_line(true)
                    .case_insensitive(options.ignore_case)
                    .build()
                    .with_context(|| format!("invalid match expression: {}", expr))?,
            ),
            None => None,
        };
        Ok(Self {
            regex,
            invert: options.invert,
        })
    }

    /// True when the payload passes the filter. Everything matches when no
    /// expression is configured, otherwise match success XOR invert.
    pub fn check(&self, payload: &[u8]) -> bool {
        match &self.regex {
            Some(regex) => regex.is_match(payload) != self.invert,
            None => true,
        }
    }
}
