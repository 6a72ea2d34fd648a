//! Per-session include/exclude rules: a mask plus a compiled regex, matched
//! against the absolute path of each delivered event.

use regex::Regex;

use crate::error::{GalaxyError, Result};
use crate::mask::EventMask;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleKind {
    Include,
    Exclude,
}

/// A single `(kind, mask, compiled regex)` triple. Rules are matched against
/// the absolute path formed by joining a watch's directory with the event's
/// child name.
#[derive(Debug, Clone)]
pub struct Rule {
    pub kind: RuleKind,
    pub mask: EventMask,
    pub regex: Regex,
}

impl Rule {
    pub fn new(kind: RuleKind, mask: EventMask, pattern: &str) -> Result<Self> {
        let regex = Regex::new(pattern).map_err(|source| GalaxyError::RegexCompileFailed {
            regex: pattern.to_string(),
            source,
        })?;
        Ok(Self { kind, mask, regex })
    }

    /// A rule with mask 0 never matches, regardless of the regex.
    pub fn matches(&self, event_mask: EventMask, path: &str) -> bool {
        if self.mask.is_empty() {
            return false;
        }
        self.mask.intersects(event_mask) && self.regex.is_match(path)
    }
}
