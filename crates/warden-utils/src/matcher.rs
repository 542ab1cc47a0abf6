use regex::Regex;
use tracing::warn;
use warden_types::{WardenError, WardenResult};

/// How the patterns in a [`PatternList`] are interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MatchMode {
    /// `*` as a bare pattern matches everything; a leading or trailing `*`
    /// matches any prefix/suffix; anything else is an exact match.
    #[default]
    Glob,
    /// Full regular expressions, anchored by the pattern author.
    Regex,
}

/// An ordered list of tenant patterns with a shared match mode.
///
/// Regex patterns are compiled once at construction; an invalid pattern fails
/// construction rather than silently matching nothing.
#[derive(Debug, Clone)]
pub struct PatternList {
    mode: MatchMode,
    globs: Vec<String>,
    regexes: Vec<Regex>,
}

impl PatternList {
    pub fn new(patterns: &[String], mode: MatchMode) -> WardenResult<Self> {
        let mut regexes = Vec::new();
        if mode == MatchMode::Regex {
            for p in patterns {
                let re = Regex::new(p).map_err(|e| {
                    WardenError::Configuration(format!("invalid tenant pattern {p:?}: {e}"))
                })?;
                regexes.push(re);
            }
        }
        Ok(Self {
            mode,
            globs: patterns.to_vec(),
            regexes,
        })
    }

    pub fn is_empty(&self) -> bool {
        match self.mode {
            MatchMode::Glob => self.globs.is_empty(),
            MatchMode::Regex => self.regexes.is_empty(),
        }
    }

    pub fn matches(&self, candidate: &str) -> bool {
        match self.mode {
            MatchMode::Glob => self.globs.iter().any(|p| glob_match(p, candidate)),
            MatchMode::Regex => self.regexes.iter().any(|re| re.is_match(candidate)),
        }
    }
}

/// Supported glob forms: `*`, `prefix*`, `*suffix`, exact.
///
/// A pattern with interior `*` has no defined meaning here; it falls back to
/// an exact comparison and a warning so the operator notices the typo.
fn glob_match(pattern: &str, candidate: &str) -> bool {
    if pattern == "*" {
        return true;
    }
    match (pattern.strip_prefix('*'), pattern.strip_suffix('*')) {
        (Some(suffix), None) => candidate.ends_with(suffix),
        (None, Some(prefix)) => candidate.starts_with(prefix),
        (Some(_), Some(_)) => {
            let inner = &pattern[1..pattern.len() - 1];
            candidate.contains(inner)
        }
        (None, None) => {
            if pattern.contains('*') {
                warn!(pattern = %pattern, "interior wildcard not supported, using exact match");
            }
            pattern == candidate
        }
    }
}

/// Tenant filter: skip-list first, then include-list.
///
/// A tenant matching the skip-list is always rejected; if the include-list is
/// non-empty the tenant must also match it. A tenant can therefore never be
/// both skipped and included.
#[derive(Debug, Clone)]
pub struct TenantSelector {
    skip: PatternList,
    include: PatternList,
}

impl TenantSelector {
    pub fn new(skip: PatternList, include: PatternList) -> Self {
        Self { skip, include }
    }

    pub fn should_process(&self, tenant: &str) -> bool {
        if self.skip.matches(tenant) {
            return false;
        }
        if !self.include.is_empty() && !self.include.matches(tenant) {
            return false;
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn globs(patterns: &[&str]) -> PatternList {
        let owned: Vec<String> = patterns.iter().map(|s| s.to_string()).collect();
        PatternList::new(&owned, MatchMode::Glob).unwrap()
    }

    #[test]
    fn glob_forms() {
        let list = globs(&["team-*", "*-staging", "exact", "*"]);
        assert!(list.matches("anything")); // bare star
        let list = globs(&["team-*", "*-staging", "exact"]);
        assert!(list.matches("team-a"));
        assert!(list.matches("payments-staging"));
        assert!(list.matches("exact"));
        assert!(!list.matches("exactly"));
        assert!(!list.matches("steam-a"));
    }

    #[test]
    fn regex_mode_swaps_matcher() {
        let patterns = vec!["^t[0-9]+$".to_string()];
        let list = PatternList::new(&patterns, MatchMode::Regex).unwrap();
        assert!(list.matches("t42"));
        assert!(!list.matches("tenant-42"));
    }

    #[test]
    fn invalid_regex_is_a_config_error() {
        let patterns = vec!["([".to_string()];
        assert!(PatternList::new(&patterns, MatchMode::Regex).is_err());
    }

    #[test]
    fn selector_skip_wins_over_include() {
        let selector = TenantSelector::new(globs(&["internal-*"]), globs(&["internal-metrics"]));
        // Matches both lists: the skip-list wins.
        assert!(!selector.should_process("internal-metrics"));
    }

    #[test]
    fn selector_empty_include_admits_all_unskipped() {
        let selector = TenantSelector::new(globs(&["dev-*"]), globs(&[]));
        assert!(selector.should_process("prod-tenant"));
        assert!(!selector.should_process("dev-tenant"));
    }

    #[test]
    fn selector_nonempty_include_restricts() {
        let selector = TenantSelector::new(globs(&[]), globs(&["team-*"]));
        assert!(selector.should_process("team-a"));
        assert!(!selector.should_process("other"));
    }
}
