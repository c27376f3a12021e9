//! The Route Resolver (spec.md §4.D): maps a `(device, kind)` pair to an
//! ordered region-name list by walking rules top to bottom, patterns
//! left to right within a rule, with device-pattern inheritance
//! spanning rule boundaries.
//!
//! Grounded in `__cma_where_from` (`original_source/mm/cma.c`), whose
//! `name_matched` flag is declared once outside the per-rule loop and
//! never reset between rules — the inheritance this crate implements is
//! a direct transcription of that control flow, not a simplification of
//! it: spec.md §4.D's example 5 (`bar/firmware=r3;/*=r2` matching
//! `(bar, "other")` against the *second* rule's inherited pattern) only
//! holds if the carried state crosses rule boundaries exactly like this.
use crate::config::RouteRule;
use crate::error::{CmaError, Result};

/// Matches `text` against a glob pattern supporting `*` (zero or more
/// of any character) and `?` (exactly one of any character), anywhere
/// in the pattern, not just a single trailing `*`.
fn glob_match(pattern: &str, text: &str) -> bool {
    let p: Vec<char> = pattern.chars().collect();
    let t: Vec<char> = text.chars().collect();

    let (mut pi, mut ti) = (0usize, 0usize);
    let (mut star_pi, mut star_ti) = (None::<usize>, 0usize);

    while ti < t.len() {
        if pi < p.len() && (p[pi] == '?' || p[pi] == t[ti]) {
            pi += 1;
            ti += 1;
        } else if pi < p.len() && p[pi] == '*' {
            star_pi = Some(pi);
            star_ti = ti;
            pi += 1;
        } else if let Some(sp) = star_pi {
            pi = sp + 1;
            star_ti += 1;
            ti = star_ti;
        } else {
            return false;
        }
    }

    while pi < p.len() && p[pi] == '*' {
        pi += 1;
    }

    pi == p.len()
}

/// The full ordered set of routing rules.
#[derive(Debug, Default)]
pub struct RoutingTable {
    rules: Vec<RouteRule>,
}

impl RoutingTable {
    pub(crate) fn new(rules: Vec<RouteRule>) -> RoutingTable {
        RoutingTable { rules }
    }

    /// Resolves `(device, kind)` to the region-name list of the first
    /// rule with a matching pattern, trying rules top to bottom and
    /// each rule's patterns left to right. A pattern with no device
    /// part of its own reuses whatever the textually-preceding
    /// pattern's device part matched, even across a rule boundary.
    pub fn resolve(&self, device: &str, kind: &str) -> Result<&[String]> {
        let mut last_device_matched = false;

        for rule in &self.rules {
            for pattern in &rule.patterns {
                let device_matched = match &pattern.device {
                    Some(glob) => {
                        let matched = glob_match(glob, device);
                        last_device_matched = matched;
                        matched
                    }
                    None => last_device_matched,
                };

                if !device_matched {
                    continue;
                }

                let kind_matched = match &pattern.kind {
                    Some(glob) => glob_match(glob, kind),
                    None => kind.is_empty(),
                };

                if kind_matched {
                    return Ok(&rule.regions);
                }
            }
        }

        Err(CmaError::NotFound)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::config::parse_routes;

    fn table(s: &str) -> RoutingTable {
        RoutingTable::new(parse_routes(s).expect("should parse"))
    }

    #[test]
    fn plain_device_pattern_requires_empty_kind() {
        let t = table("foo=r1;*/*=r2");
        assert_eq!(t.resolve("foo", "").unwrap(), &["r1".to_string()]);
        assert_eq!(t.resolve("bar", "").unwrap(), &["r2".to_string()]);
        // foo matches the device but not the (absent) kind part when a
        // nonempty kind is requested, so it falls through to the
        // catch-all rule.
        assert_eq!(t.resolve("foo", "k").unwrap(), &["r2".to_string()]);
    }

    #[test]
    fn inherited_device_pattern_crosses_rule_boundary() {
        let t = table("bar/firmware=r3;/*=r2");
        assert_eq!(t.resolve("bar", "other").unwrap(), &["r2".to_string()]);
        assert!(t.resolve("baz", "other").is_err());
    }

    #[test]
    fn multiple_region_names_preserve_order() {
        let t = table("baz/*=r1,r2;*/*=r2,r1");
        assert_eq!(
            t.resolve("baz", "anything").unwrap(),
            &["r1".to_string(), "r2".to_string()]
        );
        assert_eq!(
            t.resolve("qux", "anything").unwrap(),
            &["r2".to_string(), "r1".to_string()]
        );
    }

    #[test]
    fn no_matching_rule_is_not_found() {
        let t = table("foo=r1");
        assert!(t.resolve("bar", "").is_err());
    }

    #[test]
    fn glob_star_matches_zero_or_more_anywhere() {
        assert!(glob_match("a*c", "abc"));
        assert!(glob_match("a*c", "ac"));
        assert!(glob_match("*", ""));
        assert!(!glob_match("a*c", "abd"));
    }

    #[test]
    fn glob_question_mark_matches_exactly_one() {
        assert!(glob_match("a?c", "abc"));
        assert!(!glob_match("a?c", "ac"));
        assert!(!glob_match("a?c", "abbc"));
    }
}
