//! Parses the two textual grammars that make up the stable external
//! configuration interface: the region list and the routing table.
//!
//! Grounded in `cma_param_parse_entry`/`cma_param_parse`/
//! `cma_map_param_parse` in `original_source/mm/cma.c`, reworked from
//! in-place C-string surgery into ordinary `&str` slicing.
use crate::error::{CmaError, Result};

/// All region and route parameters round up to this granularity. The
/// original kernel code asks the platform for `PAGE_SIZE`; a userspace
/// embedder has no single notion of "the" page size, so this crate
/// fixes it at the common value and documents the assumption (see
/// DESIGN.md).
pub const PAGE_SIZE: u64 = 4096;

/// Fixed small bounds, mirroring `CMA_MAX_REGIONS`/`CMA_MAX_MAPPINGS` in
/// the original source.
pub const MAX_REGIONS: usize = 16;
pub const MAX_ROUTE_RULES: usize = 64;

#[inline]
pub(crate) const fn round_up(value: u64, granularity: u64) -> u64 {
    if granularity == 0 {
        value
    } else {
        let rem = value % granularity;
        if rem == 0 {
            value
        } else {
            value + (granularity - rem)
        }
    }
}

/// One parsed `region` entry (spec §4.A). Rounding (alignment up to
/// `PAGE_SIZE`, start up to the resolved alignment, size up to
/// `PAGE_SIZE`) has already been applied by the time this is returned
/// from `parse_regions`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegionConfig {
    pub name: String,
    pub start: u64,
    pub size: u64,
    pub alignment: u64,
    pub strategy_name: Option<String>,
    pub strategy_params: Option<String>,
}

/// One parsed `pattern` within a route rule (spec §4.A/§4.D).
///
/// `device: None` marks a pattern that begins with `/`: its device part
/// is not its own, it inherits the match outcome of whatever pattern
/// textually precedes it (possibly in an earlier rule — see
/// `route::resolve`). `kind: None` marks a pattern with no `/kind-glob`
/// suffix at all, which only matches an empty kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pattern {
    pub device: Option<String>,
    pub kind: Option<String>,
}

/// One parsed `rule` (spec §4.A/§3): an ordered pattern list guarding an
/// ordered, non-empty region-name list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteRule {
    pub patterns: Vec<Pattern>,
    pub regions: Vec<String>,
}

/// Parses a decimal or `0x`-prefixed hex number with an optional
/// case-insensitive `K`/`M`/`G` (power-of-1024) suffix, returning the
/// parsed value and the unconsumed remainder of `s`.
fn parse_amount(s: &str) -> std::result::Result<(u64, &str), &'static str> {
    let (radix, digits_start): (u32, usize) = if s.len() >= 2 && s.as_bytes()[0] == b'0'
        && (s.as_bytes()[1] == b'x' || s.as_bytes()[1] == b'X')
    {
        (16, 2)
    } else {
        (10, 0)
    };

    let digits_end = s[digits_start..]
        .find(|c: char| !c.is_digit(radix))
        .map(|i| digits_start + i)
        .unwrap_or(s.len());

    if digits_end == digits_start {
        return Err("expected a number");
    }

    let value =
        u64::from_str_radix(&s[digits_start..digits_end], radix).map_err(|_| "number overflow")?;

    let rest = &s[digits_end..];
    let (multiplier, rest) = match rest.as_bytes().first() {
        Some(b'K') | Some(b'k') => (1024u64, &rest[1..]),
        Some(b'M') | Some(b'm') => (1024u64 * 1024, &rest[1..]),
        Some(b'G') | Some(b'g') => (1024u64 * 1024 * 1024, &rest[1..]),
        _ => (1u64, rest),
    };

    let value = value.checked_mul(multiplier).ok_or("number overflow")?;
    Ok((value, rest))
}

/// Parses one `region := name '=' size ['@' start] ['/' alignment]
/// [':' [strategy] ['(' params ')']]` entry.
fn parse_region_entry(entry: &str) -> std::result::Result<RegionConfig, &'static str> {
    let eq = entry.find('=').ok_or("region: expected '='")?;
    let name = &entry[..eq];
    if name.is_empty() {
        return Err("region: empty name");
    }

    let mut rest = &entry[eq + 1..];

    let (mut size, r) = parse_amount(rest).map_err(|_| "region: invalid size")?;
    rest = r;
    // spec.md §4.A rejects only "size zero or greater than the platform's
    // `unsigned long`" (`size > ULONG_MAX` in `original_source/mm/cma.c`);
    // the one bit of headroom below `u64::MAX` is kept so the later
    // `round_up(size, PAGE_SIZE)` below can never silently wrap.
    if size == 0 || size > u64::MAX - PAGE_SIZE {
        return Err("region: size must be nonzero and not overflow");
    }

    let mut start = 0u64;
    if let Some(r) = rest.strip_prefix('@') {
        let (v, r) = parse_amount(r).map_err(|_| "region: invalid start")?;
        start = v;
        rest = r;
    }

    let mut alignment = 0u64;
    if let Some(r) = rest.strip_prefix('/') {
        let (v, r) = parse_amount(r).map_err(|_| "region: invalid alignment")?;
        if v != 0 && (v & (v - 1)) != 0 {
            return Err("region: alignment must be zero or a power of two");
        }
        alignment = v;
        rest = r;
    }

    let mut strategy_name = None;
    let mut strategy_params = None;
    if let Some(r) = rest.strip_prefix(':') {
        let name_end = r.find('(').unwrap_or(r.len());
        let (name_part, r) = r.split_at(name_end);
        if !name_part.is_empty() {
            strategy_name = Some(name_part.to_string());
        }
        rest = r;

        if let Some(r) = rest.strip_prefix('(') {
            let close = r.find(')').ok_or("region: expected ')'")?;
            strategy_params = Some(r[..close].to_string());
            rest = &r[close + 1..];
        }
    }

    if !rest.is_empty() {
        return Err("region: trailing characters after entry");
    }

    alignment = if alignment == 0 {
        PAGE_SIZE
    } else {
        round_up(alignment, PAGE_SIZE)
    };
    start = round_up(start, alignment);
    size = round_up(size, PAGE_SIZE);

    Ok(RegionConfig {
        name: name.to_string(),
        start,
        size,
        alignment,
        strategy_name,
        strategy_params,
    })
}

/// Splits `s` on `;`, tolerating (and dropping) a single trailing
/// separator, same as `cma=...;` on the original kernel command line.
fn split_entries(s: &str) -> Vec<&str> {
    if s.is_empty() {
        return Vec::new();
    }

    let mut parts: Vec<&str> = s.split(';').collect();
    if parts.last() == Some(&"") {
        parts.pop();
    }
    parts
}

/// Parses the full region-list grammar (spec §4.A, §6's "region string").
///
/// No partial result is ever returned: any entry failing to parse, a
/// duplicate region name, or exceeding `MAX_REGIONS` rejects the whole
/// string.
pub fn parse_regions(s: &str) -> Result<Vec<RegionConfig>> {
    let mut regions = Vec::new();

    for entry in split_entries(s) {
        if entry.is_empty() {
            return Err(CmaError::Config("empty region entry".into()));
        }
        if regions.len() >= MAX_REGIONS {
            return Err(CmaError::NoSpace("too many regions"));
        }

        let region = parse_region_entry(entry).map_err(|e| CmaError::Config(e.to_string()))?;
        if regions.iter().any(|r: &RegionConfig| r.name == region.name) {
            return Err(CmaError::Config(format!(
                "duplicate region name '{}'",
                region.name
            )));
        }
        regions.push(region);
    }

    Ok(regions)
}

/// Parses one `pattern := device-glob ['/' kind-glob] | '/' kind-glob`.
fn parse_pattern(p: &str) -> std::result::Result<Pattern, &'static str> {
    if let Some(kind) = p.strip_prefix('/') {
        return Ok(Pattern {
            device: None,
            kind: Some(kind.to_string()),
        });
    }

    if p.is_empty() {
        return Err("route: empty pattern");
    }

    match p.find('/') {
        Some(idx) => Ok(Pattern {
            device: Some(p[..idx].to_string()),
            kind: Some(p[idx + 1..].to_string()),
        }),
        None => Ok(Pattern {
            device: Some(p.to_string()),
            kind: None,
        }),
    }
}

/// Parses one `rule := patterns '=' region-names`.
fn parse_rule(rule: &str) -> std::result::Result<RouteRule, &'static str> {
    let eq = rule.find('=').ok_or("route: expected '='")?;
    let (patterns_str, regions_str) = (&rule[..eq], &rule[eq + 1..]);

    if patterns_str.is_empty() {
        return Err("route: empty pattern list");
    }
    if regions_str.is_empty() {
        return Err("route: empty region-name list");
    }

    let patterns = patterns_str
        .split(',')
        .map(parse_pattern)
        .collect::<std::result::Result<Vec<_>, _>>()?;
    let regions = regions_str.split(',').map(|s| s.to_string()).collect();

    Ok(RouteRule { patterns, regions })
}

/// Parses the full routing grammar (spec §4.A, §6's "route string").
pub fn parse_routes(s: &str) -> Result<Vec<RouteRule>> {
    let mut rules = Vec::new();

    for entry in split_entries(s) {
        if entry.is_empty() {
            return Err(CmaError::Config("empty route rule".into()));
        }
        if rules.len() >= MAX_ROUTE_RULES {
            return Err(CmaError::NoSpace("too many route rules"));
        }

        rules.push(parse_rule(entry).map_err(|e| CmaError::Config(e.to_string()))?);
    }

    Ok(rules)
}
