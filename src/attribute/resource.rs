use std::cmp::Ordering;

use crate::error::{BatchError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    Long,
    /// Memory-style sizes, stored in bytes.
    Size,
    /// Durations, stored in seconds.
    Time,
    Str,
}

#[derive(Debug, PartialEq, Eq)]
pub struct ResourceDef {
    pub name: &'static str,
    pub kind: ResourceKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResourceValue {
    Long(i64),
    Size(u64),
    Time(u64),
    Str(String),
}

/// One resource entry inside a resource-list attribute.
#[derive(Debug, Clone, PartialEq)]
pub struct Resource {
    pub def: &'static ResourceDef,
    pub value: ResourceValue,
}

static RESOURCES: &[ResourceDef] = &[
    ResourceDef { name: "arch", kind: ResourceKind::Str },
    ResourceDef { name: "cput", kind: ResourceKind::Time },
    ResourceDef { name: "file", kind: ResourceKind::Size },
    ResourceDef { name: "host", kind: ResourceKind::Str },
    ResourceDef { name: "mem", kind: ResourceKind::Size },
    ResourceDef { name: "ncpus", kind: ResourceKind::Long },
    ResourceDef { name: "nice", kind: ResourceKind::Long },
    ResourceDef { name: "nodect", kind: ResourceKind::Long },
    ResourceDef { name: "nodes", kind: ResourceKind::Str },
    ResourceDef { name: "pmem", kind: ResourceKind::Size },
    ResourceDef { name: "vmem", kind: ResourceKind::Size },
    ResourceDef { name: "walltime", kind: ResourceKind::Time },
];

/// Look up a registered resource by name (case-insensitive).
pub fn find_resource(name: &str) -> Option<&'static ResourceDef> {
    RESOURCES.iter().find(|r| r.name.eq_ignore_ascii_case(name))
}

impl ResourceDef {
    pub fn decode(&self, value: &str) -> Result<Option<ResourceValue>> {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            return Ok(None);
        }
        let bad = || BatchError::invalid_value(format!("Resource_List.{}", self.name), value);
        let decoded = match self.kind {
            ResourceKind::Long => ResourceValue::Long(trimmed.parse().map_err(|_| bad())?),
            ResourceKind::Size => ResourceValue::Size(parse_size(trimmed).ok_or_else(bad)?),
            ResourceKind::Time => ResourceValue::Time(parse_time(trimmed).ok_or_else(bad)?),
            ResourceKind::Str => ResourceValue::Str(trimmed.to_string()),
        };
        Ok(Some(decoded))
    }

    pub fn compare(&self, a: &ResourceValue, b: &ResourceValue) -> Ordering {
        match (a, b) {
            (ResourceValue::Long(a), ResourceValue::Long(b)) => a.cmp(b),
            (ResourceValue::Size(a), ResourceValue::Size(b)) => a.cmp(b),
            (ResourceValue::Time(a), ResourceValue::Time(b)) => a.cmp(b),
            (ResourceValue::Str(a), ResourceValue::Str(b)) => a.cmp(b),
            _ => Ordering::Less,
        }
    }

    pub fn encode(&self, value: &ResourceValue) -> String {
        match value {
            ResourceValue::Long(v) => v.to_string(),
            ResourceValue::Size(v) => format_size(*v),
            ResourceValue::Time(v) => format_time(*v),
            ResourceValue::Str(s) => s.clone(),
        }
    }
}

const SIZE_UNITS: &[(&str, u64)] = &[
    ("tb", 1 << 40),
    ("gb", 1 << 30),
    ("mb", 1 << 20),
    ("kb", 1 << 10),
    ("tw", 8 << 40),
    ("gw", 8 << 30),
    ("mw", 8 << 20),
    ("kw", 8 << 10),
    ("b", 1),
    ("w", 8),
];

/// Parse `<n>[b|w|kb|kw|mb|mw|gb|gw|tb|tw]` into bytes. A bare number is bytes.
pub fn parse_size(s: &str) -> Option<u64> {
    let lower = s.to_ascii_lowercase();
    let digits_end = lower
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(lower.len());
    let (digits, suffix) = lower.split_at(digits_end);
    let n: u64 = digits.parse().ok()?;
    if suffix.is_empty() {
        return Some(n);
    }
    let (_, mult) = SIZE_UNITS.iter().find(|(unit, _)| *unit == suffix)?;
    n.checked_mul(*mult)
}

/// Render bytes with the largest byte unit that divides them exactly.
pub fn format_size(bytes: u64) -> String {
    for (unit, mult) in SIZE_UNITS.iter().filter(|(u, _)| u.ends_with('b')) {
        if bytes != 0 && bytes % mult == 0 {
            return format!("{}{}", bytes / mult, unit);
        }
    }
    format!("{}b", bytes)
}

/// Parse `[[HH:]MM:]SS` into seconds.
pub fn parse_time(s: &str) -> Option<u64> {
    let parts: Vec<&str> = s.split(':').collect();
    if parts.len() > 3 {
        return None;
    }
    parts.iter().try_fold(0u64, |acc, p| {
        let v: u64 = p.parse().ok()?;
        acc.checked_mul(60)?.checked_add(v)
    })
}

pub fn format_time(secs: u64) -> String {
    format!("{:02}:{:02}:{:02}", secs / 3600, (secs % 3600) / 60, secs % 60)
}
