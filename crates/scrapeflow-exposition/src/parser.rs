//! Text exposition format grouping.
//!
//! Splits a `/metrics` body into families the way a Prometheus server reads
//! it: `# HELP` and `# TYPE` open (or annotate) a family, and each series
//! line joins the family whose name it equals or extends with a suffix
//! allowed for that family's type (`_bucket`, `_sum`, `_count`, `_total`,
//! `_created`). A series that does not fit the family in progress goes back
//! to an earlier family that claims it, even when unrelated families were
//! exposed in between. Any other series opens an implicit untyped family.
//!
//! Lines are not interpreted here; see [`crate::aggregate`].

use std::collections::HashMap;

/// Series suffixes a typed family may claim.
const SUFFIXES: &[&str] = &["_bucket", "_sum", "_count", "_total", "_created"];

/// A body split into families, in first-seen order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Exposition {
    pub families: Vec<ExposedFamily>,
}

/// One family as exposed, with its series still in raw form.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExposedFamily {
    pub name: String,
    /// Keyword of the `# TYPE` line, if any.
    pub type_hint: Option<String>,
    /// A second `# TYPE` line that disagreed with the first.
    pub conflicting_type: Option<String>,
    pub help: Option<String>,
    pub series: Vec<ExposedSeries>,
}

/// One series line: its metric name plus the unparsed remainder
/// (`{labels} value [timestamp]`).
#[derive(Debug, Clone, PartialEq)]
pub struct ExposedSeries {
    /// 1-based line number within the body.
    pub line: usize,
    pub name: String,
    pub rest: String,
}

impl ExposedFamily {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Default::default()
        }
    }

    /// Whether a series named `series` belongs to this family.
    fn accepts(&self, series: &str) -> bool {
        if series == self.name {
            return true;
        }
        let Some(suffix) = series.strip_prefix(self.name.as_str()) else {
            return false;
        };
        let allowed: &[&str] = match self.type_hint.as_deref().map(str::to_ascii_lowercase).as_deref() {
            Some("histogram") => &["_bucket", "_sum", "_count", "_created"],
            Some("summary") => &["_sum", "_count", "_created"],
            Some("counter") => &["_total", "_created"],
            _ => &[],
        };
        allowed.contains(&suffix)
    }
}

impl Exposition {
    /// The family called `name`, if exposed.
    pub fn family(&self, name: &str) -> Option<&ExposedFamily> {
        self.families.iter().find(|f| f.name == name)
    }
}

/// Group an exposition body into families. Never fails; lines that are
/// neither comments nor series are ignored.
pub fn parse(text: &str) -> Exposition {
    let mut families: Vec<ExposedFamily> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();
    let mut current: Option<usize> = None;

    for (i, raw) in text.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() {
            continue;
        }

        if let Some(comment) = line.strip_prefix('#') {
            let mut parts = comment.trim_start().splitn(3, char::is_whitespace);
            let keyword = parts.next().unwrap_or_default();
            if keyword != "HELP" && keyword != "TYPE" {
                continue;
            }
            let Some(name) = parts.next().filter(|n| !n.is_empty()) else {
                continue;
            };
            let value = parts.next().unwrap_or_default().trim();

            let idx = *index.entry(name.to_string()).or_insert_with(|| {
                families.push(ExposedFamily::new(name));
                families.len() - 1
            });
            let family = &mut families[idx];
            if keyword == "HELP" {
                family.help = Some(unescape_help(value));
            } else {
                match &family.type_hint {
                    Some(first) if first != value => {
                        family.conflicting_type.get_or_insert_with(|| value.to_string());
                    }
                    Some(_) => {}
                    None => family.type_hint = Some(value.to_string()),
                }
            }
            current = Some(idx);
            continue;
        }

        let name_end = line
            .find(|c: char| c == '{' || c.is_whitespace())
            .unwrap_or(line.len());
        let name = &line[..name_end];
        if name.is_empty() {
            continue;
        }
        let series = ExposedSeries {
            line: i + 1,
            name: name.to_string(),
            rest: line[name_end..].to_string(),
        };

        let idx = match current {
            Some(idx) if families[idx].accepts(name) => idx,
            _ => {
                let idx = match owner(&families, &index, name) {
                    Some(idx) => idx,
                    None => {
                        families.push(ExposedFamily::new(name));
                        index.insert(name.to_string(), families.len() - 1);
                        families.len() - 1
                    }
                };
                current = Some(idx);
                idx
            }
        };
        families[idx].series.push(series);
    }

    Exposition { families }
}

/// An already exposed family that `series` belongs to: the family of that
/// exact name, else the typed family whose name plus a suffix it allows
/// spells `series`.
fn owner(families: &[ExposedFamily], index: &HashMap<String, usize>, series: &str) -> Option<usize> {
    if let Some(&idx) = index.get(series) {
        return Some(idx);
    }
    SUFFIXES
        .iter()
        .filter_map(|suffix| series.strip_suffix(suffix))
        .filter_map(|base| index.get(base).copied())
        .find(|&idx| families[idx].accepts(series))
}

fn unescape_help(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('\\') => out.push('\\'),
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }
    out
}
