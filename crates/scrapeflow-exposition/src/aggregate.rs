//! Metric aggregation — exposed families into [`MetricFamily`] values.

use scrapeflow_core::{Labels, MetricFamily, MetricKind, Sample};
use tracing::debug;

use crate::error::ExpositionError;
use crate::parser::{ExposedFamily, ExposedSeries, Exposition};

/// Label carrying the series name of histogram/summary/counter sub-series
/// (`foo_bucket`, `foo_sum`, ...) whose name differs from the family name.
pub const SERIES_NAME_LABEL: &str = "__name__";

/// Output of [`aggregate`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Aggregation {
    pub families: Vec<MetricFamily>,
    pub skipped: Vec<SkippedFamily>,
}

/// A family dropped from the result, with the first error found in it.
#[derive(Debug, Clone, PartialEq)]
pub struct SkippedFamily {
    pub name: String,
    pub error: ExpositionError,
}

/// Convert every exposed family, skipping malformed ones.
///
/// Samples without a timestamp get `collected_at_ms`.
pub fn aggregate(exposition: &Exposition, collected_at_ms: i64) -> Aggregation {
    let mut out = Aggregation::default();
    for exposed in &exposition.families {
        match convert_family(exposed, collected_at_ms) {
            Ok(family) => out.families.push(family),
            Err(error) => {
                debug!(family = %exposed.name, %error, "skipping malformed family");
                out.skipped.push(SkippedFamily {
                    name: exposed.name.clone(),
                    error,
                });
            }
        }
    }
    out
}

fn convert_family(
    exposed: &ExposedFamily,
    collected_at_ms: i64,
) -> Result<MetricFamily, ExpositionError> {
    let kind = match &exposed.type_hint {
        Some(keyword) => keyword
            .parse::<MetricKind>()
            .map_err(|_| ExpositionError::UnknownType(keyword.clone()))?,
        None => MetricKind::Untyped,
    };
    if let (Some(first), Some(second)) = (&exposed.type_hint, &exposed.conflicting_type) {
        return Err(ExpositionError::ConflictingType {
            first: first.clone(),
            second: second.clone(),
        });
    }

    let mut family = MetricFamily::new(&exposed.name, kind);
    family.help = exposed.help.clone();

    for series in &exposed.series {
        let mut sample = parse_series(series, collected_at_ms)?;
        if series.name != exposed.name {
            if sample.labels.contains_key(SERIES_NAME_LABEL) {
                return Err(ExpositionError::DuplicateLabel {
                    line: series.line,
                    name: SERIES_NAME_LABEL.to_string(),
                });
            }
            sample
                .labels
                .insert(SERIES_NAME_LABEL.to_string(), series.name.clone());
        }
        if kind == MetricKind::Histogram
            && series.name.ends_with("_bucket")
            && !sample.labels.contains_key("le")
        {
            return Err(ExpositionError::MissingBucketBound { line: series.line });
        }
        family.samples.push(sample);
    }

    Ok(family)
}

/// Parse `{labels} value [timestamp]`.
fn parse_series(series: &ExposedSeries, collected_at_ms: i64) -> Result<Sample, ExpositionError> {
    let line = series.line;
    let rest = series.rest.trim_start();

    let (labels, rest) = if let Some(body) = rest.strip_prefix('{') {
        parse_labels(body, line)?
    } else {
        (Labels::new(), rest)
    };

    let mut fields = rest.split_whitespace();
    let raw_value = fields.next().ok_or(ExpositionError::MissingValue { line })?;
    let value = parse_value(raw_value).ok_or_else(|| ExpositionError::InvalidValue {
        line,
        value: raw_value.to_string(),
    })?;

    let timestamp_ms = match fields.next() {
        Some(raw) => raw
            .parse::<i64>()
            .map_err(|_| ExpositionError::InvalidTimestamp {
                line,
                value: raw.to_string(),
            })?,
        None => collected_at_ms,
    };
    if let Some(extra) = fields.next() {
        return Err(ExpositionError::InvalidTimestamp {
            line,
            value: extra.to_string(),
        });
    }

    Ok(Sample {
        labels,
        value,
        timestamp_ms: Some(timestamp_ms),
    })
}

/// Parse the inside of a label set; `body` starts right after `{`.
/// Returns the labels and the text following the closing `}`.
fn parse_labels(body: &str, line: usize) -> Result<(Labels, &str), ExpositionError> {
    let invalid = |reason: &str| ExpositionError::InvalidLabels {
        line,
        reason: reason.to_string(),
    };

    let mut labels = Labels::new();
    let mut rest = body;

    loop {
        rest = rest.trim_start();
        if let Some(after) = rest.strip_prefix('}') {
            return Ok((labels, after));
        }

        let eq = rest.find('=').ok_or_else(|| invalid("expected '='"))?;
        let name = rest[..eq].trim();
        if name.is_empty()
            || name.starts_with(|c: char| c.is_ascii_digit())
            || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
        {
            return Err(invalid("invalid label name"));
        }

        rest = rest[eq + 1..].trim_start();
        rest = rest
            .strip_prefix('"')
            .ok_or_else(|| invalid("label value must be quoted"))?;

        let mut value = String::new();
        let mut chars = rest.char_indices();
        let end = loop {
            match chars.next() {
                Some((i, '"')) => break i,
                Some((_, '\\')) => match chars.next() {
                    Some((_, 'n')) => value.push('\n'),
                    Some((_, '\\')) => value.push('\\'),
                    Some((_, '"')) => value.push('"'),
                    Some((_, other)) => {
                        value.push('\\');
                        value.push(other);
                    }
                    None => return Err(invalid("unterminated label value")),
                },
                Some((_, c)) => value.push(c),
                None => return Err(invalid("unterminated label value")),
            }
        };

        if labels.insert(name.to_string(), value).is_some() {
            return Err(ExpositionError::DuplicateLabel {
                line,
                name: name.to_string(),
            });
        }

        rest = rest[end + 1..].trim_start();
        if let Some(after) = rest.strip_prefix(',') {
            rest = after;
        } else if !rest.starts_with('}') {
            return Err(invalid("expected ',' or '}'"));
        }
    }
}

fn parse_value(raw: &str) -> Option<f64> {
    match raw {
        "+Inf" | "Inf" => Some(f64::INFINITY),
        "-Inf" => Some(f64::NEG_INFINITY),
        "NaN" => Some(f64::NAN),
        _ => raw.parse::<f64>().ok().filter(|v| v.is_finite()),
    }
}
