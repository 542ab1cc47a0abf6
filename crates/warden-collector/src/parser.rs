//! Parser for the textual metrics exposition format.
//!
//! Only what the collector needs: metric name, labels, value. Comment and
//! type lines are skipped, malformed lines are counted and skipped so one
//! bad family never sinks a source, and NaN samples are dropped.

use std::collections::BTreeMap;

/// One parsed exposition line.
#[derive(Debug, Clone, PartialEq)]
pub struct RawSample {
    pub metric_name: String,
    pub labels: BTreeMap<String, String>,
    pub value: f64,
    /// Exposition timestamp in milliseconds, when present.
    pub timestamp_ms: Option<i64>,
}

/// Outcome of parsing one payload.
#[derive(Debug, Default)]
pub struct ParseOutcome {
    pub samples: Vec<RawSample>,
    pub malformed_lines: usize,
}

/// Parse a full exposition payload.
pub fn parse_exposition(body: &str) -> ParseOutcome {
    let mut outcome = ParseOutcome::default();
    for line in body.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        match parse_line(line) {
            Some(sample) if sample.value.is_nan() => {}
            Some(sample) => outcome.samples.push(sample),
            None => outcome.malformed_lines += 1,
        }
    }
    outcome
}

fn parse_line(line: &str) -> Option<RawSample> {
    let (name_part, rest) = match line.find('{') {
        Some(brace) => {
            let close = line.rfind('}')?;
            if close < brace {
                return None;
            }
            (&line[..brace], Some((&line[brace + 1..close], &line[close + 1..])))
        }
        None => {
            let space = line.find(|c: char| c.is_ascii_whitespace())?;
            (&line[..space], None)
        }
    };

    let metric_name = name_part.trim();
    if metric_name.is_empty() || !is_valid_metric_name(metric_name) {
        return None;
    }

    let (labels, value_part) = match rest {
        Some((label_body, tail)) => (parse_labels(label_body)?, tail.trim()),
        None => {
            let space = line.find(|c: char| c.is_ascii_whitespace())?;
            (BTreeMap::new(), line[space..].trim())
        }
    };

    let mut fields = value_part.split_ascii_whitespace();
    let value: f64 = fields.next()?.parse().ok()?;
    let timestamp_ms = fields.next().and_then(|t| t.parse().ok());

    Some(RawSample {
        metric_name: metric_name.to_string(),
        labels,
        value,
        timestamp_ms,
    })
}

fn is_valid_metric_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' || c == ':' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == ':')
}

/// Parse `key="value",key="value"` with exposition escapes in values.
fn parse_labels(body: &str) -> Option<BTreeMap<String, String>> {
    let mut labels = BTreeMap::new();
    let mut chars = body.chars().peekable();

    loop {
        while matches!(chars.peek(), Some(c) if c.is_ascii_whitespace() || *c == ',') {
            chars.next();
        }
        if chars.peek().is_none() {
            break;
        }

        let mut key = String::new();
        for c in chars.by_ref() {
            if c == '=' {
                break;
            }
            key.push(c);
        }
        let key = key.trim().to_string();
        if key.is_empty() {
            return None;
        }

        if chars.next() != Some('"') {
            return None;
        }
        let mut value = String::new();
        let mut closed = false;
        while let Some(c) = chars.next() {
            match c {
                '\\' => match chars.next() {
                    Some('\\') => value.push('\\'),
                    Some('"') => value.push('"'),
                    Some('n') => value.push('\n'),
                    _ => return None,
                },
                '"' => {
                    closed = true;
                    break;
                }
                other => value.push(other),
            }
        }
        if !closed {
            return None;
        }
        labels.insert(key, value);
    }

    Some(labels)
}
