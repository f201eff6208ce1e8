//! Parser for the line-oriented text exposition format.
//!
//! A sample line is tokenized into `(name, labels, value, timestamp)`
//! before anything is interpreted:
//!
//! ```text
//! line      = name [ ws ] [ "{" [ label { "," label } [ "," ] ] "}" ] ws value [ ws timestamp ]
//! name      = [a-zA-Z_:] [a-zA-Z0-9_:]*
//! label     = [ ws ] key [ ws ] "=" [ ws ] '"' escaped-text '"' [ ws ]
//! key       = [a-zA-Z_] [a-zA-Z0-9_]*
//! value     = [+-]? digits? "."? digits ( [eE] [+-]? digits )?  |  [+-]? "Inf"  |  "NaN"
//! timestamp = "-"? digits
//! ```
//!
//! Lines that do not match are skipped. `# TYPE` comments classify the
//! series that follow them; every other comment is ignored.

use metricsd_common::types::{is_name_char, is_name_start};
use metricsd_common::{Labels, Metric, MetricKind};
use std::collections::HashMap;

/// One tokenized sample line.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub name: String,
    pub labels: Vec<(String, String)>,
    pub value: f64,
    pub timestamp: Option<i64>,
}

/// Parses a full exposition body into metrics labeled with
/// `endpoint=<endpoint>`.
///
/// Classification: a `# TYPE` directive of `counter` makes the series a
/// counter and any other declared type a gauge. Without a directive, names
/// ending in `_total` or `_count` are treated as counters.
pub fn parse_exposition(endpoint: &str, body: &str) -> Vec<Metric> {
    let mut declared: HashMap<String, String> = HashMap::new();
    let mut metrics = Vec::new();

    for line in body.lines().map(str::trim) {
        if line.is_empty() {
            continue;
        }
        if let Some(rest) = line.strip_prefix('#') {
            let mut parts = rest.split_whitespace();
            if parts.next() == Some("TYPE") {
                if let (Some(name), Some(kind)) = (parts.next(), parts.next()) {
                    declared.insert(name.to_string(), kind.to_string());
                }
            }
            continue;
        }

        let Some(sample) = parse_sample(line) else {
            tracing::trace!(line, "Skipping unparseable exposition line");
            continue;
        };

        let kind = match declared.get(&sample.name) {
            Some(declared) if declared == "counter" => MetricKind::Counter,
            Some(_) => MetricKind::Gauge,
            None if sample.name.ends_with("_total") || sample.name.ends_with("_count") => {
                MetricKind::Counter
            }
            None => MetricKind::Gauge,
        };

        let mut labels: Labels = sample.labels.into_iter().collect();
        labels.insert("endpoint".to_string(), endpoint.to_string());

        metrics.push(Metric {
            name: sample.name,
            value: sample.value,
            kind,
            labels,
        });
    }

    metrics
}

/// Tokenizes a single sample line. Returns `None` if the line does not
/// follow the grammar.
pub fn parse_sample(line: &str) -> Option<Sample> {
    let mut cursor = Cursor::new(line.trim());

    let name = cursor.take_name()?;
    let gap = cursor.skip_ws();

    let mut labels = Vec::new();
    let separated = if cursor.eat('{') {
        labels = cursor.take_labels()?;
        cursor.skip_ws() > 0
    } else {
        gap > 0
    };
    if !separated {
        return None;
    }
    let value = parse_value(cursor.take_token())?;

    let timestamp = if cursor.skip_ws() > 0 && !cursor.at_end() {
        Some(parse_timestamp(cursor.take_token())?)
    } else {
        None
    };
    cursor.skip_ws();
    if !cursor.at_end() {
        return None;
    }

    Some(Sample {
        name: name.to_string(),
        labels,
        value,
        timestamp,
    })
}

fn parse_value(token: &str) -> Option<f64> {
    match token {
        "NaN" => return Some(f64::NAN),
        "Inf" | "+Inf" => return Some(f64::INFINITY),
        "-Inf" => return Some(f64::NEG_INFINITY),
        _ => {}
    }

    let bytes = token.as_bytes();
    let mut i = 0;
    if matches!(bytes.first(), Some(b'+' | b'-')) {
        i += 1;
    }
    let int_start = i;
    while i < bytes.len() && bytes[i].is_ascii_digit() {
        i += 1;
    }
    let int_digits = i - int_start;
    let mut frac_digits = 0;
    if i < bytes.len() && bytes[i] == b'.' {
        i += 1;
        let frac_start = i;
        while i < bytes.len() && bytes[i].is_ascii_digit() {
            i += 1;
        }
        frac_digits = i - frac_start;
        if frac_digits == 0 {
            return None;
        }
    }
    if int_digits + frac_digits == 0 {
        return None;
    }
    if i < bytes.len() && matches!(bytes[i], b'e' | b'E') {
        i += 1;
        if i < bytes.len() && matches!(bytes[i], b'+' | b'-') {
            i += 1;
        }
        let exp_start = i;
        while i < bytes.len() && bytes[i].is_ascii_digit() {
            i += 1;
        }
        if i == exp_start {
            return None;
        }
    }
    if i != bytes.len() {
        return None;
    }
    token.parse().ok()
}

fn parse_timestamp(token: &str) -> Option<i64> {
    let digits = token.strip_prefix('-').unwrap_or(token);
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    token.parse().ok()
}

struct Cursor<'a> {
    src: &'a str,
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(src: &'a str) -> Self {
        Self { src, pos: 0 }
    }

    fn rest(&self) -> &'a str {
        &self.src[self.pos..]
    }

    fn peek(&self) -> Option<char> {
        self.rest().chars().next()
    }

    fn at_end(&self) -> bool {
        self.pos >= self.src.len()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += c.len_utf8();
        Some(c)
    }

    fn eat(&mut self, expected: char) -> bool {
        if self.peek() == Some(expected) {
            self.pos += expected.len_utf8();
            true
        } else {
            false
        }
    }

    /// Skips spaces and tabs, returning how many were skipped.
    fn skip_ws(&mut self) -> usize {
        let start = self.pos;
        while matches!(self.peek(), Some(' ' | '\t')) {
            self.pos += 1;
        }
        self.pos - start
    }

    /// Everything up to the next whitespace.
    fn take_token(&mut self) -> &'a str {
        let rest = self.rest();
        let len = rest.find([' ', '\t']).unwrap_or(rest.len());
        self.pos += len;
        &rest[..len]
    }

    fn take_name(&mut self) -> Option<&'a str> {
        let rest = self.rest();
        let mut chars = rest.char_indices();
        match chars.next() {
            Some((_, c)) if is_name_start(c) => {}
            _ => return None,
        }
        let len = chars
            .find(|(_, c)| !is_name_char(*c))
            .map_or(rest.len(), |(i, _)| i);
        self.pos += len;
        Some(&rest[..len])
    }

    fn take_label_key(&mut self) -> Option<&'a str> {
        let rest = self.rest();
        let mut chars = rest.char_indices();
        match chars.next() {
            Some((_, c)) if c.is_ascii_alphabetic() || c == '_' => {}
            _ => return None,
        }
        let len = chars
            .find(|(_, c)| !(c.is_ascii_alphanumeric() || *c == '_'))
            .map_or(rest.len(), |(i, _)| i);
        self.pos += len;
        Some(&rest[..len])
    }

    /// Parses `key="value",...}` after the opening brace.
    fn take_labels(&mut self) -> Option<Vec<(String, String)>> {
        let mut labels = Vec::new();
        loop {
            self.skip_ws();
            if self.eat('}') {
                return Some(labels);
            }
            let key = self.take_label_key()?.to_string();
            self.skip_ws();
            if !self.eat('=') {
                return None;
            }
            self.skip_ws();
            if !self.eat('"') {
                return None;
            }
            let value = self.take_quoted()?;
            labels.push((key, value));
            self.skip_ws();
            if self.eat(',') {
                continue;
            }
            if self.eat('}') {
                return Some(labels);
            }
            return None;
        }
    }

    /// Reads an escaped label value up to and including the closing quote.
    fn take_quoted(&mut self) -> Option<String> {
        let mut value = String::new();
        loop {
            match self.bump()? {
                '"' => return Some(value),
                '\\' => match self.bump()? {
                    'n' => value.push('\n'),
                    '"' => value.push('"'),
                    '\\' => value.push('\\'),
                    other => {
                        value.push('\\');
                        value.push(other);
                    }
                },
                c => value.push(c),
            }
        }
    }
}
