use super::{ParserSpec, PluginError, Result};
use regex::Regex;

/// Turns raw plugin output into one number.
#[derive(Debug, Clone)]
pub enum ValueParser {
    /// The whole output, trimmed, must be a float literal.
    Number,
    /// The first capture group of the first match is the float literal.
    Regex(Regex),
}

impl ValueParser {
    /// Compiles a parser from its declaration.
    ///
    /// # Errors
    ///
    /// Fails for an unknown mode, a missing or invalid pattern, or a pattern
    /// without a capture group. The error text is the bare reason.
    pub fn from_spec(spec: &ParserSpec) -> std::result::Result<Self, String> {
        match spec.mode.as_str() {
            "" | "number" => Ok(Self::Number),
            "regex" => {
                let pattern = spec
                    .regex
                    .as_deref()
                    .filter(|p| !p.is_empty())
                    .ok_or_else(|| "parser regex mode requires 'regex'".to_string())?;
                Self::regex(pattern)
            }
            other => Err(format!("unsupported parser mode: {other}")),
        }
    }

    pub fn regex(pattern: &str) -> std::result::Result<Self, String> {
        let re = Regex::new(pattern).map_err(|e| format!("invalid parser regex: {e}"))?;
        if re.captures_len() < 2 {
            return Err(format!("parser regex '{pattern}' has no capture group"));
        }
        Ok(Self::Regex(re))
    }

    pub fn parse_value(&self, raw: &str) -> Result<f64> {
        match self {
            Self::Number => {
                let text = raw.trim();
                text.parse()
                    .map_err(|_| PluginError::Value(format!("'{}' is not a number", truncate(text))))
            }
            Self::Regex(re) => {
                let captured = re
                    .captures(raw)
                    .and_then(|caps| caps.get(1))
                    .ok_or_else(|| {
                        PluginError::Value(format!("regex '{}' did not match any capture group", re.as_str()))
                    })?;
                captured.as_str().trim().parse().map_err(|_| {
                    PluginError::Value(format!(
                        "captured '{}' is not a number",
                        truncate(captured.as_str())
                    ))
                })
            }
        }
    }
}

fn truncate(text: &str) -> &str {
    const MAX: usize = 64;
    if text.len() <= MAX {
        return text;
    }
    let mut end = MAX;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(mode: &str, regex: Option<&str>) -> ParserSpec {
        ParserSpec {
            mode: mode.to_string(),
            regex: regex.map(str::to_string),
        }
    }

    #[test]
    fn number_mode_trims_whitespace() {
        let parser = ValueParser::from_spec(&spec("number", None)).unwrap();
        assert_eq!(parser.parse_value("  42.5\n").unwrap(), 42.5);
        assert_eq!(parser.parse_value("-3e2").unwrap(), -300.0);
    }

    #[test]
    fn number_mode_rejects_residue() {
        let parser = ValueParser::Number;
        assert!(parser.parse_value("abc").is_err());
        assert!(parser.parse_value("42 bytes").is_err());
        assert!(parser.parse_value("").is_err());
    }

    #[test]
    fn empty_mode_defaults_to_number() {
        assert!(matches!(
            ValueParser::from_spec(&ParserSpec::default()).unwrap(),
            ValueParser::Number
        ));
    }

    #[test]
    fn regex_mode_uses_first_group_of_first_match() {
        let parser = ValueParser::from_spec(&spec("regex", Some(r"(\d+)"))).unwrap();
        assert_eq!(parser.parse_value("rx=118273 bytes").unwrap(), 118273.0);
        assert_eq!(parser.parse_value("a=1 b=2").unwrap(), 1.0);
    }

    #[test]
    fn regex_without_match_errors() {
        let parser = ValueParser::regex(r"temp=(\d+)").unwrap();
        assert!(parser.parse_value("humidity=40").is_err());
    }

    #[test]
    fn regex_without_capture_group_is_rejected() {
        let err = ValueParser::from_spec(&spec("regex", Some(r"\d+"))).unwrap_err();
        assert!(err.contains("capture group"));
    }

    #[test]
    fn regex_mode_requires_pattern() {
        assert!(ValueParser::from_spec(&spec("regex", None)).is_err());
        assert!(ValueParser::from_spec(&spec("regex", Some(""))).is_err());
        assert!(ValueParser::from_spec(&spec("regex", Some("(unclosed"))).is_err());
    }

    #[test]
    fn unknown_mode_is_rejected() {
        assert!(ValueParser::from_spec(&spec("jsonpath", None))
            .unwrap_err()
            .contains("unsupported"));
    }

    #[test]
    fn optional_group_that_did_not_participate_errors() {
        let parser = ValueParser::regex(r"x|(\d+)").unwrap();
        assert!(parser.parse_value("x").is_err());
    }
}
