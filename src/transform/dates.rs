//! Calendar-date parsing for source values.

use chrono::NaiveDate;

use crate::types::Value;

/// Formats tried by [`DateParser::default`], in order.
///
/// Upstream extracts write `01-Jan-24`; hand-made fixtures use ISO dates.
pub const DEFAULT_DATE_FORMATS: [&str; 2] = ["%d-%b-%y", "%Y-%m-%d"];

/// Parses source values into dates using an ordered list of `chrono` format strings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DateParser {
    formats: Vec<String>,
}

impl Default for DateParser {
    fn default() -> Self {
        Self::new(DEFAULT_DATE_FORMATS.iter().map(|f| f.to_string()).collect())
    }
}

impl DateParser {
    /// Create a parser trying `formats` in order. An empty list falls back to the defaults.
    pub fn new(formats: Vec<String>) -> Self {
        if formats.is_empty() {
            return Self::default();
        }
        Self { formats }
    }

    pub fn formats(&self) -> &[String] {
        &self.formats
    }

    /// Parse text with the first matching format.
    pub fn parse_str(&self, raw: &str) -> Option<NaiveDate> {
        let raw = raw.trim();
        self.formats
            .iter()
            .find_map(|f| NaiveDate::parse_from_str(raw, f).ok())
    }

    /// Parse a value: dates pass through, text is parsed, anything else is `None`.
    pub fn parse(&self, value: &Value) -> Option<NaiveDate> {
        match value {
            Value::Date(d) => Some(*d),
            Value::Utf8(s) => self.parse_str(s),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::DateParser;
    use crate::types::Value;

    fn ymd(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn parses_both_default_formats() {
        let p = DateParser::default();
        assert_eq!(p.parse_str("01-Jan-24"), Some(ymd(2024, 1, 1)));
        assert_eq!(p.parse_str("15-Mar-19"), Some(ymd(2019, 3, 15)));
        assert_eq!(p.parse_str(" 2020-02-29 "), Some(ymd(2020, 2, 29)));
    }

    #[test]
    fn rejects_garbage_and_impossible_dates() {
        let p = DateParser::default();
        assert_eq!(p.parse_str("not a date"), None);
        assert_eq!(p.parse_str("2019-02-29"), None);
        assert_eq!(p.parse(&Value::Int64(20240101)), None);
        assert_eq!(p.parse(&Value::Null), None);
    }

    #[test]
    fn custom_formats_replace_defaults() {
        let p = DateParser::new(vec!["%d/%m/%Y".to_string()]);
        assert_eq!(p.parse_str("08/01/2024"), Some(ymd(2024, 1, 8)));
        assert_eq!(p.parse_str("2024-01-08"), None);
        assert_eq!(DateParser::new(Vec::new()), DateParser::default());
    }

    #[test]
    fn dates_pass_through() {
        let d = ymd(2024, 1, 3);
        assert_eq!(DateParser::default().parse(&Value::Date(d)), Some(d));
    }
}
