//! Reward counter text.
//!
//! Counters are displayed with a single grouping separator inserted three digits
//! from the end once the value reaches 1000 (`999` -> `"999"`, `1235` ->
//! `"1.235"`). The separator is a display convention only; parsing strips it
//! back out before any arithmetic.

/// Render `value` with `separator` inserted three digits from the end.
pub fn format_grouped(value: u64, separator: char) -> String {
    let digits = value.to_string();
    if value < 1000 {
        return digits;
    }
    let split = digits.len() - 3;
    let mut out = String::with_capacity(digits.len() + separator.len_utf8());
    out.push_str(&digits[..split]);
    out.push(separator);
    out.push_str(&digits[split..]);
    out
}

/// Read a displayed counter back into a number. Any non-digit character
/// (separators, whitespace, labels) is ignored; empty text reads as zero.
pub fn parse_grouped(text: &str) -> u64 {
    text.chars()
        .filter_map(|c| c.to_digit(10))
        .fold(0u64, |acc, d| acc.saturating_mul(10).saturating_add(u64::from(d)))
}

/// Parse `text`, add `delta` and render the result.
pub fn increment_text(text: &str, delta: u64, separator: char) -> String {
    format_grouped(parse_grouped(text).saturating_add(delta), separator)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn below_one_thousand_has_no_separator() {
        assert_eq!(format_grouped(0, '.'), "0");
        assert_eq!(format_grouped(999, '.'), "999");
    }

    #[test]
    fn crossing_one_thousand_inserts_separator() {
        assert_eq!(increment_text("999", 1, '.'), "1.000");
        assert_eq!(increment_text("1.234", 1, '.'), "1.235");
        assert_eq!(increment_text("1234", 1, '.'), "1.235");
    }

    #[test]
    fn only_one_separator_is_inserted() {
        assert_eq!(format_grouped(1_234_567, '.'), "1234.567");
        assert_eq!(parse_grouped("1234.567"), 1_234_567);
    }

    #[test]
    fn parse_ignores_noise() {
        assert_eq!(parse_grouped(""), 0);
        assert_eq!(parse_grouped(" 12.400 pts"), 12_400);
    }

    #[test]
    fn custom_separator() {
        assert_eq!(format_grouped(5_200, ' '), "5 200");
    }
}
