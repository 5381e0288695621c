//! `format-number()` patterns.
//!
//! Patterns use the fixed characters `#`, `0`, `,`, `.`, `%`, `‰` and `;`.
//! The symbols printed in their place come from [`DecimalSymbols`].

use serde::{Deserialize, Serialize};

use crate::errors::{EvalError, Result};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DecimalSymbols {
    pub decimal_separator: char,
    pub grouping_separator: char,
    pub zero_digit: char,
    pub minus_sign: char,
    pub percent: char,
    pub per_mille: char,
    pub digit: char,
    pub pattern_separator: char,
    pub infinity: String,
    pub nan: String,
}

impl Default for DecimalSymbols {
    fn default() -> Self {
        Self {
            decimal_separator: '.',
            grouping_separator: ',',
            zero_digit: '0',
            minus_sign: '-',
            percent: '%',
            per_mille: '‰',
            digit: '#',
            pattern_separator: ';',
            infinity: "∞".to_string(),
            nan: "NaN".to_string(),
        }
    }
}

impl DecimalSymbols {
    /// Symbols for a locale tag such as `de`, `fr_FR` or `en-US`.
    pub fn for_locale(locale: &str) -> Self {
        let language = locale
            .split(['_', '-'])
            .next()
            .unwrap_or_default()
            .to_ascii_lowercase();
        let (decimal, grouping) = match language.as_str() {
            "de" | "es" | "it" | "nl" | "pt" | "da" | "id" | "tr" | "el" => (',', '.'),
            "fr" | "ru" | "pl" | "cs" | "sk" | "sv" | "fi" | "nb" | "no" | "uk" => {
                (',', '\u{a0}')
            }
            _ => ('.', ','),
        };
        Self {
            decimal_separator: decimal,
            grouping_separator: grouping,
            ..Self::default()
        }
    }
}

#[derive(Debug, Default)]
struct SubPattern {
    prefix: String,
    suffix: String,
    min_int: usize,
    grouping: usize,
    min_frac: usize,
    max_frac: usize,
    multiplier: f64,
}

const NUMBER_CHARS: &[char] = &['#', '0', ',', '.'];

fn affix(text: &str, symbols: &DecimalSymbols, multiplier: &mut f64) -> String {
    text.chars()
        .map(|c| match c {
            '%' => {
                *multiplier = 100.0;
                symbols.percent
            }
            '‰' => {
                *multiplier = 1000.0;
                symbols.per_mille
            }
            other => other,
        })
        .collect()
}

fn parse_sub_pattern(pattern: &str, symbols: &DecimalSymbols) -> Result<SubPattern> {
    let start = pattern.find(NUMBER_CHARS).ok_or_else(|| {
        EvalError::evaluation(format!("malformed format-number pattern '{pattern}'"))
    })?;
    let len = pattern[start..]
        .find(|c: char| !NUMBER_CHARS.contains(&c))
        .unwrap_or(pattern.len() - start);
    let number = &pattern[start..start + len];
    let mut sub = SubPattern {
        multiplier: 1.0,
        ..SubPattern::default()
    };
    sub.prefix = affix(&pattern[..start], symbols, &mut sub.multiplier);
    sub.suffix = affix(&pattern[start + len..], symbols, &mut sub.multiplier);

    let (int, frac) = number.split_once('.').unwrap_or((number, ""));
    if frac.contains(['.', ',']) {
        return Err(EvalError::evaluation(format!(
            "malformed format-number pattern '{pattern}'"
        )));
    }
    sub.min_int = int.chars().filter(|c| *c == '0').count();
    sub.grouping = match int.rfind(',') {
        Some(i) => int.len() - i - 1,
        None => 0,
    };
    sub.min_frac = frac.chars().filter(|c| *c == '0').count();
    sub.max_frac = frac.len();
    Ok(sub)
}

/// Format `value` with a decimal-format `pattern`.
pub fn format_number(value: f64, pattern: &str, symbols: &DecimalSymbols) -> Result<String> {
    if value.is_nan() {
        return Ok(symbols.nan.clone());
    }
    let (positive, negative) = match pattern.split_once(';') {
        Some((p, n)) => (p, Some(n)),
        None => (pattern, None),
    };
    let sub = parse_sub_pattern(positive, symbols)?;
    let is_negative = value.is_sign_negative();
    let (prefix, suffix) = match (is_negative, negative) {
        (false, _) => (sub.prefix.clone(), sub.suffix.clone()),
        (true, Some(n)) => {
            let neg = parse_sub_pattern(n, symbols)?;
            (neg.prefix, neg.suffix)
        }
        (true, None) => (format!("{}{}", symbols.minus_sign, sub.prefix), sub.suffix.clone()),
    };
    let magnitude = value.abs() * sub.multiplier;
    if magnitude.is_infinite() {
        return Ok(format!("{prefix}{}{suffix}", symbols.infinity));
    }

    let fixed = format!("{:.*}", sub.max_frac, magnitude);
    let (int, frac) = fixed.split_once('.').unwrap_or((fixed.as_str(), ""));
    let mut frac = frac.to_string();
    while frac.len() > sub.min_frac && frac.ends_with('0') {
        frac.pop();
    }
    let mut int = int.trim_start_matches('0').to_string();
    while int.len() < sub.min_int {
        int.insert(0, '0');
    }
    if int.is_empty() && frac.is_empty() {
        int.push('0');
    }

    let mut out = prefix;
    let digits: Vec<char> = int.chars().collect();
    for (i, d) in digits.iter().enumerate() {
        let remaining = digits.len() - i;
        if i > 0 && sub.grouping > 0 && remaining % sub.grouping == 0 {
            out.push(symbols.grouping_separator);
        }
        out.push(localize(*d, symbols));
    }
    if !frac.is_empty() {
        out.push(symbols.decimal_separator);
        out.extend(frac.chars().map(|d| localize(d, symbols)));
    }
    out.push_str(&suffix);
    Ok(out)
}

fn localize(digit: char, symbols: &DecimalSymbols) -> char {
    match digit.to_digit(10) {
        Some(d) => char::from_u32(symbols.zero_digit as u32 + d).unwrap_or(digit),
        None => digit,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn fmt(value: f64, pattern: &str) -> String {
        format_number(value, pattern, &DecimalSymbols::default()).unwrap()
    }

    #[test]
    fn grouping_and_fractions() {
        assert_eq!(fmt(1234.5, "#,##0.00"), "1,234.50");
        assert_eq!(fmt(1234567.0, "#,###"), "1,234,567");
        assert_eq!(fmt(3.14159, "0.###"), "3.142");
        assert_eq!(fmt(3.0, "0.###"), "3");
        assert_eq!(fmt(0.5, "#.##"), ".5");
        assert_eq!(fmt(7.0, "000"), "007");
    }

    #[test]
    fn affixes_and_multipliers() {
        assert_eq!(fmt(0.25, "0%"), "25%");
        assert_eq!(fmt(12.0, "$0.00 each"), "$12.00 each");
        assert_eq!(fmt(-3.0, "0;(0)"), "(3)");
        assert_eq!(fmt(-3.0, "0"), "-3");
    }

    #[test]
    fn special_values() {
        assert_eq!(fmt(f64::NAN, "0"), "NaN");
        assert_eq!(fmt(f64::NEG_INFINITY, "0"), "-∞");
    }

    #[test]
    fn localized_symbols() {
        let de = DecimalSymbols::for_locale("de_DE");
        assert_eq!(format_number(1234.5, "#,##0.00", &de).unwrap(), "1.234,50");
        assert_eq!(DecimalSymbols::for_locale("en-US"), DecimalSymbols::default());
    }

    #[test]
    fn patterns_need_digits() {
        assert!(format_number(1.0, "abc", &DecimalSymbols::default()).is_err());
    }
}
