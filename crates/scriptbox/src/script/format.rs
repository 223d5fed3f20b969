//! Text formatting shared by `repr`, f-strings, `str.format` and `%`.

use std::fmt::Write;

use num_bigint::BigInt;
use num_traits::{Signed, ToPrimitive};

/// Python `repr()` of a float: shortest round-trip digits, always with a decimal
/// point or exponent.
pub(crate) fn float_repr(value: f64) -> String {
    if value.is_nan() {
        return "nan".to_owned();
    }
    if value.is_infinite() {
        return if value > 0.0 { "inf" } else { "-inf" }.to_owned();
    }
    let magnitude = value.abs();
    if magnitude != 0.0 && !(1e-4..1e16).contains(&magnitude) {
        return exponent_form(&format!("{value:e}"));
    }
    let text = format!("{value}");
    if text.contains('.') { text } else { format!("{text}.0") }
}

/// Rewrites Rust exponent output (`1.5e-5`) the way Python prints it (`1.5e-05`).
fn exponent_form(text: &str) -> String {
    let Some((mantissa, exponent)) = text.split_once('e') else {
        return text.to_owned();
    };
    let (sign, digits) = match exponent.strip_prefix('-') {
        Some(digits) => ('-', digits),
        None => ('+', exponent),
    };
    format!("{mantissa}e{sign}{digits:0>2}")
}

/// Python `repr()` of a string, choosing quotes the way CPython does.
pub(crate) fn string_repr(text: &str) -> String {
    let quote = if text.contains('\'') && !text.contains('"') { '"' } else { '\'' };
    let mut out = String::with_capacity(text.len() + 2);
    out.push(quote);
    for c in text.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c == quote => {
                out.push('\\');
                out.push(c);
            }
            c if (c as u32) < 0x20 || c as u32 == 0x7f => {
                let _ = write!(out, "\\x{:02x}", c as u32);
            }
            c => out.push(c),
        }
    }
    out.push(quote);
    out
}

/// Parsed `[[fill]align][sign][0][width][,][.precision][type]`.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub(crate) struct FormatSpec {
    pub fill: Option<char>,
    pub align: Option<char>,
    pub sign: Option<char>,
    pub zero_pad: bool,
    pub width: usize,
    pub grouping: bool,
    pub precision: Option<usize>,
    pub kind: Option<char>,
}

impl FormatSpec {
    /// Returns `None` for specs outside the supported mini-language.
    pub fn parse(spec: &str) -> Option<Self> {
        let chars: Vec<char> = spec.chars().collect();
        let mut result = Self::default();
        let mut i = 0;
        let is_align = |c: char| matches!(c, '<' | '>' | '^' | '=');
        if chars.len() >= 2 && is_align(chars[1]) {
            result.fill = Some(chars[0]);
            result.align = Some(chars[1]);
            i = 2;
        } else if chars.first().is_some_and(|c| is_align(*c)) {
            result.align = Some(chars[0]);
            i = 1;
        }
        if let Some(&c) = chars.get(i)
            && matches!(c, '+' | '-' | ' ')
        {
            result.sign = Some(c);
            i += 1;
        }
        if chars.get(i) == Some(&'0') {
            result.zero_pad = true;
            i += 1;
        }
        let mut width = String::new();
        while let Some(&c) = chars.get(i).filter(|c| c.is_ascii_digit()) {
            width.push(c);
            i += 1;
        }
        if !width.is_empty() {
            result.width = width.parse().ok()?;
        }
        if chars.get(i) == Some(&',') {
            result.grouping = true;
            i += 1;
        }
        if chars.get(i) == Some(&'.') {
            i += 1;
            let mut precision = String::new();
            while let Some(&c) = chars.get(i).filter(|c| c.is_ascii_digit()) {
                precision.push(c);
                i += 1;
            }
            result.precision = Some(precision.parse().ok()?);
        }
        if let Some(&c) = chars.get(i) {
            if !matches!(c, 's' | 'd' | 'f' | 'F' | 'e' | 'E' | 'g' | 'G' | '%' | 'x' | 'X' | 'o' | 'b') {
                return None;
            }
            result.kind = Some(c);
            i += 1;
        }
        (i == chars.len()).then_some(result)
    }

    /// Applies fill and alignment; `numeric` selects right alignment by default.
    pub fn pad(&self, body: String, numeric: bool) -> String {
        let len = body.chars().count();
        if len >= self.width {
            return body;
        }
        let missing = self.width - len;
        if self.zero_pad && self.align.is_none() && numeric {
            let (sign, digits) = match body.strip_prefix(['-', '+', ' ']) {
                Some(rest) => (&body[..1], rest),
                None => ("", body.as_str()),
            };
            return format!("{sign}{}{digits}", "0".repeat(missing));
        }
        let fill = self.fill.unwrap_or(' ').to_string();
        match self.align.unwrap_or(if numeric { '>' } else { '<' }) {
            '>' => format!("{}{body}", fill.repeat(missing)),
            '^' => {
                let left = missing / 2;
                format!("{}{body}{}", fill.repeat(left), fill.repeat(missing - left))
            }
            _ => format!("{body}{}", fill.repeat(missing)),
        }
    }

    fn sign_prefix(&self, negative: bool) -> &'static str {
        match (negative, self.sign) {
            (true, _) => "-",
            (false, Some('+')) => "+",
            (false, Some(' ')) => " ",
            _ => "",
        }
    }

    pub fn format_int(&self, value: &BigInt) -> Option<String> {
        let magnitude = value.magnitude();
        let digits = match self.kind {
            None | Some('d') => group(&magnitude.to_string(), self.grouping),
            Some('x') => format!("{magnitude:x}"),
            Some('X') => format!("{magnitude:X}"),
            Some('o') => format!("{magnitude:o}"),
            Some('b') => format!("{magnitude:b}"),
            Some('f' | 'F' | 'e' | 'E' | 'g' | 'G' | '%') => {
                return self.format_float(value.to_f64().unwrap_or(f64::INFINITY));
            }
            _ => return None,
        };
        Some(self.pad(format!("{}{digits}", self.sign_prefix(value.is_negative())), true))
    }

    pub fn format_float(&self, value: f64) -> Option<String> {
        let negative = value.is_sign_negative() && value != 0.0;
        let magnitude = value.abs();
        let body = match self.kind {
            Some('f' | 'F') => fixed(magnitude, self.precision.unwrap_or(6), self.grouping),
            Some('%') => format!("{}%", fixed(magnitude * 100.0, self.precision.unwrap_or(6), self.grouping)),
            Some('e' | 'E') => {
                let text = exponent_form(&format!("{magnitude:.*e}", self.precision.unwrap_or(6)));
                if self.kind == Some('E') { text.to_uppercase() } else { text }
            }
            Some('g' | 'G') | None if self.precision.is_some() => general(magnitude, self.precision.unwrap_or(6)),
            Some('g' | 'G') => general(magnitude, 6),
            None => {
                let text = float_repr(magnitude);
                if self.grouping {
                    let (int_part, frac) = text.split_once('.').unwrap_or((&text, ""));
                    format!("{}.{frac}", group(int_part, true))
                } else {
                    text
                }
            }
            _ => return None,
        };
        Some(self.pad(format!("{}{body}", self.sign_prefix(negative)), true))
    }

    pub fn format_str(&self, value: &str) -> Option<String> {
        if !matches!(self.kind, None | Some('s')) {
            return None;
        }
        let text: String = match self.precision {
            Some(limit) => value.chars().take(limit).collect(),
            None => value.to_owned(),
        };
        Some(self.pad(text, false))
    }
}

fn fixed(magnitude: f64, precision: usize, grouping: bool) -> String {
    let text = format!("{magnitude:.precision$}");
    if !grouping {
        return text;
    }
    match text.split_once('.') {
        Some((int_part, frac)) => format!("{}.{frac}", group(int_part, true)),
        None => group(&text, true),
    }
}

/// `%g` style: significant digits, trailing zeros dropped.
fn general(magnitude: f64, precision: usize) -> String {
    let precision = precision.max(1);
    if magnitude == 0.0 {
        return "0".to_owned();
    }
    #[expect(clippy::cast_possible_truncation, reason = "decimal exponent of a finite f64 fits in i32")]
    let exponent = magnitude.log10().floor() as i32;
    let limit = i32::try_from(precision).unwrap_or(i32::MAX);
    if exponent < -4 || exponent >= limit {
        let text = format!("{:.*e}", precision - 1, magnitude);
        let (mantissa, exp) = text.split_once('e').unwrap_or((&text, "0"));
        let mantissa = trim_zeros(mantissa);
        exponent_form(&format!("{mantissa}e{exp}"))
    } else {
        let decimals = usize::try_from(limit - 1 - exponent).unwrap_or(0);
        trim_zeros(&format!("{magnitude:.decimals$}")).to_owned()
    }
}

fn trim_zeros(text: &str) -> &str {
    if text.contains('.') {
        text.trim_end_matches('0').trim_end_matches('.')
    } else {
        text
    }
}

fn group(digits: &str, enabled: bool) -> String {
    if !enabled || digits.len() <= 3 {
        return digits.to_owned();
    }
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out
}
