//! Built-in template helpers.
//!
//! Formatting helpers follow the configured locale and currency:
//! `en-US` + `USD` renders `1234.5` as `$1,234.50`, `de-DE` + `EUR` as `1.234,50 €`.

use std::fmt::Write;

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use serde_json::Value;

use super::types::{TemplateError, TemplateResult};

/// Locale and currency used by the formatting helpers.
#[derive(Debug, Clone)]
pub struct HelperContext {
    pub locale: String,
    pub currency: String,
}

impl Default for HelperContext {
    fn default() -> Self {
        Self {
            locale: "en-US".to_string(),
            currency: "USD".to_string(),
        }
    }
}

impl HelperContext {
    fn language(&self) -> String {
        self.locale
            .split(['-', '_'])
            .next()
            .unwrap_or_default()
            .to_ascii_lowercase()
    }

    fn region(&self) -> Option<String> {
        self.locale
            .split(['-', '_'])
            .nth(1)
            .map(|r| r.to_ascii_uppercase())
    }
}

/// Invoke a helper by name.
pub fn call(name: &str, args: &[Value], ctx: &HelperContext) -> TemplateResult<Value> {
    match name {
        "formatCurrency" => {
            require_args(name, args, 1)?;
            Ok(format_currency(args, ctx))
        }
        "formatDate" => {
            require_args(name, args, 1)?;
            Ok(format_date(args, ctx))
        }
        "eq" => compare(name, args, |a, b| loosely_equal(a, b)),
        "ne" => compare(name, args, |a, b| !loosely_equal(a, b)),
        "gt" => compare(name, args, |a, b| ordering(a, b).is_some_and(|o| o.is_gt())),
        "gte" => compare(name, args, |a, b| ordering(a, b).is_some_and(|o| o.is_ge())),
        "lt" => compare(name, args, |a, b| ordering(a, b).is_some_and(|o| o.is_lt())),
        "lte" => compare(name, args, |a, b| ordering(a, b).is_some_and(|o| o.is_le())),
        "and" => Ok(Value::Bool(!args.is_empty() && args.iter().all(is_truthy))),
        "or" => Ok(Value::Bool(args.iter().any(is_truthy))),
        other => Err(TemplateError::UnknownHelper(other.to_string())),
    }
}

fn require_args(helper: &str, args: &[Value], expected: usize) -> TemplateResult<()> {
    if args.len() < expected {
        return Err(TemplateError::Arity {
            helper: helper.to_string(),
            expected,
            got: args.len(),
        });
    }
    Ok(())
}

fn compare(name: &str, args: &[Value], f: impl Fn(&Value, &Value) -> bool) -> TemplateResult<Value> {
    require_args(name, args, 2)?;
    Ok(Value::Bool(f(&args[0], &args[1])))
}

/// Handlebars truthiness: `null`, `false`, `0`, `""` and `[]` are falsy.
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(_) => true,
    }
}

/// Text form of a value as written into the output.
pub fn display(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        other => other.to_string(),
    }
}

fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn loosely_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        _ => a == b,
    }
}

fn ordering(a: &Value, b: &Value) -> Option<std::cmp::Ordering> {
    if let (Value::String(x), Value::String(y)) = (a, b) {
        if as_number(a).is_none() || as_number(b).is_none() {
            return Some(x.cmp(y));
        }
    }
    as_number(a)?.partial_cmp(&as_number(b)?)
}

struct NumberStyle {
    group: &'static str,
    decimal: char,
    symbol_first: bool,
}

fn number_style(ctx: &HelperContext) -> NumberStyle {
    match ctx.language().as_str() {
        "de" | "es" | "it" | "nl" | "pt" | "da" => NumberStyle {
            group: ".",
            decimal: ',',
            symbol_first: false,
        },
        "fr" | "sv" | "nb" | "fi" | "pl" | "cs" | "ru" => NumberStyle {
            group: "\u{a0}",
            decimal: ',',
            symbol_first: false,
        },
        _ => NumberStyle {
            group: ",",
            decimal: '.',
            symbol_first: true,
        },
    }
}

fn currency_symbol(code: &str) -> Option<&'static str> {
    match code {
        "USD" => Some("$"),
        "EUR" => Some("€"),
        "GBP" => Some("£"),
        "JPY" | "CNY" => Some("¥"),
        "INR" => Some("₹"),
        "KRW" => Some("₩"),
        _ => None,
    }
}

fn group_digits(digits: &str, separator: &str) -> String {
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push_str(separator);
        }
        out.push(ch);
    }
    out
}

/// `formatCurrency amount [currencyCode]`
fn format_currency(args: &[Value], ctx: &HelperContext) -> Value {
    let Some(amount) = as_number(&args[0]) else {
        return Value::String(display(&args[0]));
    };
    let code = args
        .get(1)
        .and_then(Value::as_str)
        .unwrap_or(ctx.currency.as_str())
        .to_ascii_uppercase();

    let decimals = if matches!(code.as_str(), "JPY" | "KRW") { 0 } else { 2 };
    let style = number_style(ctx);

    let fixed = format!("{:.*}", decimals, amount.abs());
    let (int_part, frac_part) = fixed.split_once('.').unwrap_or((fixed.as_str(), ""));
    let mut number = group_digits(int_part, style.group);
    if !frac_part.is_empty() {
        number.push(style.decimal);
        number.push_str(frac_part);
    }

    let body = match (currency_symbol(&code), style.symbol_first) {
        (Some(symbol), true) => format!("{}{}", symbol, number),
        (Some(symbol), false) => format!("{}\u{a0}{}", number, symbol),
        (None, true) => format!("{}\u{a0}{}", code, number),
        (None, false) => format!("{}\u{a0}{}", number, code),
    };

    let is_negative = amount < 0.0 && fixed.chars().any(|c| c.is_ascii_digit() && c != '0');
    Value::String(if is_negative { format!("-{}", body) } else { body })
}

fn parse_date(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(s) => DateTime::parse_from_rfc3339(s)
            .map(|d| d.with_timezone(&Utc))
            .ok()
            .or_else(|| {
                NaiveDate::parse_from_str(s, "%Y-%m-%d")
                    .ok()
                    .and_then(|d| d.and_hms_opt(0, 0, 0))
                    .map(|d| d.and_utc())
            }),
        Value::Number(n) => n.as_i64().and_then(DateTime::from_timestamp_millis),
        _ => None,
    }
}

const MONTHS_EN: [&str; 12] = [
    "January", "February", "March", "April", "May", "June", "July", "August", "September",
    "October", "November", "December",
];
const MONTHS_DE: [&str; 12] = [
    "Januar", "Februar", "März", "April", "Mai", "Juni", "Juli", "August", "September",
    "Oktober", "November", "Dezember",
];
const MONTHS_FR: [&str; 12] = [
    "janvier", "février", "mars", "avril", "mai", "juin", "juillet", "août", "septembre",
    "octobre", "novembre", "décembre",
];

/// `formatDate value [short|long|iso|strftime pattern]`
fn format_date(args: &[Value], ctx: &HelperContext) -> Value {
    let Some(date) = parse_date(&args[0]) else {
        return Value::String(display(&args[0]));
    };
    let style = args.get(1).and_then(Value::as_str).unwrap_or("long");

    let us = ctx.region().map_or(true, |r| r == "US");
    let language = ctx.language();
    let month = date.month0() as usize;
    let (day, year) = (date.day(), date.year());

    let formatted = match (style, language.as_str()) {
        ("iso", _) => date.format("%Y-%m-%d").to_string(),
        ("short", "en") if us => date.format("%-m/%-d/%Y").to_string(),
        ("short", "en" | "fr" | "es" | "it" | "pt") => date.format("%d/%m/%Y").to_string(),
        ("short", "de") => date.format("%d.%m.%Y").to_string(),
        ("short", _) => date.format("%Y-%m-%d").to_string(),
        ("long", "en") if us => format!("{} {}, {}", MONTHS_EN[month], day, year),
        ("long", "en") => format!("{} {} {}", day, MONTHS_EN[month], year),
        ("long", "de") => format!("{}. {} {}", day, MONTHS_DE[month], year),
        ("long", "fr") => format!("{} {} {}", day, MONTHS_FR[month], year),
        ("long", _) => date.format("%Y-%m-%d").to_string(),
        (pattern, _) => {
            let mut out = String::new();
            match write!(out, "{}", date.format(pattern)) {
                Ok(()) => out,
                Err(_) => date.format("%Y-%m-%d").to_string(),
            }
        }
    };

    Value::String(formatted)
}
