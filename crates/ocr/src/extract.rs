use std::str::FromStr;
use std::sync::OnceLock;

use chrono::{Local, NaiveDate};
use regex::{Captures, Regex};
use rust_decimal::Decimal;
use slipwise_core::{
    truncate_graphemes, Money, Transaction, TransactionItem, MAX_TITLE_GRAPHEMES,
    TITLE_PLACEHOLDER, UNCATEGORIZED,
};

// ── Compiled regex cache ─────────────────────────────────────────────────────

macro_rules! re {
    ($name:ident, $pat:expr) => {
        fn $name() -> &'static Regex {
            static R: OnceLock<Regex> = OnceLock::new();
            R.get_or_init(|| Regex::new($pat).expect("invalid regex"))
        }
    };
}

re!(re_total_marker, r"(?i)total|ยอดรวม|รวมเงิน|รวมทั้งสิ้น");
re!(re_summary_marker,
    r"(?i)\b(?:sub\s*total|total|vat|tax|cash|change|discount)\b|ยอดรวม|รวม|เงินสด|เงินทอน|ภาษี|ส่วนลด");

re!(re_price, r"(?:฿|\$)?\s*([0-9]+(?:\.[0-9]{1,2})?)");

re!(re_qty_marker, r"(?i)\b(?:qty|quantity|x)\s*[:\-]?\s*([0-9]+)\b");
re!(re_qty_trailing, r"(?im)(?:^|\s)[x×]([0-9]+)\s*$");

re!(re_date_iso, r"\b(\d{4})-(\d{2})-(\d{2})\b");
re!(re_date_slash, r"\b(\d{1,2})/(\d{1,2})/(\d{4})\b");
re!(re_date_dash, r"\b(\d{1,2})-(\d{1,2})-(\d{4})\b");
re!(re_date_month_name, r"(?i)\b(\d{1,2})\s+([a-z]{3,})\.?,?\s+(\d{4})\b");

re!(re_item_line,
    r"^(?P<desc>.*?)\s+(?:฿|\$)?\s?(?P<amount>\d+\.\d{2})(?:\s+(?P<qty>\d+(?:\.\d+)?)@\d+(?:\.\d+)?|\s+[x×]\s?(?P<times>\d+))?$");
re!(re_prefix_noise, r"^(?:\d{1,3}[A-Za-z]{1,2}|[A-Za-z]{1,2}#|#\d*)\s+");

// ── Public extraction API ─────────────────────────────────────────────────────

/// Rule-based conversion of normalized receipt text into a [`Transaction`].
///
/// Every field has a documented default, so extraction never fails: no
/// title gives [`TITLE_PLACEHOLDER`], no date gives today's date, no
/// category match gives the first candidate (or [`UNCATEGORIZED`]).
#[derive(Debug, Clone, Default)]
pub struct HeuristicExtractor {
    today: Option<NaiveDate>,
}

impl HeuristicExtractor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pin the fallback date instead of reading the clock.
    pub fn with_today(today: NaiveDate) -> Self {
        Self { today: Some(today) }
    }

    fn today(&self) -> NaiveDate {
        self.today.unwrap_or_else(|| Local::now().date_naive())
    }

    /// Extract a transaction from text already passed through
    /// [`normalize`](crate::normalize::normalize).
    pub fn extract(&self, text: &str, categories: &[String]) -> Transaction {
        let title = guess_title(text);
        let date = guess_date(text).unwrap_or_else(|| self.today());
        let category = guess_category(text, categories);

        let mut items = line_items(text, categories, &category);
        if items.is_empty() {
            let price = guess_price(text);
            if !price.is_zero() {
                items.push(
                    TransactionItem::new(title.clone(), price, category)
                        .with_quantity(guess_quantity(text)),
                );
            }
        }

        Transaction { title, date, items }
    }
}

// ── Title ─────────────────────────────────────────────────────────────────────

fn guess_title(text: &str) -> String {
    let line = text
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .filter(|l| !re_total_marker().is_match(l))
        .find(|l| has_letter(l));

    if let Some(line) = line {
        return truncate_graphemes(line, MAX_TITLE_GRAPHEMES);
    }

    let words: Vec<&str> = text.split_whitespace().take(3).collect();
    if words.is_empty() {
        TITLE_PLACEHOLDER.to_string()
    } else {
        truncate_graphemes(&words.join(" "), MAX_TITLE_GRAPHEMES)
    }
}

/// Latin letters or anything in the Thai block.
fn has_letter(s: &str) -> bool {
    s.chars()
        .any(|c| c.is_ascii_alphabetic() || ('\u{0E00}'..='\u{0E7F}').contains(&c))
}

// ── Price & quantity ──────────────────────────────────────────────────────────

fn guess_price(text: &str) -> Money {
    re_price()
        .captures(text)
        .and_then(|c| parse_amount(c.get(1)?.as_str()))
        .unwrap_or_default()
}

/// An explicit marker decides on its own; a zero or unparseable count
/// there means the default, not a fall-through to the trailing form.
fn guess_quantity(text: &str) -> u32 {
    if let Some(c) = re_qty_marker().captures(text) {
        return parse_count(&c[1]).unwrap_or(1);
    }
    re_qty_trailing()
        .captures(text)
        .and_then(|c| parse_count(&c[1]))
        .unwrap_or(1)
}

// ── Date ─────────────────────────────────────────────────────────────────────

fn guess_date(text: &str) -> Option<NaiveDate> {
    // Fixed priority: the first pattern with a valid calendar date wins.
    first_valid(re_date_iso(), text, |c| ymd(&c[1], &c[2], &c[3]))
        .or_else(|| first_valid(re_date_slash(), text, |c| ymd(&c[3], &c[2], &c[1])))
        .or_else(|| first_valid(re_date_dash(), text, |c| ymd(&c[3], &c[2], &c[1])))
        .or_else(|| {
            first_valid(re_date_month_name(), text, |c| {
                let month = month_from_name(&c[2])?;
                let year = parse_count(&c[3])?;
                let day = parse_count(&c[1])?;
                NaiveDate::from_ymd_opt(i32::try_from(year).ok()?, month, day)
            })
        })
}

fn first_valid(
    re: &Regex,
    text: &str,
    build: impl Fn(&Captures) -> Option<NaiveDate>,
) -> Option<NaiveDate> {
    re.captures_iter(text).find_map(|c| build(&c))
}

fn ymd(year: &str, month: &str, day: &str) -> Option<NaiveDate> {
    let year = i32::try_from(parse_count(year)?).ok()?;
    NaiveDate::from_ymd_opt(year, parse_count(month)?, parse_count(day)?)
}

/// Month from an English name or abbreviation (`jan`, `Sept`, `MARCH`).
fn month_from_name(name: &str) -> Option<u32> {
    const PREFIXES: [&str; 12] = [
        "jan", "feb", "mar", "apr", "may", "jun", "jul", "aug", "sep", "oct", "nov", "dec",
    ];
    let lower = name.to_ascii_lowercase();
    PREFIXES
        .iter()
        .position(|p| lower.starts_with(p))
        .map(|i| i as u32 + 1)
}

// ── Category ──────────────────────────────────────────────────────────────────

/// Candidates are returned exactly as the caller spelled them; trimming
/// only applies to matching.
fn guess_category(text: &str, categories: &[String]) -> String {
    first_mentioned(text, categories)
        .or_else(|| categories.iter().find(|c| !c.trim().is_empty()).map(String::as_str))
        .unwrap_or(UNCATEGORIZED)
        .to_string()
}

/// First candidate, in the caller's order, that occurs in `text` ignoring case.
fn first_mentioned<'a>(text: &str, categories: &'a [String]) -> Option<&'a str> {
    let haystack = text.to_lowercase();
    categories
        .iter()
        .filter(|c| !c.trim().is_empty())
        .find(|c| haystack.contains(&c.trim().to_lowercase()))
        .map(String::as_str)
}

// ── Line items ────────────────────────────────────────────────────────────────

/// Product lines: a description with at least one letter followed by a
/// two-decimal amount, optionally trailed by a merged `<n>@<price>`
/// annotation or an `x<n>` multiplier. Summary lines are skipped.
fn line_items(text: &str, categories: &[String], fallback: &str) -> Vec<TransactionItem> {
    text.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .filter(|l| !re_summary_marker().is_match(l))
        .filter_map(|line| {
            let c = re_item_line().captures(line)?;
            let desc = strip_prefix_noise(c.name("desc")?.as_str());
            if !has_letter(desc) {
                return None;
            }
            let price = parse_amount(c.name("amount")?.as_str())?;
            let quantity = c
                .name("qty")
                .and_then(|q| parse_count(q.as_str()))
                .or_else(|| c.name("times").and_then(|t| parse_count(t.as_str())))
                .unwrap_or_else(|| guess_quantity(desc));
            let category = first_mentioned(line, categories).unwrap_or(fallback);

            Some(
                TransactionItem::new(
                    truncate_graphemes(desc, MAX_TITLE_GRAPHEMES),
                    price,
                    category,
                )
                .with_quantity(quantity),
            )
        })
        .collect()
}

/// Drop register codes such as `1P`, `A#` or `#12` in front of a product name.
fn strip_prefix_noise(desc: &str) -> &str {
    let desc = desc.trim();
    match re_prefix_noise().find(desc) {
        Some(m) if m.end() < desc.len() => desc[m.end()..].trim_start(),
        _ => desc,
    }
}

// ── Locale-agnostic number parsing ────────────────────────────────────────────

/// ASCII digits with at most one `.`; anything else is rejected.
fn parse_amount(s: &str) -> Option<Money> {
    let mut seen_dot = false;
    let mut digits = 0;
    for c in s.chars() {
        match c {
            '0'..='9' => digits += 1,
            '.' if !seen_dot => seen_dot = true,
            _ => return None,
        }
    }
    if digits == 0 {
        return None;
    }
    Decimal::from_str(s).ok().map(Money::from_decimal)
}

/// A strictly positive whole count; zero counts as absent.
fn parse_count(s: &str) -> Option<u32> {
    if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    s.parse::<u32>().ok().filter(|n| *n > 0)
}

// ── Tests ─────────────────────────────────────────────────────────────────────
