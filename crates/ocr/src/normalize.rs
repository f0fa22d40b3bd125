//! Clean-up of recognized receipt text.
//!
//! Recognition output for receipts is full of layout residue: table borders,
//! separator rules, runs of spaces used for column alignment, and quantity
//! annotations printed on their own line under the product they belong to.
//! [`normalize`] runs a fixed sequence of independent passes over the text;
//! each pass consumes the previous pass's output.

use regex::{Captures, Regex};
use std::sync::OnceLock;

macro_rules! re {
    ($name:ident, $pat:expr) => {
        fn $name() -> &'static Regex {
            static R: OnceLock<Regex> = OnceLock::new();
            R.get_or_init(|| Regex::new($pat).expect("invalid regex"))
        }
    };
}

re!(re_box_glyphs, r"[|¦\x{2500}-\x{257F}]+");
re!(re_separator_rule, r"[-_=]{2,}");
re!(re_blank_lines, r"\n(?:[ \t]*\n){2,}");
re!(re_inline_space, r"[ \t]{2,}");
// The trailing group stands in for a word boundary: Thai letters are word
// characters, so `\b` would refuse "1,000บาท".
re!(re_thousands, r"(\d)[, \t]+(\d{3})((?:\.\d+)?@)?(\D|$)");
re!(re_qty_annotation, r"^[ \t]*\d+(?:\.\d+)?@\d+(?:\.\d+)?");

/// Glyph pairs the recognizer is known to confuse in Thai text.
const OCR_SUBSTITUTIONS: &[(&str, &str)] = &[
    // Two SARA E read in place of SARA AE.
    ("\u{0E40}\u{0E40}", "\u{0E41}"),
    // NIKHAHIT + SARA AA read in place of SARA AM.
    ("\u{0E4D}\u{0E32}", "\u{0E33}"),
    // Obsolete consonants never printed on modern receipts.
    ("\u{0E03}", "\u{0E02}"),
    ("\u{0E05}", "\u{0E04}"),
];

/// Apply every clean-up pass in order.
pub fn normalize(raw: &str) -> String {
    let text = unify_line_endings(raw);
    let text = strip_box_glyphs(&text);
    let text = strip_separator_rules(&text);
    let text = collapse_blank_lines(&text);
    let text = text.trim().to_string();
    let text = collapse_inline_space(&text);
    let text = rejoin_thousands(&text);
    let text = merge_quantity_lines(&text);
    fix_ocr_glyphs(&text)
}

/// CRLF and lone CR become LF so the line-oriented passes see every break.
fn unify_line_endings(text: &str) -> String {
    text.replace("\r\n", "\n").replace('\r', "\n")
}

fn strip_box_glyphs(text: &str) -> String {
    re_box_glyphs().replace_all(text, " ").into_owned()
}

fn strip_separator_rules(text: &str) -> String {
    re_separator_rule().replace_all(text, "").into_owned()
}

fn collapse_blank_lines(text: &str) -> String {
    re_blank_lines().replace_all(text, "\n\n").into_owned()
}

/// Horizontal whitespace only; line breaks carry structure.
fn collapse_inline_space(text: &str) -> String {
    re_inline_space().replace_all(text, " ").into_owned()
}

/// `"1, 000"` → `"1000"`. Repeated until stable so that every group of a
/// multi-group number is joined. A group that opens a `<n>@<price>`
/// annotation belongs to the annotation, not to the number before it.
fn rejoin_thousands(text: &str) -> String {
    let mut current = text.to_string();
    loop {
        let next = re_thousands()
            .replace_all(&current, |c: &Captures| {
                if c.get(3).is_some() {
                    c[0].to_string()
                } else {
                    format!("{}{}{}", &c[1], &c[2], &c[4])
                }
            })
            .into_owned();
        if next == current {
            return current;
        }
        current = next;
    }
}

/// Fold `2@15.00`-style lines into the product line printed above them.
fn merge_quantity_lines(text: &str) -> String {
    let mut out: Vec<String> = Vec::new();
    for line in text.split('\n') {
        if re_qty_annotation().is_match(line) {
            if let Some(prev) = out.last_mut().filter(|p| !p.trim().is_empty()) {
                let joined = format!("{} {}", prev.trim_end(), line.trim());
                *prev = joined;
                continue;
            }
        }
        out.push(line.to_string());
    }
    out.join("\n")
}

fn fix_ocr_glyphs(text: &str) -> String {
    OCR_SUBSTITUTIONS
        .iter()
        .fold(text.to_string(), |acc, (from, to)| acc.replace(from, to))
}
