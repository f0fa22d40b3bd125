use unicode_segmentation::UnicodeSegmentation;

/// Cut `s` down to at most `max` user-perceived characters.
///
/// Thai combining vowels and tone marks stay attached to their base
/// consonant, so the result never ends in a dangling mark.
pub fn truncate_graphemes(s: &str, max: usize) -> String {
    match s.grapheme_indices(true).nth(max) {
        Some((cut, _)) => s[..cut].to_string(),
        None => s.to_string(),
    }
}
