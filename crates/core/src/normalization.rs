use once_cell::sync::Lazy;
use regex::Regex;

static ARABIC_MARKS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"[\x{0610}-\x{061A}\x{0640}\x{064B}-\x{065F}\x{0670}\x{06D6}-\x{06ED}]").unwrap()
});

pub fn is_arabic_char(ch: char) -> bool {
    ('\u{0600}'..='\u{06FF}').contains(&ch)
}

pub fn contains_arabic(text: &str) -> bool {
    text.chars().any(is_arabic_char)
}

/// Strips harakat and tatweel and folds letter variants the corpus spells
/// inconsistently.
pub fn normalize_arabic(text: &str) -> String {
    let stripped = ARABIC_MARKS.replace_all(text, "");
    stripped
        .chars()
        .map(|ch| match ch {
            'أ' | 'إ' | 'آ' => 'ا',
            'ى' => 'ي',
            'ة' => 'ه',
            other => other,
        })
        .collect()
}

/// Query variants in search order: the raw query, then the normalized form
/// when the query has any Arabic-block character.
pub fn expand_query(query: &str) -> Vec<String> {
    let mut variants = vec![query.to_string()];
    if contains_arabic(query) {
        variants.push(normalize_arabic(query));
    }
    variants
}

/// Key used for text-level dedup.
pub fn dedup_key(text: &str) -> String {
    text.trim().to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_harakat_and_tatweel() {
        assert_eq!(normalize_arabic("مُبَادَرَة"), "مبادره");
        assert_eq!(normalize_arabic("ابتـــكار"), "ابتكار");
    }

    #[test]
    fn folds_letter_variants() {
        assert_eq!(normalize_arabic("أإآ"), "ااا");
        assert_eq!(normalize_arabic("على"), "علي");
        assert_eq!(normalize_arabic("مبادرة"), "مبادره");
    }

    #[test]
    fn leaves_latin_text_alone() {
        assert_eq!(normalize_arabic("Ibtikar 2022"), "Ibtikar 2022");
    }

    #[test]
    fn expands_only_arabic_queries() {
        assert_eq!(expand_query("When was Ibtikar founded?").len(), 1);
        let variants = expand_query("متى تأسست ابتكار؟");
        assert_eq!(variants.len(), 2);
        assert_eq!(variants[0], "متى تأسست ابتكار؟");
        assert_eq!(variants[1], "متي تاسست ابتكار؟");
    }

    #[test]
    fn arabic_punctuation_counts_as_arabic_block() {
        assert!(contains_arabic("what\u{061F}"));
        assert!(!contains_arabic("plain ascii?"));
    }

    #[test]
    fn dedup_key_trims_and_folds_case() {
        assert_eq!(dedup_key("  Ibtikar Was Founded \n"), "ibtikar was founded");
    }
}
