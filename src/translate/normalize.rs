//! Language detection for inbound lines.
//! Lines already written in the reader's language need no engine call.

/// Detects the dominant language of `text` using whatlang.
/// Returns an ISO 639-1 code or None if detection is unreliable.
pub fn detect_language(text: &str) -> Option<String> {
    let info = whatlang::detect(text)?;
    if !info.is_reliable() {
        return None;
    }
    Some(lang_to_code(info.lang()).to_string())
}

/// True only when detection is reliable and agrees with `lang` (base code compare,
/// so "en-GB" matches "en").
pub fn is_reliably_in(text: &str, lang: &str) -> bool {
    let base = lang.split(['-', '_']).next().unwrap_or(lang);
    detect_language(text).is_some_and(|code| code.eq_ignore_ascii_case(base))
}

fn lang_to_code(lang: whatlang::Lang) -> &'static str {
    use whatlang::Lang::*;
    match lang {
        Eng => "en",
        Cmn => "zh",
        Jpn => "ja",
        Kor => "ko",
        Fra => "fr",
        Deu => "de",
        Spa => "es",
        Rus => "ru",
        Por => "pt",
        Ita => "it",
        Nld => "nl",
        Pol => "pl",
        Ukr => "uk",
        Tur => "tr",
        Vie => "vi",
        Tha => "th",
        _ => "other",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn long_english_is_detected() {
        let text = "The weather today is absolutely wonderful and I would love to go \
                    outside for a long walk in the park with all of my friends.";
        assert_eq!(detect_language(text).as_deref(), Some("en"));
        assert!(is_reliably_in(text, "en-US"));
        assert!(!is_reliably_in(text, "ja"));
    }

    #[test]
    fn empty_text_is_not_detected() {
        assert_eq!(detect_language(""), None);
        assert!(!is_reliably_in("", "en"));
    }
}
