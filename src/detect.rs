//! Source-language resolution for tasks submitted with `"auto"`.
//! Detection feeds cache keying and the skip-equal-target rule; unreliable
//! detections keep the literal `auto` so cache keys stay deterministic.

/// Sentinel for caller-side "detect it for me".
pub const AUTO: &str = "auto";

/// Detects the dominant language of `text` using whatlang.
/// Returns an ISO 639-1 code or None if detection is unreliable.
pub fn detect_language(text: &str) -> Option<String> {
    let info = whatlang::detect(text)?;
    if !info.is_reliable() {
        return None;
    }
    Some(lang_to_code(info.lang()).to_string())
}

/// Resolve a task's declared source language: explicit codes pass through,
/// `auto` is replaced with the detected code when detection is reliable.
pub fn resolve_source(declared: &str, text: &str) -> String {
    if declared != AUTO {
        return declared.to_string();
    }
    detect_language(text).unwrap_or_else(|| AUTO.to_string())
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
        Ara => "ar",
        Hin => "hi",
        Tur => "tr",
        Vie => "vi",
        Tha => "th",
        Nld => "nl",
        Pol => "pl",
        Ukr => "uk",
        _ => "other",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_source_passes_through() {
        assert_eq!(resolve_source("en", "Bonjour tout le monde"), "en");
    }

    #[test]
    fn auto_resolves_for_clear_text() {
        let resolved = resolve_source(
            AUTO,
            "The weather service published another detailed forecast this morning, \
             and everyone in the office agreed that the predictions sounded plausible.",
        );
        assert_eq!(resolved, "en");
    }

    #[test]
    fn unreliable_detection_keeps_auto() {
        // Too short and ambiguous for a reliable verdict.
        let resolved = resolve_source(AUTO, "ok");
        assert!(resolved == AUTO || resolved.len() == 2);
    }
}
