//! Model tier selection: complexity scoring plus the fallback cascade.
//! The caller's requested tier caps the resolved tier; the cascade only
//! ever degrades to an equal-or-cheaper loaded tier, never escalates.

use crate::engine::registry::TierRegistry;
use crate::error::DispatchError;
use crate::task::TierName;

/// Word-count ceiling for length normalization.
const LENGTH_CEILING_WORDS: f32 = 50.0;
/// Words-per-sentence ceiling for the readability heuristic.
const SENTENCE_CEILING_WORDS: f32 = 25.0;
/// A word at or above this length counts as "long" for readability.
const LONG_WORD_CHARS: usize = 7;

const WEIGHT_LENGTH: f32 = 0.4;
const WEIGHT_READABILITY: f32 = 0.4;
const WEIGHT_SPECIAL: f32 = 0.2;

/// Breakdown of a complexity analysis, all components in 0..=1.
#[derive(Debug, Clone, Copy)]
pub struct ComplexityScore {
    pub length: f32,
    pub readability: f32,
    pub special: f32,
    pub total: f32,
}

/// Score the input text. The readability component is tuned for
/// Latin-script text and is best-effort for other scripts.
pub fn complexity(text: &str) -> ComplexityScore {
    let words: Vec<&str> = text.split_whitespace().collect();
    let word_count = words.len();

    let length = (word_count as f32 / LENGTH_CEILING_WORDS).min(1.0);

    let readability = if word_count == 0 {
        0.0
    } else {
        let sentences = text
            .split(['.', '!', '?'])
            .filter(|s| !s.trim().is_empty())
            .count()
            .max(1);
        let words_per_sentence = word_count as f32 / sentences as f32;
        let sentence_score = (words_per_sentence / SENTENCE_CEILING_WORDS).min(1.0);

        let long_words = words
            .iter()
            .filter(|w| w.chars().count() >= LONG_WORD_CHARS)
            .count();
        let long_ratio = long_words as f32 / word_count as f32;

        0.5 * sentence_score + 0.5 * long_ratio
    };

    let total_chars = text.chars().count();
    let special = if total_chars == 0 {
        0.0
    } else {
        let special_chars = text
            .chars()
            .filter(|c| !c.is_alphanumeric() && !c.is_whitespace())
            .count();
        (special_chars as f32 / total_chars as f32).min(1.0)
    };

    let total = WEIGHT_LENGTH * length + WEIGHT_READABILITY * readability + WEIGHT_SPECIAL * special;

    ComplexityScore {
        length,
        readability,
        special,
        total,
    }
}

/// Map a complexity score onto a tier.
pub fn tier_for_score(score: f32) -> TierName {
    if score < 0.3 {
        TierName::Basic
    } else if score <= 0.7 {
        TierName::Medium
    } else {
        TierName::Premium
    }
}

/// Resolve the tier for one translation: complexity proposes, the request
/// caps, and the cascade lands on a loaded tier. Preference order: the
/// resolution and everything cheaper, then the remaining tiers up to the
/// requested cap — the result never costs more than the caller asked for.
/// No loaded tier at or below the cap is UNAVAILABLE.
pub fn select(
    text: &str,
    requested: TierName,
    registry: &TierRegistry,
) -> Result<TierName, DispatchError> {
    let proposed = tier_for_score(complexity(text).total);
    let resolved = if proposed.rank() < requested.rank() {
        proposed
    } else {
        requested
    };

    let downward = |from: TierName| {
        let mut candidate = Some(from);
        while let Some(tier) = candidate {
            if registry.is_loaded(tier) {
                return Some(tier);
            }
            candidate = tier.cheaper();
        }
        None
    };

    downward(resolved)
        .or_else(|| downward(requested))
        .ok_or(DispatchError::NoTierLoaded)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TierConfig;
    use crate::engine::LoadState;

    fn registry_with(loaded: &[TierName]) -> TierRegistry {
        let registry = TierRegistry::new(&TierConfig::default_table());
        for &tier in loaded {
            registry.mark(tier, LoadState::Ready);
        }
        registry
    }

    #[test]
    fn score_components_stay_in_unit_range() {
        let long = "word ".repeat(500);
        for text in [
            "",
            "hi",
            "Hello world",
            long.as_str(),
            "@#$%^&*!!!",
            "Une phrase relativement longue avec des mots considérablement polysyllabiques.",
        ] {
            let score = complexity(text);
            for value in [score.length, score.readability, score.special, score.total] {
                assert!((0.0..=1.0).contains(&value), "{value} out of range for {text:?}");
            }
        }
    }

    #[test]
    fn short_simple_text_scores_basic() {
        let score = complexity("Hello world").total;
        assert_eq!(tier_for_score(score), TierName::Basic);
    }

    #[test]
    fn long_dense_text_scores_above_basic() {
        let text = "Notwithstanding considerable meteorological uncertainty, atmospheric \
                    circumstances yesterday demonstrated extraordinarily complicated \
                    phenomena, persistently overwhelming conventional forecasting \
                    methodologies throughout overlapping continental territories"
            .repeat(2);
        let score = complexity(&text).total;
        assert!(score > 0.3, "score was {score}");
        assert_ne!(tier_for_score(score), TierName::Basic);
    }

    #[test]
    fn mapping_thresholds() {
        assert_eq!(tier_for_score(0.0), TierName::Basic);
        assert_eq!(tier_for_score(0.29), TierName::Basic);
        assert_eq!(tier_for_score(0.3), TierName::Medium);
        assert_eq!(tier_for_score(0.7), TierName::Medium);
        assert_eq!(tier_for_score(0.71), TierName::Premium);
    }

    #[test]
    fn cascade_degrades_to_loaded_tier() {
        let registry = registry_with(&[TierName::Basic]);
        let resolved = select("Hello world", TierName::Premium, &registry).expect("resolves");
        assert_eq!(resolved, TierName::Basic);
    }

    #[test]
    fn cascade_never_escalates_past_request() {
        let registry = registry_with(&[TierName::Basic, TierName::Medium, TierName::Premium]);
        // Complex enough text would propose a higher tier, but the request caps it.
        let text = "Incomprehensibly sophisticated grammatical constructions notwithstanding, \
                    translation quality expectations remain fundamentally unchanged!";
        let resolved = select(text, TierName::Basic, &registry).expect("resolves");
        assert_eq!(resolved, TierName::Basic);
    }

    #[test]
    fn no_loaded_tier_is_unavailable() {
        let registry = registry_with(&[]);
        let err = select("Hello", TierName::Premium, &registry).unwrap_err();
        assert!(matches!(err, DispatchError::NoTierLoaded));
    }

    #[test]
    fn requested_tier_serves_when_proposal_is_unloaded() {
        // Trivial text proposes basic, but only the requested medium tier
        // is loaded; medium serves rather than erroring.
        let registry = registry_with(&[TierName::Medium]);
        let resolved = select("Hi there", TierName::Medium, &registry).expect("resolves");
        assert_eq!(resolved, TierName::Medium);
    }

    #[test]
    fn loaded_tier_above_request_never_serves() {
        let registry = registry_with(&[TierName::Premium]);
        let err = select("Hi there", TierName::Basic, &registry).unwrap_err();
        assert!(matches!(err, DispatchError::NoTierLoaded));
    }

    #[test]
    fn request_caps_complexity_proposal() {
        let registry = registry_with(&[TierName::Basic, TierName::Medium, TierName::Premium]);
        // Trivial text proposes basic even when premium is requested.
        let resolved = select("Hi there", TierName::Premium, &registry).expect("resolves");
        assert_eq!(resolved, TierName::Basic);
    }
}
