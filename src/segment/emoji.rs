//! Emoji placeholder protection.
//! Pictograph runs are replaced with `<<EM{n}>>` tokens before translation
//! and substituted back afterwards. Each placeholder records where in its
//! line it occurred so that a token the engine swallowed can be reinserted
//! at a consistent position instead of being lost.

use regex::Regex;

/// Where a placeholder originally sat, relative to its line.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PositionClass {
    /// Very start of the whole text.
    Start,
    /// Very end of the whole text.
    End,
    /// First thing on its line.
    LineStart,
    /// Last thing on its line.
    LineEnd,
    /// Mid-line, at this fraction of the line's characters.
    Middle(f32),
}

/// An extracted pictograph run.
#[derive(Debug, Clone)]
pub struct EmojiPlaceholder {
    pub index: usize,
    pub glyphs: String,
    pub position: PositionClass,
    pub token: String,
}

fn token_for(index: usize) -> String {
    format!("<<EM{index}>>")
}

/// Extracts emoji/pictograph runs and restores or repairs them after
/// translation.
pub struct EmojiExtractor {
    pattern: Regex,
}

impl Default for EmojiExtractor {
    fn default() -> Self {
        Self::new()
    }
}

impl EmojiExtractor {
    pub fn new() -> Self {
        // A run starts with a pictograph and may continue through variation
        // selectors, zero-width joiners, keycap combiners, and skin tones.
        // Flag emoji are regional-indicator pairs, matched separately.
        let pattern = Regex::new(
            r"(?:\p{Extended_Pictographic}(?:[\p{Extended_Pictographic}\x{FE0F}\x{200D}\x{20E3}\x{1F3FB}-\x{1F3FF}])*|[\x{1F1E6}-\x{1F1FF}]{2})",
        )
        .expect("emoji pattern is valid");
        Self { pattern }
    }

    pub fn contains_emoji(&self, text: &str) -> bool {
        self.pattern.is_match(text)
    }

    /// Replace each pictograph run with a unique token, recording its
    /// position class. Returns the tokenized text and the placeholders in
    /// extraction order.
    pub fn extract(&self, text: &str) -> (String, Vec<EmojiPlaceholder>) {
        let mut placeholders = Vec::new();
        let mut out = String::with_capacity(text.len());
        let mut last_end = 0;

        for m in self.pattern.find_iter(text) {
            let index = placeholders.len();
            let token = token_for(index);
            out.push_str(&text[last_end..m.start()]);
            out.push_str(&token);
            placeholders.push(EmojiPlaceholder {
                index,
                glyphs: m.as_str().to_string(),
                position: classify_position(text, m.start(), m.end()),
                token,
            });
            last_end = m.end();
        }
        out.push_str(&text[last_end..]);

        (out, placeholders)
    }

    /// Substitute tokens back to their original glyphs.
    pub fn restore(&self, text: &str, placeholders: &[EmojiPlaceholder]) -> String {
        let mut result = text.to_string();
        for ph in placeholders {
            result = result.replace(&ph.token, &ph.glyphs);
        }
        result
    }
}

/// Determine the position class of a match at `start..end` in `text`.
fn classify_position(text: &str, start: usize, end: usize) -> PositionClass {
    if start == 0 {
        return PositionClass::Start;
    }
    if end == text.len() {
        return PositionClass::End;
    }

    let line_start = text[..start].rfind('\n').map(|i| i + 1).unwrap_or(0);
    let line_end = text[end..]
        .find('\n')
        .map(|i| end + i)
        .unwrap_or(text.len());

    if text[line_start..start].trim().is_empty() && start > line_start {
        // Only whitespace before it on the line: treat as line start.
        return PositionClass::LineStart;
    }
    if start == line_start {
        return PositionClass::LineStart;
    }
    if end == line_end || text[end..line_end].trim().is_empty() {
        return PositionClass::LineEnd;
    }

    let line_chars = text[line_start..line_end].chars().count().max(1);
    let offset_chars = text[line_start..start].chars().count();
    PositionClass::Middle(offset_chars as f32 / line_chars as f32)
}

/// Ensure every placeholder whose token the engine lost reappears in the
/// translated text, at a position consistent with its recorded class.
/// Returns the repaired text and how many tokens were reinserted.
pub fn repair_missing(translated: &str, placeholders: &[EmojiPlaceholder]) -> (String, usize) {
    let mut result = translated.to_string();
    let mut repaired = 0;

    for ph in placeholders {
        if result.contains(&ph.token) {
            continue;
        }
        result = insert_at_class(&result, &ph.token, ph.position);
        repaired += 1;
    }

    (result, repaired)
}

fn insert_at_class(text: &str, token: &str, position: PositionClass) -> String {
    match position {
        PositionClass::Start => format!("{token}{text}"),
        PositionClass::End => format!("{text}{token}"),
        PositionClass::LineStart => match text.find('\n') {
            // After the first line break; with none, the text start.
            Some(i) => format!("{}{}{}", &text[..i + 1], token, &text[i + 1..]),
            None => format!("{token}{text}"),
        },
        PositionClass::LineEnd => match text.rfind('\n') {
            // Before the last line break; with none, the text end.
            Some(i) => format!("{}{}{}", &text[..i], token, &text[i..]),
            None => format!("{text}{token}"),
        },
        PositionClass::Middle(ratio) => {
            let total_chars = text.chars().count();
            let target = (ratio * total_chars as f32).round() as usize;
            let byte = text
                .char_indices()
                .nth(target)
                .map(|(i, _)| i)
                .unwrap_or(text.len());
            let byte = past_token_interior(text, byte);
            format!("{}{}{}", &text[..byte], token, &text[byte..])
        }
    }
}

/// If `byte` falls inside a surviving `<<EMn>>` token, move it past that
/// token so the insertion cannot corrupt it.
fn past_token_interior(text: &str, byte: usize) -> usize {
    let mut search = 0;
    while let Some(found) = text[search..].find("<<EM") {
        let start = search + found;
        let Some(end_rel) = text[start..].find(">>") else {
            break;
        };
        let end = start + end_rel + 2;
        if byte > start && byte < end {
            return end;
        }
        if end > byte {
            break;
        }
        search = end;
    }
    byte
}
