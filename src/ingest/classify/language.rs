//! Language predicate used by the message filter.

/// A language verdict with its confidence in `0.0..=1.0`.
#[derive(Debug, Clone, PartialEq)]
pub struct LanguageGuess {
    pub label: String,
    pub confidence: f32,
}

/// Guesses the language of a filename or title. `None` means unknown.
pub trait LanguageDetector: Send + Sync {
    fn detect(&self, text: &str) -> Option<LanguageGuess>;
}

/// Labels text by its dominant Unicode script.
///
/// Confidence is the share of alphabetic characters belonging to the winning
/// script. Latin script is reported as `en`.
pub struct ScriptDetector;

impl ScriptDetector {
    fn script_of(c: char) -> Option<&'static str> {
        match c as u32 {
            0x3040..=0x30FF => Some("ja"),
            0xAC00..=0xD7AF | 0x1100..=0x11FF => Some("ko"),
            0x4E00..=0x9FFF | 0x3400..=0x4DBF => Some("zh"),
            0x0400..=0x04FF => Some("ru"),
            0x0600..=0x06FF => Some("ar"),
            0x0E00..=0x0E7F => Some("th"),
            _ if c.is_ascii_alphabetic() => Some("en"),
            _ => None,
        }
    }
}

impl LanguageDetector for ScriptDetector {
    fn detect(&self, text: &str) -> Option<LanguageGuess> {
        let mut counts: Vec<(&'static str, usize)> = Vec::new();
        let mut total = 0usize;
        for c in text.chars().filter(|c| c.is_alphabetic()) {
            total += 1;
            if let Some(script) = Self::script_of(c) {
                match counts.iter_mut().find(|(s, _)| *s == script) {
                    Some((_, n)) => *n += 1,
                    None => counts.push((script, 1)),
                }
            }
        }

        // Kana mixed with kanji is Japanese, not Chinese.
        let kana = counts.iter().find(|(s, _)| *s == "ja").map(|(_, n)| *n);
        if let Some(kana) = kana
            && let Some(han) = counts.iter().position(|(s, _)| *s == "zh")
        {
            let han_count = counts.remove(han).1;
            if let Some(ja) = counts.iter_mut().find(|(s, _)| *s == "ja") {
                ja.1 = kana + han_count;
            }
        }

        let (label, count) = counts.into_iter().max_by_key(|(_, n)| *n)?;
        Some(LanguageGuess {
            label: label.to_string(),
            confidence: count as f32 / total as f32,
        })
    }
}
