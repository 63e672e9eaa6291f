//! Pre-classification message filter.

use std::sync::Arc;

use regex::{Regex, RegexBuilder};

use crate::config::{Config, MediaKind};
use crate::error::ConfigError;
use crate::ingest::classify::language::LanguageDetector;
use crate::source::Message;

/// Outcome of [`MessageFilter::check`].
#[derive(Debug, Clone, PartialEq)]
pub enum FilterVerdict {
    Accepted,
    Rejected(String),
}

/// Rejects messages whose document fails the media allow-list, size
/// bounds, filename exclusions or language predicate.
///
/// Messages without a document pass untouched.
pub struct MessageFilter {
    media_types: Vec<MediaKind>,
    min_size: u64,
    max_size: u64,
    exclude: Vec<Regex>,
    allowed_languages: Vec<String>,
    language_threshold: f32,
    detector: Arc<dyn LanguageDetector>,
}

impl MessageFilter {
    pub fn from_config(
        config: &Config,
        detector: Arc<dyn LanguageDetector>,
    ) -> Result<Self, ConfigError> {
        let exclude = config
            .filters
            .exclude_patterns
            .iter()
            .map(|p| {
                RegexBuilder::new(p)
                    .case_insensitive(true)
                    .build()
                    .map_err(|e| ConfigError::InvalidValue {
                        key: "filters.exclude_patterns".to_string(),
                        message: e.to_string(),
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            media_types: config.media_types.clone(),
            min_size: config.download.min_file_size_bytes(),
            max_size: config.download.max_file_size_bytes(),
            exclude,
            allowed_languages: config
                .filters
                .allowed_languages
                .iter()
                .map(|l| l.to_lowercase())
                .collect(),
            language_threshold: config.filters.language_threshold,
            detector,
        })
    }

    pub fn max_size(&self) -> u64 {
        self.max_size
    }

    pub fn check(&self, message: &Message) -> FilterVerdict {
        let Some(doc) = &message.document else {
            return FilterVerdict::Accepted;
        };

        if !self.media_types.iter().any(|k| k.matches(&doc.mime_type)) {
            return FilterVerdict::Rejected(format!("media type '{}' not allowed", doc.mime_type));
        }
        if doc.size > self.max_size {
            return FilterVerdict::Rejected(format!(
                "size {} exceeds {} bytes",
                doc.size, self.max_size
            ));
        }
        if doc.size < self.min_size {
            return FilterVerdict::Rejected(format!(
                "size {} below {} bytes",
                doc.size, self.min_size
            ));
        }

        let Some(label) = doc.label() else {
            return FilterVerdict::Accepted;
        };
        if let Some(pattern) = self.exclude.iter().find(|re| re.is_match(label)) {
            return FilterVerdict::Rejected(format!(
                "name '{}' matches exclusion '{}'",
                label,
                pattern.as_str()
            ));
        }

        if !self.allowed_languages.is_empty()
            && let Some(guess) = self.detector.detect(label)
            && guess.confidence >= self.language_threshold
            && !self.allowed_languages.contains(&guess.label.to_lowercase())
        {
            return FilterVerdict::Rejected(format!(
                "language '{}' ({:.2}) not allowed",
                guess.label, guess.confidence
            ));
        }

        FilterVerdict::Accepted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::classify::language::{LanguageGuess, ScriptDetector};
    use crate::source::Document;

    struct Fixed(Option<LanguageGuess>);

    impl LanguageDetector for Fixed {
        fn detect(&self, _text: &str) -> Option<LanguageGuess> {
            self.0.clone()
        }
    }

    fn filter_with(config: &Config) -> MessageFilter {
        MessageFilter::from_config(config, Arc::new(ScriptDetector)).unwrap()
    }

    fn doc_msg(mime: &str, size: u64, name: &str) -> Message {
        Message::new(1).with_document(Document {
            mime_type: mime.to_string(),
            size,
            file_name: Some(name.to_string()),
            ..Document::default()
        })
    }

    #[test]
    fn test_text_only_messages_pass() {
        let filter = filter_with(&Config::default());
        assert_eq!(
            filter.check(&Message::new(1).with_text("hi")),
            FilterVerdict::Accepted
        );
    }

    #[test]
    fn test_media_type_allow_list() {
        let mut config = Config::default();
        config.media_types = vec![MediaKind::Audio];
        let filter = filter_with(&config);
        assert_eq!(
            filter.check(&doc_msg("audio/flac", 10, "a.flac")),
            FilterVerdict::Accepted
        );
        assert!(matches!(
            filter.check(&doc_msg("video/mp4", 10, "a.mp4")),
            FilterVerdict::Rejected(_)
        ));
    }

    #[test]
    fn test_size_bounds() {
        let mut config = Config::default();
        config.download.max_file_size_mb = 1;
        config.download.min_file_size_mb = 1;
        let filter = filter_with(&config);
        let exact = 1024 * 1024;
        assert_eq!(
            filter.check(&doc_msg("audio/mpeg", exact, "a.mp3")),
            FilterVerdict::Accepted
        );
        assert!(matches!(
            filter.check(&doc_msg("audio/mpeg", exact + 1, "a.mp3")),
            FilterVerdict::Rejected(r) if r.contains("exceeds")
        ));
        assert!(matches!(
            filter.check(&doc_msg("audio/mpeg", exact - 1, "a.mp3")),
            FilterVerdict::Rejected(r) if r.contains("below")
        ));
    }

    #[test]
    fn test_exclude_patterns_are_case_insensitive() {
        let mut config = Config::default();
        config.filters.exclude_patterns = vec![r"\bsample\b".to_string()];
        let filter = filter_with(&config);
        assert!(matches!(
            filter.check(&doc_msg("video/mp4", 10, "Movie SAMPLE.mp4")),
            FilterVerdict::Rejected(_)
        ));
        assert_eq!(
            filter.check(&doc_msg("video/mp4", 10, "Movie.mp4")),
            FilterVerdict::Accepted
        );
    }

    #[test]
    fn test_language_predicate() {
        let mut config = Config::default();
        config.filters.allowed_languages = vec!["zh".to_string()];
        config.filters.language_threshold = 0.5;

        let confident_ru = MessageFilter::from_config(
            &config,
            Arc::new(Fixed(Some(LanguageGuess {
                label: "ru".to_string(),
                confidence: 0.9,
            }))),
        )
        .unwrap();
        assert!(matches!(
            confident_ru.check(&doc_msg("audio/mpeg", 10, "песня.mp3")),
            FilterVerdict::Rejected(_)
        ));

        let unsure = MessageFilter::from_config(
            &config,
            Arc::new(Fixed(Some(LanguageGuess {
                label: "ru".to_string(),
                confidence: 0.2,
            }))),
        )
        .unwrap();
        assert_eq!(
            unsure.check(&doc_msg("audio/mpeg", 10, "песня.mp3")),
            FilterVerdict::Accepted
        );

        let upper_zh = MessageFilter::from_config(
            &config,
            Arc::new(Fixed(Some(LanguageGuess {
                label: "ZH".to_string(),
                confidence: 0.9,
            }))),
        )
        .unwrap();
        assert_eq!(
            upper_zh.check(&doc_msg("audio/mpeg", 10, "歌曲.mp3")),
            FilterVerdict::Accepted
        );

        let unknown = MessageFilter::from_config(&config, Arc::new(Fixed(None))).unwrap();
        assert_eq!(
            unknown.check(&doc_msg("audio/mpeg", 10, "01.mp3")),
            FilterVerdict::Accepted
        );
    }
}
