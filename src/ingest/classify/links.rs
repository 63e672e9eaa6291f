//! Sharing-service link and relay reference recognizers.

use std::collections::HashSet;

use regex::{Regex, RegexBuilder};
use url::Url;

use crate::config::ProviderPattern;
use crate::error::ConfigError;
use crate::ingest::classify::{Recognizer, WorkItem};
use crate::source::{Message, MessageId};

struct CompiledProvider {
    name: String,
    pattern: Regex,
    access_code: Option<Regex>,
    keywords: Vec<String>,
}

fn compile(providers: &[ProviderPattern]) -> Result<Vec<CompiledProvider>, ConfigError> {
    let invalid = |name: &str, e: regex::Error| ConfigError::InvalidValue {
        key: format!("links.providers.{name}"),
        message: e.to_string(),
    };
    providers
        .iter()
        .map(|p| -> Result<CompiledProvider, ConfigError> {
            let pattern = RegexBuilder::new(&p.pattern)
                .case_insensitive(true)
                .build()
                .map_err(|e| invalid(&p.name, e))?;
            let access_code = p
                .access_code_pattern
                .as_deref()
                .map(|c| RegexBuilder::new(c).case_insensitive(true).build())
                .transpose()
                .map_err(|e| invalid(&p.name, e))?;
            Ok(CompiledProvider {
                name: p.name.clone(),
                pattern,
                access_code,
                keywords: p.keywords.iter().map(|k| k.to_lowercase()).collect(),
            })
        })
        .collect()
}

/// Access code carried in the URL query itself.
fn code_in_url(url: &Url) -> Option<String> {
    url.query_pairs()
        .find(|(k, _)| k == "pwd" || k == "password")
        .map(|(_, v)| v.into_owned())
        .filter(|v| !v.is_empty())
}

/// Normalized form used for downstream dedup: no fragment, and the access
/// code appended as `pwd` when it was found outside the URL.
fn canonicalize(raw: &str, code: Option<&str>) -> Option<(String, Option<String>)> {
    let mut url = Url::parse(raw).ok()?;
    url.set_fragment(None);
    if let Some(embedded) = code_in_url(&url) {
        return Some((url.to_string(), Some(embedded)));
    }
    if let Some(code) = code {
        url.query_pairs_mut().append_pair("pwd", code);
    }
    Some((url.to_string(), code.map(str::to_string)))
}

/// Recognizes configured sharing-service links in text and link entities.
pub struct LinkRecognizer {
    providers: Vec<CompiledProvider>,
}

impl LinkRecognizer {
    pub fn new(providers: &[ProviderPattern]) -> Result<Self, ConfigError> {
        Ok(Self {
            providers: compile(providers)?,
        })
    }

    fn scan(&self, message_id: MessageId, text: &str, code_scope: Option<&str>) -> Vec<WorkItem> {
        let mut matches: Vec<_> = self
            .providers
            .iter()
            .flat_map(|provider| provider.pattern.find_iter(text).map(move |m| (provider, m)))
            .collect();
        matches.sort_by_key(|(_, m)| (m.start(), m.end()));

        let mut items = Vec::new();
        for (i, (provider, m)) in matches.iter().enumerate() {
            // The code for a link is looked up between it and the next link
            // of any provider.
            let scope = code_scope.unwrap_or_else(|| {
                let end = matches[i + 1..]
                    .iter()
                    .map(|(_, n)| n.start())
                    .find(|&start| start >= m.end())
                    .unwrap_or(text.len());
                &text[m.end()..end]
            });
            let code = provider
                .access_code
                .as_ref()
                .and_then(|re| re.captures(scope))
                .and_then(|c| c.get(1))
                .map(|c| c.as_str().to_string());
            let Some((canonical_url, access_code)) = canonicalize(m.as_str(), code.as_deref())
            else {
                continue;
            };
            items.push(WorkItem::ExternalLink {
                message_id,
                provider: provider.name.clone(),
                url: m.as_str().to_string(),
                access_code,
                canonical_url,
            });
        }
        items
    }
}

impl Recognizer for LinkRecognizer {
    fn name(&self) -> &str {
        "links"
    }

    fn recognize(&self, message: &Message) -> Vec<WorkItem> {
        let text = message.text.as_deref().unwrap_or_default();
        let mut items = self.scan(message.id, text, None);
        for entity in &message.links {
            items.extend(self.scan(message.id, entity, Some(text)));
        }

        let mut seen = HashSet::new();
        items.retain(|item| match item {
            WorkItem::ExternalLink { canonical_url, .. } => seen.insert(canonical_url.clone()),
            _ => true,
        });
        items
    }
}

/// Recognizes links to other channel messages (`t.me/<name>/<id>`,
/// `t.me/c/<internal>/<id>`) that need a lookup to yield share links.
pub struct RelayRecognizer {
    reference: Regex,
    providers: Vec<CompiledProvider>,
}

impl RelayRecognizer {
    pub fn new(providers: &[ProviderPattern]) -> Result<Self, ConfigError> {
        let reference = Regex::new(
            r"https?://(?:t|telegram)\.me/(?:c/(\d+)|([A-Za-z][A-Za-z0-9_]{3,}))/(\d+)",
        )
        .map_err(|e| ConfigError::InvalidValue {
            key: "relay".to_string(),
            message: e.to_string(),
        })?;
        Ok(Self {
            reference,
            providers: compile(providers)?,
        })
    }

    fn hint(&self, text: &str) -> Option<String> {
        let lowered = text.to_lowercase();
        self.providers
            .iter()
            .find(|p| p.keywords.iter().any(|k| lowered.contains(k.as_str())))
            .map(|p| p.name.clone())
    }
}

impl Recognizer for RelayRecognizer {
    fn name(&self) -> &str {
        "relay"
    }

    fn recognize(&self, message: &Message) -> Vec<WorkItem> {
        let text = message.text.as_deref().unwrap_or_default();
        let provider_hint = self.hint(text);
        let mut seen = HashSet::new();
        let mut items = Vec::new();

        let sources = std::iter::once(text).chain(message.links.iter().map(String::as_str));
        for source in sources {
            for caps in self.reference.captures_iter(source) {
                let target_channel = match (caps.get(1), caps.get(2)) {
                    (Some(internal), _) => format!("-100{}", internal.as_str()),
                    (None, Some(name)) => name.as_str().to_string(),
                    (None, None) => continue,
                };
                let Some(target_message_id) = caps
                    .get(3)
                    .and_then(|m| m.as_str().parse::<MessageId>().ok())
                else {
                    continue;
                };
                if !seen.insert((target_channel.clone(), target_message_id)) {
                    continue;
                }
                items.push(WorkItem::RelayLookup {
                    message_id: message.id,
                    target_channel,
                    target_message_id,
                    provider_hint: provider_hint.clone(),
                });
            }
        }
        items
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn links() -> LinkRecognizer {
        LinkRecognizer::new(&ProviderPattern::defaults()).unwrap()
    }

    fn relay() -> RelayRecognizer {
        RelayRecognizer::new(&ProviderPattern::defaults()).unwrap()
    }

    #[test]
    fn test_link_with_code_in_text() {
        let msg = Message::new(5).with_text("资源 https://pan.baidu.com/s/1AbC_d 提取码: x7k2");
        let items = links().recognize(&msg);
        assert_eq!(
            items,
            vec![WorkItem::ExternalLink {
                message_id: 5,
                provider: "baidu".to_string(),
                url: "https://pan.baidu.com/s/1AbC_d".to_string(),
                access_code: Some("x7k2".to_string()),
                canonical_url: "https://pan.baidu.com/s/1AbC_d?pwd=x7k2".to_string(),
            }]
        );
    }

    #[test]
    fn test_code_embedded_in_url_is_kept() {
        let msg = Message::new(5).with_text("https://pan.baidu.com/s/1xyz?pwd=abcd");
        match &links().recognize(&msg)[..] {
            [WorkItem::ExternalLink {
                access_code,
                canonical_url,
                ..
            }] => {
                assert_eq!(access_code.as_deref(), Some("abcd"));
                assert_eq!(canonical_url, "https://pan.baidu.com/s/1xyz?pwd=abcd");
            }
            other => panic!("expected one link, got {other:?}"),
        }
    }

    #[test]
    fn test_codes_are_scoped_to_their_link() {
        let msg = Message::new(5).with_text(
            "A https://pan.quark.cn/s/aaa code: 1111\nB https://pan.quark.cn/s/bbb code: 2222",
        );
        let codes: Vec<_> = links()
            .recognize(&msg)
            .into_iter()
            .filter_map(|i| match i {
                WorkItem::ExternalLink { access_code, .. } => access_code,
                _ => None,
            })
            .collect();
        assert_eq!(codes, vec!["1111".to_string(), "2222".to_string()]);
    }

    #[test]
    fn test_code_after_next_provider_link_belongs_to_that_link() {
        let msg = Message::new(9).with_text(
            "https://pan.baidu.com/s/1AbC https://pan.quark.cn/s/9f8e7d 提取码: x7k2",
        );
        let found: Vec<_> = links()
            .recognize(&msg)
            .into_iter()
            .filter_map(|i| match i {
                WorkItem::ExternalLink {
                    provider,
                    access_code,
                    canonical_url,
                    ..
                } => Some((provider, access_code, canonical_url)),
                _ => None,
            })
            .collect();
        assert_eq!(
            found,
            vec![
                (
                    "baidu".to_string(),
                    None,
                    "https://pan.baidu.com/s/1AbC".to_string()
                ),
                (
                    "quark".to_string(),
                    Some("x7k2".to_string()),
                    "https://pan.quark.cn/s/9f8e7d?pwd=x7k2".to_string()
                ),
            ]
        );
    }

    #[test]
    fn test_entity_links_are_recognized_and_deduplicated() {
        let msg = Message::new(8)
            .with_text("see https://pan.quark.cn/s/abc")
            .with_link("https://pan.quark.cn/s/abc")
            .with_link("https://www.alipan.com/s/Zz9");
        let items = links().recognize(&msg);
        assert_eq!(items.len(), 2);
    }

    #[test]
    fn test_unmatched_text_is_empty() {
        assert!(links().recognize(&Message::new(1).with_text("https://example.com/s/abc")).is_empty());
    }

    #[test]
    fn test_public_relay_reference() {
        let msg = Message::new(12).with_text("夸克 mirror: https://t.me/music_archive/4521");
        assert_eq!(
            relay().recognize(&msg),
            vec![WorkItem::RelayLookup {
                message_id: 12,
                target_channel: "music_archive".to_string(),
                target_message_id: 4521,
                provider_hint: Some("quark".to_string()),
            }]
        );
    }

    #[test]
    fn test_private_relay_reference() {
        let msg = Message::new(3).with_link("https://t.me/c/1234567/89");
        match &relay().recognize(&msg)[..] {
            [WorkItem::RelayLookup {
                target_channel,
                target_message_id,
                provider_hint,
                ..
            }] => {
                assert_eq!(target_channel, "-1001234567");
                assert_eq!(*target_message_id, 89);
                assert!(provider_hint.is_none());
            }
            other => panic!("expected one relay, got {other:?}"),
        }
    }

    #[test]
    fn test_bad_provider_regex_is_a_config_error() {
        let bad = vec![ProviderPattern {
            name: "broken".to_string(),
            pattern: "(".to_string(),
            access_code_pattern: None,
            keywords: Vec::new(),
        }];
        assert!(LinkRecognizer::new(&bad).is_err());
    }
}
