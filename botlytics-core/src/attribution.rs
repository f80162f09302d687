//! botlytics-core/src/attribution.rs
//!
//! Decodes campaign tags out of a deep-link start payload such as
//! `utm_source-google_utm_medium-cpc_utm_campaign-summer2024`.
//!
//! `_` separates keys, `-` separates a key from its value. Because the keys
//! themselves contain `_`, a key boundary is only recognized where a
//! `utm_<name>-` token begins a `_`-delimited segment; everything between the
//! `-` and the next key boundary is the value (so values may contain both `_`
//! and `-`). Unrecognized `utm_*` keys are skipped.

use std::collections::HashMap;
use thiserror::Error;
use tracing::debug;

use botlytics_common::models::attribution::{
    CampaignAttribution, UTM_CAMPAIGN, UTM_CONTENT, UTM_MEDIUM, UTM_SOURCE, UTM_TERM,
};

const KEY_PREFIX: &str = "utm_";
const RECOGNIZED_KEYS: [&str; 5] = [UTM_SOURCE, UTM_MEDIUM, UTM_CAMPAIGN, UTM_TERM, UTM_CONTENT];
const REQUIRED_KEYS: [&str; 3] = [UTM_SOURCE, UTM_MEDIUM, UTM_CAMPAIGN];

/// Why a payload produced no attribution. Never surfaced to producers.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AttributionParseFailure {
    #[error("start payload is empty")]
    Empty,

    #[error("start payload carries no recognized utm keys")]
    NoRecognizedKeys,

    #[error("incomplete attribution, missing {}", .missing.join(", "))]
    Incomplete { missing: Vec<&'static str> },
}

/// A `utm_<name>-` token found at the start of a segment.
struct KeyToken<'a> {
    start: usize,
    key: &'a str,
    value_start: usize,
}

fn key_tokens(payload: &str) -> Vec<KeyToken<'_>> {
    let bytes = payload.as_bytes();
    let mut tokens = Vec::new();

    for i in 0..bytes.len() {
        if i != 0 && bytes[i - 1] != b'_' {
            continue;
        }
        let rest = &payload[i..];
        if !rest.starts_with(KEY_PREFIX) {
            continue;
        }
        let name_len = rest[KEY_PREFIX.len()..]
            .bytes()
            .take_while(|b| b.is_ascii_alphanumeric())
            .count();
        let key_end = KEY_PREFIX.len() + name_len;
        if name_len == 0 || rest.as_bytes().get(key_end) != Some(&b'-') {
            continue;
        }
        tokens.push(KeyToken {
            start: i,
            key: &rest[..key_end],
            value_start: i + key_end + 1,
        });
    }
    tokens
}

/// Parses a start payload into a complete `CampaignAttribution`.
///
/// Values are lower-cased but otherwise kept verbatim. When a key repeats,
/// the first occurrence wins.
pub fn parse_start_payload(payload: &str) -> Result<CampaignAttribution, AttributionParseFailure> {
    let payload = payload.trim().to_lowercase();
    if payload.is_empty() {
        return Err(AttributionParseFailure::Empty);
    }

    let tokens = key_tokens(&payload);
    let mut fields: HashMap<&'static str, String> = HashMap::new();

    for (idx, token) in tokens.iter().enumerate() {
        let value_end = tokens
            .get(idx + 1)
            .map(|next| (next.start - 1).max(token.value_start))
            .unwrap_or(payload.len());

        let Some(known) = RECOGNIZED_KEYS.iter().find(|k| **k == token.key) else {
            debug!("Ignoring unrecognized attribution key '{}'", token.key);
            continue;
        };

        let value = &payload[token.value_start..value_end];
        if value.is_empty() {
            continue;
        }
        fields.entry(*known).or_insert_with(|| value.to_string());
    }

    if fields.is_empty() {
        return Err(AttributionParseFailure::NoRecognizedKeys);
    }

    let missing: Vec<&'static str> = REQUIRED_KEYS
        .iter()
        .copied()
        .filter(|k| !fields.contains_key(k))
        .collect();
    if !missing.is_empty() {
        return Err(AttributionParseFailure::Incomplete { missing });
    }

    Ok(CampaignAttribution {
        source: fields.remove(UTM_SOURCE).unwrap_or_default(),
        medium: fields.remove(UTM_MEDIUM).unwrap_or_default(),
        campaign: fields.remove(UTM_CAMPAIGN).unwrap_or_default(),
        term: fields.remove(UTM_TERM),
        content: fields.remove(UTM_CONTENT),
    })
}

/// Best-effort variant: any failure degrades to `None` and is only logged.
pub fn attribution_from_payload(payload: Option<&str>) -> Option<CampaignAttribution> {
    match parse_start_payload(payload?) {
        Ok(attr) => Some(attr),
        Err(AttributionParseFailure::Empty) => None,
        Err(e) => {
            debug!("No attribution for start payload {:?}: {}", payload, e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parses_required_fields() {
        let attr = parse_start_payload("utm_source-google_utm_medium-cpc_utm_campaign-summer2024").unwrap();
        assert_eq!(attr.source, "google");
        assert_eq!(attr.medium, "cpc");
        assert_eq!(attr.campaign, "summer2024");
        assert_eq!(attr.term, None);
        assert_eq!(attr.content, None);
    }

    #[test]
    fn test_round_trip_through_payload() {
        let payloads = [
            "utm_source-google_utm_medium-cpc_utm_campaign-summer2024",
            "utm_source-vk_utm_medium-post_utm_campaign-launch-week",
            "utm_source-tg_channel_utm_medium-social_utm_campaign-q3_promo",
            "utm_source-google_utm_medium-cpc_utm_campaign-x_utm_term-decoder_utm_content-banner-a",
        ];
        for payload in payloads {
            let attr = parse_start_payload(payload).unwrap();
            assert_eq!(attr.to_payload(), payload, "round trip of {}", payload);
        }
    }

    #[test]
    fn test_values_are_lower_cased() {
        let attr = parse_start_payload("utm_source-Google_utm_medium-CPC_utm_campaign-Summer2024").unwrap();
        assert_eq!(attr.source, "google");
        assert_eq!(attr.medium, "cpc");
        assert_eq!(attr.campaign, "summer2024");
    }

    #[test]
    fn test_values_keep_odd_characters() {
        let attr = parse_start_payload("utm_source-g.o%og_utm_medium-cpc_utm_campaign-a+b").unwrap();
        assert_eq!(attr.source, "g.o%og");
        assert_eq!(attr.campaign, "a+b");
    }

    #[test]
    fn test_key_order_does_not_matter() {
        let attr = parse_start_payload("utm_campaign-summer_utm_source-google_utm_medium-cpc").unwrap();
        assert_eq!(attr.source, "google");
        assert_eq!(attr.medium, "cpc");
        assert_eq!(attr.campaign, "summer");
    }

    #[test]
    fn test_unrecognized_keys_are_ignored() {
        let attr = parse_start_payload(
            "ref-abc_utm_source-google_utm_id-777_utm_medium-cpc_utm_campaign-summer2024",
        )
        .unwrap();
        assert_eq!(attr.source, "google");
        assert_eq!(attr.medium, "cpc");
        assert_eq!(attr.campaign, "summer2024");
    }

    #[test]
    fn test_partial_attribution_is_rejected() {
        let cases = [
            ("utm_source-google_utm_medium-cpc", vec![UTM_CAMPAIGN]),
            ("utm_medium-cpc_utm_campaign-summer", vec![UTM_SOURCE]),
            ("utm_source-google_utm_campaign-summer", vec![UTM_MEDIUM]),
            ("utm_term-decoder", vec![UTM_SOURCE, UTM_MEDIUM, UTM_CAMPAIGN]),
            ("utm_source-_utm_medium-cpc_utm_campaign-summer", vec![UTM_SOURCE]),
        ];
        for (payload, missing) in cases {
            assert_eq!(
                parse_start_payload(payload),
                Err(AttributionParseFailure::Incomplete { missing }),
                "payload {}",
                payload
            );
            assert_eq!(attribution_from_payload(Some(payload)), None);
        }
    }

    #[test]
    fn test_empty_and_garbage_payloads() {
        assert_eq!(parse_start_payload(""), Err(AttributionParseFailure::Empty));
        assert_eq!(parse_start_payload("   "), Err(AttributionParseFailure::Empty));
        assert_eq!(parse_start_payload("promo42"), Err(AttributionParseFailure::NoRecognizedKeys));
        assert_eq!(parse_start_payload("utm_source"), Err(AttributionParseFailure::NoRecognizedKeys));
        assert_eq!(attribution_from_payload(None), None);
        assert_eq!(attribution_from_payload(Some("promo42")), None);
    }

    #[test]
    fn test_first_occurrence_wins() {
        let attr = parse_start_payload(
            "utm_source-google_utm_source-bing_utm_medium-cpc_utm_campaign-summer",
        )
        .unwrap();
        assert_eq!(attr.source, "google");
    }
}
