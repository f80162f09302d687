// File: botlytics-common/src/models/attribution.rs

use serde::{Deserialize, Serialize};
use crate::models::property::{Properties, PropertyValue};

pub const UTM_SOURCE: &str = "utm_source";
pub const UTM_MEDIUM: &str = "utm_medium";
pub const UTM_CAMPAIGN: &str = "utm_campaign";
pub const UTM_TERM: &str = "utm_term";
pub const UTM_CONTENT: &str = "utm_content";

/// Convenience alias written next to the UTM keys; equals `utm_source`.
pub const SOURCE: &str = "source";

/// Campaign tags decoded from a session-start deep link.
///
/// `source`, `medium` and `campaign` are always present together; a value of
/// this type is never partially filled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CampaignAttribution {
    pub source: String,
    pub medium: String,
    pub campaign: String,
    pub term: Option<String>,
    pub content: Option<String>,
}

impl CampaignAttribution {
    /// Renders the attribution back into the deep-link payload format
    /// (`utm_source-S_utm_medium-M_utm_campaign-C[_utm_term-T][_utm_content-X]`).
    pub fn to_payload(&self) -> String {
        let mut parts = vec![
            format!("{}-{}", UTM_SOURCE, self.source),
            format!("{}-{}", UTM_MEDIUM, self.medium),
            format!("{}-{}", UTM_CAMPAIGN, self.campaign),
        ];
        if let Some(term) = &self.term {
            parts.push(format!("{}-{}", UTM_TERM, term));
        }
        if let Some(content) = &self.content {
            parts.push(format!("{}-{}", UTM_CONTENT, content));
        }
        parts.join("_")
    }

    /// Writes the flat attribution keys into `props`, overwriting any
    /// client-supplied values under the same keys.
    pub fn merge_into(&self, props: &mut Properties) {
        props.insert(SOURCE.into(), PropertyValue::from(self.source.clone()));
        props.insert(UTM_SOURCE.into(), PropertyValue::from(self.source.clone()));
        props.insert(UTM_MEDIUM.into(), PropertyValue::from(self.medium.clone()));
        props.insert(UTM_CAMPAIGN.into(), PropertyValue::from(self.campaign.clone()));
        if let Some(term) = &self.term {
            props.insert(UTM_TERM.into(), PropertyValue::from(term.clone()));
        }
        if let Some(content) = &self.content {
            props.insert(UTM_CONTENT.into(), PropertyValue::from(content.clone()));
        }
    }
}
