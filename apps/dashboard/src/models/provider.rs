use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderStatus {
    Connected,
    Inactive,
    Error,
}

const DEFAULT_LOGO_INITIALS: &str = "NA";
const DEFAULT_LOGO_COLOR_CLASS: &str = "bg-slate-500/10 text-slate-400 border-slate-500/20";

/// An LLM provider configured under settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Provider {
    pub id: Uuid,
    pub provider_type: String,
    pub model_name: String,
    pub base_url: Option<String>,
    pub status: ProviderStatus,
    #[serde(default)]
    pub is_active: bool,
    pub latency_ms: Option<u64>,
    pub error_message: Option<String>,
    pub name: Option<String>,
    pub display_name: Option<String>,
    pub logo_initials: Option<String>,
    pub logo_color_class: Option<String>,
}

/// A provider type the backend knows how to talk to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SupportedProvider {
    pub provider_type: String,
    pub provider_name: String,
    pub logo_initials: Option<String>,
    pub logo_color_class: Option<String>,
}

impl Provider {
    fn supported<'a>(&self, supported: &'a [SupportedProvider]) -> Option<&'a SupportedProvider> {
        supported
            .iter()
            .find(|s| s.provider_type == self.provider_type)
    }

    /// Display name, then name, then the supported provider's name, then the raw type.
    pub fn label(&self, supported: &[SupportedProvider]) -> String {
        self.display_name
            .clone()
            .filter(|n| !n.is_empty())
            .or_else(|| self.name.clone().filter(|n| !n.is_empty()))
            .or_else(|| self.supported(supported).map(|s| s.provider_name.clone()))
            .unwrap_or_else(|| self.provider_type.clone())
    }

    pub fn logo_initials(&self, supported: &[SupportedProvider]) -> String {
        self.logo_initials
            .clone()
            .or_else(|| {
                self.supported(supported)
                    .and_then(|s| s.logo_initials.clone())
            })
            .unwrap_or_else(|| DEFAULT_LOGO_INITIALS.to_string())
    }

    pub fn logo_color_class(&self, supported: &[SupportedProvider]) -> String {
        self.logo_color_class
            .clone()
            .or_else(|| {
                self.supported(supported)
                    .and_then(|s| s.logo_color_class.clone())
            })
            .unwrap_or_else(|| DEFAULT_LOGO_COLOR_CLASS.to_string())
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ProviderForm {
    pub provider_type: String,
    pub model_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provider(json: &str) -> Provider {
        serde_json::from_str(json).unwrap()
    }

    fn supported() -> Vec<SupportedProvider> {
        vec![SupportedProvider {
            provider_type: "openai".into(),
            provider_name: "OpenAI".into(),
            logo_initials: Some("OA".into()),
            logo_color_class: None,
        }]
    }

    #[test]
    fn test_label_falls_back_through_supported_list() {
        let bare = provider(
            r#"{"id": "00000000-0000-0000-0000-000000000001", "provider_type": "openai",
                "model_name": "gpt-4o", "status": "connected"}"#,
        );
        assert!(!bare.is_active);
        assert_eq!(bare.label(&supported()), "OpenAI");
        assert_eq!(bare.label(&[]), "openai");
        assert_eq!(bare.logo_initials(&supported()), "OA");
        assert_eq!(bare.logo_initials(&[]), "NA");
        assert_eq!(bare.logo_color_class(&supported()), DEFAULT_LOGO_COLOR_CLASS);
    }

    #[test]
    fn test_display_name_wins() {
        let named = provider(
            r#"{"id": "00000000-0000-0000-0000-000000000002", "provider_type": "openai",
                "model_name": "gpt-4o", "status": "error", "display_name": "Work key",
                "name": "openai-1", "is_active": true, "latency_ms": 120}"#,
        );
        assert_eq!(named.label(&supported()), "Work key");
        assert_eq!(named.latency_ms, Some(120));
        assert!(named.is_active);
    }
}
