use super::ApiClient;
use crate::errors::ApiError;
use crate::models::provider::{Provider, ProviderForm, SupportedProvider};

pub const PROVIDERS_PATH: &str = "/settings/llm-providers/";
pub const SUPPORTED_PROVIDERS_PATH: &str = "/settings/llm-providers/supported";
/// Also the cache key for the dashboard's active-provider badge.
pub const ACTIVE_PROVIDER_PATH: &str = "/settings/llm-providers/active";

impl ApiClient {
    pub async fn list_providers(&self) -> Result<Vec<Provider>, ApiError> {
        self.get_json(PROVIDERS_PATH).await
    }

    pub async fn list_supported_providers(&self) -> Result<Vec<SupportedProvider>, ApiError> {
        self.get_json(SUPPORTED_PROVIDERS_PATH).await
    }

    pub async fn get_active_provider(&self) -> Result<Provider, ApiError> {
        self.get_json(ACTIVE_PROVIDER_PATH).await
    }

    /// A 409 here means another provider became active concurrently.
    /// Callers should revalidate `PROVIDERS_PATH` and retry rather than resend blindly.
    pub async fn set_active_provider(&self, provider_id: &str) -> Result<Provider, ApiError> {
        self.post_json(
            &format!("{PROVIDERS_PATH}{provider_id}/set-active"),
            &serde_json::json!({}),
        )
        .await
    }

    /// 409 when the provider/model pair already exists.
    pub async fn create_provider(&self, form: &ProviderForm) -> Result<Provider, ApiError> {
        self.post_json(PROVIDERS_PATH, form).await
    }

    pub async fn update_provider(
        &self,
        provider_id: &str,
        form: &ProviderForm,
    ) -> Result<Provider, ApiError> {
        self.patch_json(&format!("{PROVIDERS_PATH}{provider_id}"), form)
            .await
    }

    pub async fn delete_provider(&self, provider_id: &str) -> Result<(), ApiError> {
        self.delete(&format!("{PROVIDERS_PATH}{provider_id}")).await
    }
}
