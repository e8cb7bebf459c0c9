//! Provider catalog trait

use async_trait::async_trait;

use crate::error::TunnelError;
use crate::profile::ProviderServer;

/// Criteria to narrow down the servers of a provider
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServerFilters {
    pub category: Option<String>,
    pub preset_id: Option<String>,
    pub country_code: Option<String>,
    pub area: Option<String>,
    pub server_ids: Vec<String>,
}

/// Remote catalog of providers and their servers
#[async_trait]
pub trait CatalogService: Send + Sync {
    /// Refresh the provider index
    async fn fetch_index(&self) -> Result<(), TunnelError>;

    /// Servers of a provider matching the filters
    async fn servers(
        &self,
        provider_id: &str,
        filters: &ServerFilters,
    ) -> Result<Vec<ProviderServer>, TunnelError>;
}
