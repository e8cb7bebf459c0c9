//! Default profile processor
//!
//! Runs right before a profile reaches the tunnel engine: verifies feature
//! eligibility, applies the provider server heuristic and rejects provider
//! modules without a resolved server.

use std::sync::Arc;

use async_trait::async_trait;
use rand::seq::SliceRandom;

use tw_core::profile::{
    Module, ModuleKind, Profile, ProviderEntity, ProviderHeuristic, ProviderModule, ProviderServer,
};
use tw_core::traits::{CatalogService, FeatureVerifier, ProfileProcessor, ServerFilters};
use tw_core::TunnelError;

/// Processor used by the app unless one is injected
pub struct DefaultProfileProcessor {
    catalog: Arc<dyn CatalogService>,
    verifier: Option<Arc<dyn FeatureVerifier>>,
}

impl DefaultProfileProcessor {
    pub fn new(catalog: Arc<dyn CatalogService>) -> Self {
        Self {
            catalog,
            verifier: None,
        }
    }

    /// Verify feature eligibility before installing
    pub fn with_verifier(mut self, verifier: Arc<dyn FeatureVerifier>) -> Self {
        self.verifier = Some(verifier);
        self
    }

    /// Pick a new server for the provider module according to its heuristic.
    ///
    /// Returns `None` when the profile has no heuristic or no other server
    /// matches.
    async fn apply_heuristic(&self, profile: &Profile) -> Result<Option<Profile>, TunnelError> {
        let Some((module_id, provider)) = profile.active_provider_module() else {
            return Ok(None);
        };
        let Some(entity) = &provider.entity else {
            return Ok(None);
        };
        let Some(heuristic) = &entity.heuristic else {
            return Ok(None);
        };

        let filters = heuristic_filters(heuristic, entity);
        let servers = self
            .catalog
            .servers(&provider.provider_id, &filters)
            .await?;

        let candidates: Vec<&ProviderServer> = servers
            .iter()
            .filter(|server| server.server_id != entity.server.server_id)
            .collect();
        let Some(server) = candidates.choose(&mut rand::thread_rng()) else {
            tracing::debug!(
                "No other server matches the heuristic of {}, keeping {}",
                profile.name,
                entity.server.server_id
            );
            return Ok(None);
        };

        tracing::info!(
            "Heuristic picked server {} for {} (was {})",
            server.server_id,
            profile.name,
            entity.server.server_id
        );
        let module = Module {
            id: *module_id,
            kind: ModuleKind::Provider(ProviderModule {
                entity: Some(ProviderEntity {
                    server: (*server).clone(),
                    ..entity.clone()
                }),
                ..provider.clone()
            }),
        };
        Ok(Some(profile.clone().saving_module(module)))
    }
}

fn heuristic_filters(heuristic: &ProviderHeuristic, entity: &ProviderEntity) -> ServerFilters {
    let filters = ServerFilters {
        category: entity.server.category.clone(),
        preset_id: Some(entity.preset_id.clone()),
        ..Default::default()
    };
    match heuristic {
        ProviderHeuristic::Exact { server_id } => ServerFilters {
            server_ids: vec![server_id.clone()],
            ..filters
        },
        ProviderHeuristic::SameCountry { country_code } => ServerFilters {
            country_code: Some(country_code.clone()),
            ..filters
        },
        ProviderHeuristic::SameRegion { country_code, area } => ServerFilters {
            country_code: Some(country_code.clone()),
            area: area.clone(),
            ..filters
        },
    }
}

#[async_trait]
impl ProfileProcessor for DefaultProfileProcessor {
    async fn will_install(&self, profile: &Profile) -> Result<Profile, TunnelError> {
        if let Some(verifier) = &self.verifier {
            verifier.verify(profile)?;
        }

        let profile = match self.apply_heuristic(profile).await {
            Ok(Some(rewritten)) => rewritten,
            Ok(None) => profile.clone(),
            Err(e) => {
                tracing::error!("Unable to apply server heuristic to {}: {}", profile.name, e);
                profile.clone()
            }
        };

        if let Some((module_id, provider)) = profile.active_provider_module() {
            if provider.entity.is_none() {
                return Err(TunnelError::MissingProviderEntity {
                    module_id: *module_id,
                });
            }
        }
        Ok(profile)
    }

    fn title(&self, profile: &Profile) -> String {
        profile.name.clone()
    }
}
