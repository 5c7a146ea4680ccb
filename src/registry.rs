//! Set of configured providers, fixed for the process lifetime

use std::collections::BTreeMap;
use std::sync::Arc;
use log::{error, info, warn};

use crate::config::OrchestratorConfig;
use crate::providers::{OpenAiCompatProvider, Provider};
use crate::ProviderId;

/// Registered providers, iterated in fixed priority order
#[derive(Clone, Default)]
pub struct ProviderRegistry
{   providers: BTreeMap<ProviderId, Arc<dyn Provider>>
}

impl ProviderRegistry
{   /// Register the given providers; a later duplicate role is dropped
    pub fn new(providers: Vec<Arc<dyn Provider>>) -> Self
    {   let mut map: BTreeMap<ProviderId, Arc<dyn Provider>> = BTreeMap::new();
        for provider in providers
        {   let id = provider.id();
            if map.contains_key(&id)
            {   warn!("{} registered twice, keeping the first", id);
                continue;
            }
            map.insert(id, provider);
        }
        ProviderRegistry { providers: map }
    }

    /// Build adapters for every configured role. A role whose adapter
    /// cannot be built is logged and omitted.
    pub fn from_config(config: &OrchestratorConfig) -> Self
    {   let http_client = reqwest::Client::new();
        let mut providers: Vec<Arc<dyn Provider>> = Vec::new();

        for provider_config in &config.providers
        {   match OpenAiCompatProvider::new(
              provider_config
            , config.request_timeout()
            , config.probe_timeout()
            , http_client.clone()
            )
            {   Ok(p) => providers.push(Arc::new(p))
              , Err(e) => {
                  error!("failed to initialize {}: {}", provider_config.id, e);
                }
            }
        }

        let registry = ProviderRegistry::new(providers);
        if registry.is_empty()
        {   warn!("no generation providers initialized, check credentials");
        } else
        {   info!("registered providers: {:?}", registry.ids());
        }
        registry
    }

    pub fn get(&self, id: ProviderId) -> Option<&Arc<dyn Provider>>
    {   self.providers.get(&id)
    }

    pub fn contains(&self, id: ProviderId) -> bool
    {   self.providers.contains_key(&id)
    }

    /// Registered ids in priority order
    pub fn ids(&self) -> Vec<ProviderId>
    {   self.providers.keys().copied().collect()
    }

    pub fn iter(&self)
      -> impl Iterator<Item = (ProviderId, &Arc<dyn Provider>)>
    {   self.providers.iter().map(|(id, p)| (*id, p))
    }

    pub fn len(&self) -> usize
    {   self.providers.len()
    }

    pub fn is_empty(&self) -> bool
    {   self.providers.is_empty()
    }
}

#[cfg(test)]
mod tests
{   use super::*;
    use crate::config::ProviderConfig;

    #[test]
    fn from_config_registers_in_priority_order()
    {   let mut config = OrchestratorConfig::default();
        for id in [ProviderId::ReliableTier, ProviderId::FastTier]
        {   config.providers.push(
              ProviderConfig::for_role(id, vec!["key".into()])
            );
        }
        let registry = ProviderRegistry::from_config(&config);
        assert_eq!(
          registry.ids()
        , vec![ProviderId::FastTier, ProviderId::ReliableTier]
        );
        assert!(!registry.contains(ProviderId::CapableTier));
        assert_eq!(
          registry.get(ProviderId::ReliableTier).unwrap().model()
        , "meta/llama-3.1-70b-instruct"
        );
    }

    #[test]
    fn role_without_keys_is_omitted()
    {   let mut config = OrchestratorConfig::default();
        config.providers.push(
          ProviderConfig::for_role(ProviderId::CapableTier, vec![])
        );
        let registry = ProviderRegistry::from_config(&config);
        assert!(registry.is_empty());
        assert!(registry.get(ProviderId::CapableTier).is_none());
    }
}
