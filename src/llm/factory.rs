//! Factory for creating model clients from backend descriptors.

use std::sync::Arc;
use std::time::Duration;

use super::backend::{BackendDescriptor, BackendKind, base_model_name, resolve_endpoint};
use super::ollama::{self, OllamaClient, OllamaSettings, PLACEHOLDER_API_KEY};
use super::ModelClient;
use crate::error::{OracleError, Result};

/// Environment variable naming the default Ollama endpoint.
pub const OLLAMA_ENDPOINT_VAR: &str = "OLLAMA_ENDPOINT";
/// Environment variable that switches the factory into test mode when set to `test`.
pub const MATURITY_VAR: &str = "MATURITY";

/// Process-level inputs to the factory, captured once.
#[derive(Debug, Clone)]
pub struct FactoryEnvironment {
    /// Endpoint used when a descriptor does not name one.
    pub default_endpoint: Option<String>,
    /// Skip all network access and hand out no client.
    pub test_mode: bool,
    /// Bound for the health probe and catalog query.
    pub probe_timeout: Duration,
    /// Bound for each chat request made by built clients.
    pub request_timeout: Duration,
}

impl Default for FactoryEnvironment {
    fn default() -> Self {
        Self {
            default_endpoint: None,
            test_mode: false,
            probe_timeout: Duration::from_secs(5),
            request_timeout: Duration::from_secs(300),
        }
    }
}

impl FactoryEnvironment {
    /// Read `OLLAMA_ENDPOINT` and `MATURITY` from the process environment.
    #[must_use]
    pub fn from_process_env() -> Self {
        Self {
            default_endpoint: std::env::var(OLLAMA_ENDPOINT_VAR)
                .ok()
                .filter(|s| !s.trim().is_empty()),
            test_mode: std::env::var(MATURITY_VAR).is_ok_and(|v| v.eq_ignore_ascii_case("test")),
            ..Self::default()
        }
    }

    /// An environment that never touches the network.
    #[must_use]
    pub fn test() -> Self {
        Self {
            test_mode: true,
            ..Self::default()
        }
    }
}

/// Factory for creating model clients.
#[derive(Debug, Clone)]
pub struct BackendFactory {
    env: FactoryEnvironment,
}

impl BackendFactory {
    #[must_use]
    pub fn new(env: FactoryEnvironment) -> Self {
        Self { env }
    }

    /// The endpoint a descriptor would be served from.
    ///
    /// # Errors
    ///
    /// Returns [`OracleError::UnknownBackend`] for unregistered interfaces.
    pub fn effective_endpoint(&self, descriptor: &BackendDescriptor) -> Result<String> {
        let kind: BackendKind = descriptor.interface.parse()?;
        Ok(resolve_endpoint(
            kind,
            descriptor.endpoint.as_deref(),
            self.env.default_endpoint.as_deref(),
        ))
    }

    /// Create a model client for the descriptor.
    ///
    /// In test mode this returns `Ok(None)` without validating anything or
    /// contacting the network. Otherwise the backend is probed, its catalog
    /// is checked for the model, and a client is built.
    ///
    /// # Errors
    ///
    /// - [`OracleError::UnknownBackend`] for unregistered interfaces
    /// - [`OracleError::EmptyModelName`] when no model is named
    /// - [`OracleError::BackendUnavailable`] when the probe or catalog query fails
    /// - [`OracleError::ModelNotFound`] when the catalog lacks the model
    /// - [`OracleError::ClientInit`] when the client cannot be built
    pub async fn create_client(
        &self,
        descriptor: &BackendDescriptor,
    ) -> Result<Option<Arc<dyn ModelClient>>> {
        tracing::info!(
            interface = %descriptor.interface,
            model = %descriptor.model_name,
            "Model interface requested"
        );

        if self.env.test_mode {
            tracing::info!("Test mode enabled, skipping backend construction");
            return Ok(None);
        }

        let kind: BackendKind = descriptor.interface.parse()?;
        if descriptor.model_name.trim().is_empty() {
            return Err(OracleError::EmptyModelName);
        }

        match kind {
            BackendKind::Ollama => {
                let client = self.build_ollama(descriptor).await?;
                Ok(Some(Arc::new(client)))
            }
        }
    }

    async fn build_ollama(&self, descriptor: &BackendDescriptor) -> Result<OllamaClient> {
        let endpoint = self.effective_endpoint(descriptor)?;
        url::Url::parse(&endpoint).map_err(|source| OracleError::InvalidEndpoint {
            endpoint: endpoint.clone(),
            source,
        })?;

        ollama::probe(&endpoint, self.env.probe_timeout)
            .await
            .map_err(|source| OracleError::BackendUnavailable {
                endpoint: endpoint.clone(),
                source,
            })?;
        tracing::debug!(endpoint = %endpoint, "Backend health check passed");

        let available = ollama::list_models(&endpoint, self.env.probe_timeout)
            .await
            .map_err(|source| OracleError::BackendUnavailable {
                endpoint: ollama::catalog_url(&endpoint),
                source,
            })?;

        let model = resolve_listed_model(descriptor.model_name.trim(), &available)?;
        tracing::debug!(requested = %descriptor.model_name, model = %model, "Model found in catalog");

        OllamaClient::new(OllamaSettings {
            endpoint,
            model,
            api_key: PLACEHOLDER_API_KEY.to_string(),
            temperature: descriptor.temperature,
            options: descriptor.options.clone(),
            request_timeout: self.env.request_timeout,
        })
        .map_err(OracleError::ClientInit)
    }
}

/// Find the catalog entry serving `requested`.
///
/// A tagged name must be listed exactly. An untagged name matches any tag of
/// that model, preferring `:latest`. The returned name is the catalog entry,
/// so the client never asks for a tag the backend has not pulled.
fn resolve_listed_model(requested: &str, available: &[String]) -> Result<String> {
    if let Some(exact) = available.iter().find(|name| name.as_str() == requested) {
        return Ok(exact.clone());
    }

    let untagged = !requested.contains(':');
    let variants: Vec<&String> = available
        .iter()
        .filter(|name| untagged && base_model_name(name) == requested)
        .collect();

    let latest = format!("{requested}:latest");
    let chosen = variants
        .iter()
        .find(|name| name.as_str() == latest)
        .or_else(|| variants.first())
        .map(|name| (*name).clone());

    match chosen {
        Some(name) => {
            if variants.len() > 1 {
                tracing::warn!(
                    requested = %requested,
                    variants = ?variants,
                    chosen = %name,
                    "Multiple tagged variants match the requested model"
                );
            }
            Ok(name)
        }
        None => Err(OracleError::ModelNotFound {
            requested: requested.to_string(),
            available: available.to_vec(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn catalog(names: &[&str]) -> Vec<String> {
        names.iter().map(ToString::to_string).collect()
    }

    #[test]
    fn test_untagged_name_resolves_to_catalog_entry() {
        let available = catalog(&["llama3:8b", "llama3:latest", "mistral_nemo_conservative:q4"]);
        assert_eq!(resolve_listed_model("llama3", &available).unwrap(), "llama3:latest");
        assert_eq!(
            resolve_listed_model("mistral_nemo_conservative", &available).unwrap(),
            "mistral_nemo_conservative:q4"
        );
        assert_eq!(resolve_listed_model("llama3:8b", &available).unwrap(), "llama3:8b");
    }

    #[test]
    fn test_unlisted_tag_is_not_found() {
        let available = catalog(&["llama3:latest"]);
        let err = resolve_listed_model("llama3:8b", &available).unwrap_err();
        assert!(matches!(err, OracleError::ModelNotFound { requested, .. } if requested == "llama3:8b"));
    }

    #[test]
    fn test_model_not_listed() {
        let available = catalog(&["llama3:latest"]);
        let err = resolve_listed_model("phi3", &available).unwrap_err();
        match err {
            OracleError::ModelNotFound {
                requested,
                available,
            } => {
                assert_eq!(requested, "phi3");
                assert_eq!(available, vec!["llama3:latest".to_string()]);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_test_mode_returns_no_client() {
        let factory = BackendFactory::new(FactoryEnvironment::test());
        let descriptor = BackendDescriptor {
            endpoint: Some("unreachable.invalid:1".to_string()),
            ..BackendDescriptor::default()
        };
        let client = factory.create_client(&descriptor).await.unwrap();
        assert!(client.is_none());
    }

    #[tokio::test]
    async fn test_unknown_backend_fails_before_network() {
        let factory = BackendFactory::new(FactoryEnvironment::default());
        let descriptor = BackendDescriptor {
            interface: "ChatAnthropic".to_string(),
            ..BackendDescriptor::default()
        };
        let err = factory.create_client(&descriptor).await.unwrap_err();
        assert!(matches!(err, OracleError::UnknownBackend(_)));
    }

    #[tokio::test]
    async fn test_empty_model_name() {
        let factory = BackendFactory::new(FactoryEnvironment::default());
        let descriptor = BackendDescriptor {
            model_name: "  ".to_string(),
            ..BackendDescriptor::default()
        };
        let err = factory.create_client(&descriptor).await.unwrap_err();
        assert!(matches!(err, OracleError::EmptyModelName));
    }

    #[test]
    fn test_effective_endpoint_uses_environment() {
        let factory = BackendFactory::new(FactoryEnvironment {
            default_endpoint: Some("gpu-box:11434".to_string()),
            ..FactoryEnvironment::default()
        });
        let endpoint = factory
            .effective_endpoint(&BackendDescriptor::default())
            .unwrap();
        assert_eq!(endpoint, "http://gpu-box:11434");
    }
}
