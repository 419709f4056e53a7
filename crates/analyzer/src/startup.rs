//! Startup checks module for the stream analyzer
//!
//! Provides preflight checks run before the pipeline starts:
//! - Configuration validation
//! - Model readiness on the inference endpoint

use crate::client::{ClientError, InferenceClient};
use crate::config::{Config, ConfigError};
use thiserror::Error;
use tracing::info;

/// Error types for startup checks
#[derive(Debug, Error)]
pub enum StartupError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Model '{model}' is not ready on {endpoint}")]
    ModelNotReady { model: String, endpoint: String },

    #[error("Inference endpoint check failed: {0}")]
    Endpoint(#[from] ClientError),
}

/// Reject configurations the pipeline cannot run with
pub fn validate_config(cfg: &Config) -> Result<(), StartupError> {
    cfg.validate()?;
    Ok(())
}

/// Ask the endpoint whether the configured model is loaded
pub async fn check_model_ready(
    client: &dyn InferenceClient,
    cfg: &Config,
) -> Result<(), StartupError> {
    if client.model_ready().await? {
        info!(model = %cfg.inference.model_name, endpoint = %cfg.inference.endpoint, "Model ready");
        Ok(())
    } else {
        Err(StartupError::ModelNotReady {
            model: cfg.inference.model_name.clone(),
            endpoint: cfg.inference.endpoint.clone(),
        })
    }
}

/// Run all startup checks in order
///
/// Checks are run in the following order:
/// 1. Configuration validation
/// 2. Model readiness, unless `probe_endpoint` is false
pub async fn run_startup_checks(
    cfg: &Config,
    client: &dyn InferenceClient,
    probe_endpoint: bool,
) -> Result<(), StartupError> {
    validate_config(cfg)?;
    if probe_endpoint {
        check_model_ready(client, cfg).await?;
    }
    Ok(())
}
