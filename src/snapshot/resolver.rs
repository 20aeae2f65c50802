//! Pick the snapshot backend that matches what the cluster serves
//!
//! Resolution is read-only: it lists at most one VolumeSnapshotClass per
//! generation and never creates anything. Do it once at startup and pass the
//! resulting [`Snapshotter`] to whatever needs it.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use kube::api::{Api, DynamicObject, ListParams};
use kube::Client;
use tracing::{debug, info};

#[cfg(test)]
use mockall::automock;

use super::alpha::AlphaSnapshotter;
use super::beta::BetaSnapshotter;
use super::{ApiGeneration, Snapshotter};
use crate::config::SnapshotterConfig;
use crate::crd::{self, CLASS_KIND, CLASS_PLURAL};
use crate::kube_utils::build_api_resource;
use crate::poll::{PollConfig, WaitContext};
use crate::Error;

/// Result of probing one API version
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ProbeOutcome {
    /// The version is served and listable
    Available,
    /// The API server does not serve the version
    NotFound,
    /// The probe failed for another reason
    Failed(String),
}

impl fmt::Display for ProbeOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Available => write!(f, "available"),
            Self::NotFound => write!(f, "not served"),
            Self::Failed(msg) => write!(f, "probe failed: {}", msg),
        }
    }
}

/// Checks whether a snapshot API version is served
#[cfg_attr(test, automock)]
#[async_trait]
pub trait Probe: Send + Sync {
    /// Probe VolumeSnapshotClass listing at `api_version`
    async fn probe(&self, api_version: &str) -> ProbeOutcome;
}

/// [`Probe`] that lists VolumeSnapshotClasses with `limit=1`
pub struct KubeProbe {
    client: Client,
}

impl KubeProbe {
    /// Wrap the given kube Client
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Probe for KubeProbe {
    async fn probe(&self, api_version: &str) -> ProbeOutcome {
        let ar = build_api_resource(api_version, CLASS_KIND, CLASS_PLURAL);
        let api: Api<DynamicObject> = Api::all_with(self.client.clone(), &ar);
        match api.list(&ListParams::default().limit(1)).await {
            Ok(_) => ProbeOutcome::Available,
            Err(kube::Error::Api(ae)) if ae.code == 404 => ProbeOutcome::NotFound,
            Err(e) => ProbeOutcome::Failed(e.to_string()),
        }
    }
}

/// Work out which generation to bind.
///
/// Beta wins when served; alpha is used when it is the only one served.
/// Each probe is bounded by `ctx`.
pub async fn detect_generation(
    ctx: &WaitContext,
    probe: &dyn Probe,
) -> Result<ApiGeneration, Error> {
    let alpha = probe_within(ctx, probe, crd::alpha::API_VERSION).await?;
    let beta = probe_within(ctx, probe, crd::beta::API_VERSION).await?;
    debug!(alpha = %alpha, beta = %beta, "snapshot API probes");

    match (&alpha, &beta) {
        (_, ProbeOutcome::Available) => Ok(ApiGeneration::Beta),
        (ProbeOutcome::Available, _) => Ok(ApiGeneration::Alpha),
        _ => Err(Error::unsupported_platform(format!(
            "no supported snapshot API is served ({}: {}, {}: {})",
            crd::alpha::API_VERSION,
            alpha,
            crd::beta::API_VERSION,
            beta
        ))),
    }
}

async fn probe_within(
    ctx: &WaitContext,
    probe: &dyn Probe,
    api_version: &str,
) -> Result<ProbeOutcome, Error> {
    ctx.run("probe_snapshot_api", async { Ok(probe.probe(api_version).await) })
        .await
}

/// Backend for a known generation
pub fn bind(client: Client, generation: ApiGeneration, poll: PollConfig) -> Arc<dyn Snapshotter> {
    match generation {
        ApiGeneration::Alpha => Arc::new(AlphaSnapshotter::from_client(client, poll)),
        ApiGeneration::Beta => Arc::new(BetaSnapshotter::from_client(client, poll)),
    }
}

/// Probe the cluster (unless the config forces a generation) and bind the
/// matching backend
pub async fn resolve(
    ctx: &WaitContext,
    client: Client,
    config: &SnapshotterConfig,
) -> Result<Arc<dyn Snapshotter>, Error> {
    let generation = match config.api_version {
        Some(generation) => {
            info!(generation = %generation, "using configured snapshot API generation");
            generation
        }
        None => {
            let generation = detect_generation(ctx, &KubeProbe::new(client.clone())).await?;
            info!(generation = %generation, api_version = generation.api_version(), "detected snapshot API generation");
            generation
        }
    };
    Ok(bind(client, generation, config.poll.clone()))
}
