use crate::config::ServiceConfig;
use crate::inspect::{Inspector, ServiceObservation};
use crate::runtime::{ContainerRuntime, Health};
use crate::secret::SecretStrategy;
use serde::{Deserialize, Serialize};
use std::fmt;

// ---------------------------------------------------------------------------
// RebuildReason / BuildDecision
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RebuildReason {
    ImageMissing,
    Unhealthy,
    UpToDate,
    /// Requested by the caller (`stackup update`).
    Forced,
}

impl RebuildReason {
    pub fn as_str(self) -> &'static str {
        match self {
            RebuildReason::ImageMissing => "image_missing",
            RebuildReason::Unhealthy => "unhealthy",
            RebuildReason::UpToDate => "up_to_date",
            RebuildReason::Forced => "forced",
        }
    }
}

impl fmt::Display for RebuildReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildDecision {
    pub service: String,
    pub rebuild: bool,
    pub reason: RebuildReason,
}

/// Decide for one service from a fresh observation.
///
/// A missing image always wins. A container whose health is `unhealthy`
/// forces a rebuild; `none` (no probe) and `starting` never do.
pub fn decide_one(service: &ServiceConfig, observation: &ServiceObservation) -> BuildDecision {
    let (rebuild, reason) = if !observation.image_present {
        (true, RebuildReason::ImageMissing)
    } else if observation.exists && observation.health == Health::Unhealthy {
        (true, RebuildReason::Unhealthy)
    } else {
        (false, RebuildReason::UpToDate)
    };
    BuildDecision {
        service: service.name.clone(),
        rebuild,
        reason,
    }
}

// ---------------------------------------------------------------------------
// DecisionSet
// ---------------------------------------------------------------------------

/// What the decision step concluded as a whole.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum DecisionSummary {
    /// The stack declares no services at all.
    NoServices,
    /// Every service is current; the build step is skipped.
    SkippingRebuild,
    Rebuild { count: usize },
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DecisionSet {
    pub decisions: Vec<BuildDecision>,
}

impl DecisionSet {
    pub fn to_rebuild(&self) -> impl Iterator<Item = &BuildDecision> {
        self.decisions.iter().filter(|d| d.rebuild)
    }

    pub fn get(&self, service: &str) -> Option<&BuildDecision> {
        self.decisions.iter().find(|d| d.service == service)
    }

    pub fn summary(&self) -> DecisionSummary {
        if self.decisions.is_empty() {
            return DecisionSummary::NoServices;
        }
        match self.to_rebuild().count() {
            0 => DecisionSummary::SkippingRebuild,
            count => DecisionSummary::Rebuild { count },
        }
    }
}

/// Observe every service and decide whether it needs a fresh build.
pub fn decide(inspector: &Inspector<'_>, services: &[ServiceConfig]) -> DecisionSet {
    let decisions: Vec<BuildDecision> = services
        .iter()
        .map(|svc| {
            let decision = decide_one(svc, &inspector.observe(svc));
            tracing::info!(
                service = %decision.service,
                rebuild = decision.rebuild,
                reason = %decision.reason,
                "build decision"
            );
            decision
        })
        .collect();

    let set = DecisionSet { decisions };
    match set.summary() {
        DecisionSummary::NoServices => tracing::warn!("no services declared; nothing to decide"),
        DecisionSummary::SkippingRebuild => {
            tracing::info!("skipping rebuild: all images present and no container is unhealthy")
        }
        DecisionSummary::Rebuild { count } => tracing::info!(count, "services need a rebuild"),
    }
    set
}

/// Mark every buildable service for rebuild; services without a build
/// section are left alone.
pub fn decide_forced(services: &[ServiceConfig]) -> DecisionSet {
    DecisionSet {
        decisions: services
            .iter()
            .map(|svc| BuildDecision {
                service: svc.name.clone(),
                rebuild: svc.build.is_some(),
                reason: if svc.build.is_some() {
                    RebuildReason::Forced
                } else {
                    RebuildReason::UpToDate
                },
            })
            .collect(),
    }
}

/// Prefer mount-based secrets; fall back to a build argument only when the
/// build tool cannot mount secrets.
pub fn select_strategy(runtime: &dyn ContainerRuntime) -> SecretStrategy {
    if runtime.supports_secret_mounts() {
        SecretStrategy::Mount
    } else {
        tracing::warn!("build tool lacks secret mounts; passing the secret as a build argument (may be cached in intermediate layers)");
        SecretStrategy::BuildArg
    }
}
