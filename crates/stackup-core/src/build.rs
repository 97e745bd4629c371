use crate::config::{Config, ServiceConfig};
use crate::decision::{select_strategy, DecisionSet};
use crate::error::Result;
use crate::io;
use crate::paths;
use crate::runtime::{BuildRequest, ContainerRuntime, SecretInjection};
use crate::secret::{Provisioner, SecretHandle, SecretStrategy, SecretValue};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// Runs the image builds a [`DecisionSet`] asks for.
pub struct Builder<'a> {
    runtime: &'a dyn ContainerRuntime,
    config: &'a Config,
    root: &'a Path,
    log: PathBuf,
}

impl<'a> Builder<'a> {
    pub fn new(runtime: &'a dyn ContainerRuntime, config: &'a Config, root: &'a Path) -> Self {
        Self {
            runtime,
            config,
            root,
            log: config.log_dir(root).join(paths::BUILD_LOG),
        }
    }

    pub fn log_path(&self) -> &Path {
        &self.log
    }

    /// Build every service marked for rebuild, once each. When any of them
    /// wants the secret and a value is available, all builds run inside a
    /// single secret scope. Returns the services that were built.
    pub fn build(
        &self,
        decisions: &DecisionSet,
        secret: Option<&SecretValue>,
        provisioner: &Provisioner,
    ) -> Result<Vec<String>> {
        let mut targets: Vec<&ServiceConfig> = Vec::new();
        let mut seen = HashSet::new();
        for decision in decisions.to_rebuild() {
            if !seen.insert(decision.service.as_str()) {
                continue;
            }
            let Some(svc) = self.config.service(&decision.service) else {
                continue;
            };
            if svc.build.is_none() {
                tracing::info!(service = %svc.name, image = %svc.image, reason = %decision.reason, "no build section; image will be pulled on launch");
                continue;
            }
            targets.push(svc);
        }

        if targets.is_empty() {
            return Ok(Vec::new());
        }

        let wants_secret = targets
            .iter()
            .any(|s| s.build.as_ref().is_some_and(|b| b.secret));

        match secret {
            Some(value) if wants_secret => {
                let strategy = select_strategy(self.runtime);
                tracing::info!(strategy = strategy.as_str(), "injecting build secret");
                provisioner.with_secret(value, |handle| self.build_all(&targets, Some((handle, strategy))))
            }
            _ => {
                if wants_secret {
                    tracing::warn!(variable = %self.config.secret.env, "secret variable not set; building without it");
                }
                self.build_all(&targets, None)
            }
        }
    }

    fn build_all(
        &self,
        targets: &[&ServiceConfig],
        secret: Option<(&SecretHandle<'_>, SecretStrategy)>,
    ) -> Result<Vec<String>> {
        let mut built = Vec::with_capacity(targets.len());
        for svc in targets {
            let Some(build) = &svc.build else { continue };
            let injection: Option<SecretInjection<'_>> = match secret {
                Some((handle, strategy)) if build.secret => Some(handle.injection(strategy)),
                _ => None,
            };

            io::append_text(
                &self.log,
                &format!(
                    "\n=== build {} ({}) {} ===\n",
                    svc.name,
                    svc.image,
                    chrono::Utc::now().to_rfc3339()
                ),
            )?;
            tracing::info!(service = %svc.name, image = %svc.image, "building image");

            let request = BuildRequest {
                service: &svc.name,
                image: &svc.image,
                context: paths::resolve(self.root, &build.context),
                dockerfile: build.dockerfile.clone(),
                secret: injection,
                log: &self.log,
            };
            self.runtime.build_image(&request)?;
            built.push(svc.name.clone());
        }
        Ok(built)
    }
}
