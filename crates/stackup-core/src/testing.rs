//! In-memory runtime and virtual clock for unit tests.

use crate::error::{Result, StackError};
use crate::readiness::{CancelToken, Clock};
use crate::runtime::{
    build_args, BuildRequest, ContainerRuntime, ContainerState, Health, RuntimeStatus,
    SecretInjection,
};
use std::cell::{Cell, RefCell};
use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone)]
struct FakeContainer {
    status: RuntimeStatus,
    /// Health reported per inspection; the last entry sticks.
    health: VecDeque<Health>,
    exit_code: Option<i64>,
    restart_count: Option<u64>,
    env: Vec<String>,
}

#[derive(Debug, Clone)]
pub(crate) struct RecordedBuild {
    pub service: String,
    pub args: Vec<String>,
    /// Contents of the mounted secret file, read while the build ran.
    pub mounted: Option<String>,
    pub mount_path: Option<std::path::PathBuf>,
    /// Value handed over through the build environment.
    pub env_value: Option<String>,
}

#[derive(Default)]
pub(crate) struct FakeRuntime {
    images: RefCell<HashMap<String, bool>>,
    containers: RefCell<HashMap<String, FakeContainer>>,
    on_start: RefCell<HashMap<String, FakeContainer>>,
    logs: RefCell<HashMap<String, Vec<String>>>,
    mounts: Cell<bool>,
    failing: Cell<bool>,
    fail_build: RefCell<Option<String>>,
    fail_start: RefCell<Option<String>>,
    pub builds: RefCell<Vec<RecordedBuild>>,
    pub started: RefCell<Vec<String>>,
    pub pings: Cell<usize>,
}

impl FakeRuntime {
    pub fn new() -> Self {
        let rt = Self::default();
        rt.mounts.set(true);
        rt
    }

    pub fn set_image(&self, image: &str, present: bool) {
        self.images.borrow_mut().insert(image.to_string(), present);
    }

    pub fn set_container(&self, service: &str, status: RuntimeStatus, health: &[Health]) {
        self.containers
            .borrow_mut()
            .insert(service.to_string(), container(status, health));
    }

    /// Create the container only once the service is started.
    pub fn on_start(&self, service: &str, status: RuntimeStatus, health: &[Health]) {
        self.on_start
            .borrow_mut()
            .insert(service.to_string(), container(status, health));
    }

    pub fn set_env(&self, service: &str, env: &[&str]) {
        if let Some(c) = self.containers.borrow_mut().get_mut(service) {
            c.env = env.iter().map(|s| s.to_string()).collect();
        }
    }

    pub fn set_exit(&self, service: &str, exit_code: i64, restarts: u64) {
        if let Some(c) = self.containers.borrow_mut().get_mut(service) {
            c.exit_code = Some(exit_code);
            c.restart_count = Some(restarts);
        }
    }

    pub fn set_logs(&self, service: &str, lines: &[&str]) {
        self.logs.borrow_mut().insert(
            service.to_string(),
            lines.iter().map(|s| s.to_string()).collect(),
        );
    }

    pub fn set_mounts(&self, supported: bool) {
        self.mounts.set(supported);
    }

    pub fn fail_queries(&self, failing: bool) {
        self.failing.set(failing);
    }

    pub fn fail_build(&self, service: &str) {
        *self.fail_build.borrow_mut() = Some(service.to_string());
    }

    pub fn fail_start(&self, service: &str) {
        *self.fail_start.borrow_mut() = Some(service.to_string());
    }

    pub fn built(&self) -> Vec<String> {
        self.builds.borrow().iter().map(|b| b.service.clone()).collect()
    }

    fn unavailable(&self) -> StackError {
        StackError::RuntimeUnavailable("Cannot connect to the Docker daemon".into())
    }
}

fn container(status: RuntimeStatus, health: &[Health]) -> FakeContainer {
    FakeContainer {
        status,
        health: health.iter().copied().collect(),
        exit_code: None,
        restart_count: Some(0),
        env: Vec::new(),
    }
}

impl ContainerRuntime for FakeRuntime {
    fn ping(&self) -> Result<()> {
        self.pings.set(self.pings.get() + 1);
        if self.failing.get() {
            return Err(self.unavailable());
        }
        Ok(())
    }

    fn image_exists(&self, image: &str) -> Result<bool> {
        if self.failing.get() {
            return Err(self.unavailable());
        }
        Ok(self.images.borrow().get(image).copied().unwrap_or(false))
    }

    fn container_id(&self, service: &str) -> Result<Option<String>> {
        if self.failing.get() {
            return Err(self.unavailable());
        }
        Ok(self
            .containers
            .borrow()
            .contains_key(service)
            .then(|| format!("{service}-1")))
    }

    fn inspect_container(&self, id: &str) -> Result<ContainerState> {
        let service = id.trim_end_matches("-1");
        let mut containers = self.containers.borrow_mut();
        let c = containers
            .get_mut(service)
            .ok_or_else(|| StackError::RuntimeUnavailable(format!("No such container: {id}")))?;
        let health = if c.health.len() > 1 {
            c.health.pop_front().unwrap_or(Health::None)
        } else {
            c.health.front().copied().unwrap_or(Health::None)
        };
        Ok(ContainerState {
            status: c.status,
            health,
            exit_code: c.exit_code,
            restart_count: c.restart_count,
            env: c.env.clone(),
            health_log: None,
        })
    }

    fn logs(&self, service: &str, tail: usize) -> Result<Vec<String>> {
        if self.failing.get() {
            return Err(self.unavailable());
        }
        let logs = self.logs.borrow();
        let lines = logs.get(service).cloned().unwrap_or_default();
        let start = lines.len().saturating_sub(tail);
        Ok(lines[start..].to_vec())
    }

    fn supports_secret_mounts(&self) -> bool {
        self.mounts.get()
    }

    fn build_image(&self, request: &BuildRequest<'_>) -> Result<()> {
        let (mounted, mount_path, env_value) = match request.secret {
            Some(SecretInjection::Mount { path, .. }) => {
                (std::fs::read_to_string(path).ok(), Some(path.to_path_buf()), None)
            }
            Some(SecretInjection::BuildArg { value, .. }) => {
                (None, None, Some(value.expose().to_string()))
            }
            None => (None, None, None),
        };
        self.builds.borrow_mut().push(RecordedBuild {
            service: request.service.to_string(),
            args: build_args(request),
            mounted,
            mount_path,
            env_value,
        });
        crate::io::append_text(request.log, &format!("Step 1/1 : building {}\n", request.image))?;

        if self.fail_build.borrow().as_deref() == Some(request.service) {
            crate::io::append_text(request.log, "ERROR: failed to solve: exit code 1\n")?;
            return Err(StackError::Build {
                service: request.service.to_string(),
                message: "build exited with 1".into(),
            });
        }
        self.set_image(request.image, true);
        Ok(())
    }

    fn start_service(&self, service: &str, log: &Path) -> Result<()> {
        if self.fail_start.borrow().as_deref() == Some(service) {
            crate::io::append_text(
                log,
                &format!("Error: dependency failed to start: container for {service} is unhealthy\n"),
            )?;
            return Err(StackError::Launch {
                service: service.to_string(),
                message: "compose up exited with 1".into(),
            });
        }
        crate::io::append_text(log, &format!("Container {service}-1  Started\n"))?;
        self.started.borrow_mut().push(service.to_string());
        if let Some(c) = self.on_start.borrow_mut().remove(service) {
            self.containers.borrow_mut().insert(service.to_string(), c);
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// FakeClock
// ---------------------------------------------------------------------------

#[derive(Default)]
pub(crate) struct FakeClock {
    now: Cell<Duration>,
    pub sleeps: Cell<usize>,
    /// Flip this token once `sleeps` reaches the given count.
    cancel_after: RefCell<Option<(usize, CancelToken)>>,
}

impl FakeClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Move time forward without counting a sleep.
    pub fn advance(&self, by: Duration) {
        self.now.set(self.now.get() + by);
    }

    pub fn cancel_after(&self, sleeps: usize, token: &CancelToken) {
        *self.cancel_after.borrow_mut() = Some((sleeps, token.clone()));
    }
}

impl Clock for FakeClock {
    fn now(&self) -> Duration {
        self.now.get()
    }

    fn sleep(&self, duration: Duration, cancel: &CancelToken) -> bool {
        if let Some((after, token)) = self.cancel_after.borrow().as_ref() {
            if self.sleeps.get() >= *after {
                token.cancel();
            }
        }
        if cancel.is_cancelled() {
            return false;
        }
        self.sleeps.set(self.sleeps.get() + 1);
        self.now.set(self.now.get() + duration);
        true
    }
}
