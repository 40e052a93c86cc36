use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use serde::Serialize;
use tracing::{Instrument, debug, info, info_span, warn};
use uuid::Uuid;

use crate::backend::AdapterRegistry;
use crate::client::{RemoteBackend, RemoteError};
use crate::config::ServiceConfig;
use crate::envelope::{Diagnostics, Failure, FailureKind, OutputArtifact, ResponseEnvelope};
use crate::events::{Event, EventBus};
use crate::invoker::Invoker;
use crate::request::{BackendKind, RawRequest, RestorationRequest};
use crate::resolver;
use crate::wire::{GenerateBody, RestoreBody};

/// Where a request is in its life. Only moves forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Received,
    Validated,
    Invoking,
    Resolving,
    Succeeded,
    Failed,
}

impl Stage {
    pub fn is_terminal(self) -> bool {
        matches!(self, Stage::Succeeded | Stage::Failed)
    }

    /// `Invoking → Succeeded` is the remote path, which has nothing to resolve.
    pub fn can_advance_to(self, next: Stage) -> bool {
        match (self, next) {
            (from, Stage::Failed) => !from.is_terminal(),
            (Stage::Received, Stage::Validated)
            | (Stage::Validated, Stage::Invoking)
            | (Stage::Invoking, Stage::Resolving)
            | (Stage::Invoking, Stage::Succeeded)
            | (Stage::Resolving, Stage::Succeeded) => true,
            _ => false,
        }
    }
}

/// Tracks one request's stage and reports every transition.
struct Lifecycle<'a> {
    id: Uuid,
    backend: Option<BackendKind>,
    stage: Stage,
    events: &'a EventBus,
}

impl<'a> Lifecycle<'a> {
    fn start(events: &'a EventBus) -> Self {
        let lifecycle = Self {
            id: Uuid::new_v4(),
            backend: None,
            stage: Stage::Received,
            events,
        };
        lifecycle.announce();
        lifecycle
    }

    fn advance(&mut self, next: Stage) {
        if !self.stage.can_advance_to(next) {
            warn!(from = ?self.stage, to = ?next, "ignoring illegal stage transition");
            return;
        }
        self.stage = next;
        self.announce();
    }

    fn announce(&self) {
        debug!(stage = ?self.stage, backend = ?self.backend, "stage changed");
        self.events.emit(Event::StageChanged {
            request_id: self.id,
            backend: self.backend,
            stage: self.stage,
        });
    }

    fn validated(&mut self, kind: BackendKind) {
        self.backend = Some(kind);
        self.advance(Stage::Validated);
    }

    fn fail(&mut self, failure: Failure) -> ResponseEnvelope {
        warn!(kind = %failure.kind, message = %failure.message, "request failed");
        self.advance(Stage::Failed);
        failure.into()
    }

    fn finish(&mut self, envelope: ResponseEnvelope) -> ResponseEnvelope {
        match envelope {
            ResponseEnvelope::Success { artifact } => {
                info!(main_result = %artifact.main_result.display(), "request succeeded");
                self.advance(Stage::Succeeded);
                ResponseEnvelope::Success { artifact }
            }
            ResponseEnvelope::Failure(failure) => self.fail(failure),
        }
    }
}

/// Validates requests and drives them through adapter, invoker and resolver.
///
/// Shared as `Arc<RequestRouter>`; nothing inside is locked across an
/// invocation, so concurrent requests only ever contend for the filesystem.
pub struct RequestRouter {
    config: ServiceConfig,
    adapters: AdapterRegistry,
    remotes: HashMap<BackendKind, RemoteBackend>,
    invoker: Arc<dyn Invoker>,
    events: EventBus,
}

impl RequestRouter {
    /// Backends with a configured `url` are forwarded instead of run locally.
    pub fn new(config: ServiceConfig, invoker: Arc<dyn Invoker>) -> Result<Self, RemoteError> {
        let mut remotes = HashMap::new();
        for kind in BackendKind::ALL {
            if let Some(url) = &config.backend(kind).url {
                let remote =
                    RemoteBackend::new(url, config.connect_timeout, config.remote_timeout)?;
                remotes.insert(kind, remote);
            }
        }
        Ok(Self {
            adapters: AdapterRegistry::from_config(&config),
            config,
            remotes,
            invoker,
            events: EventBus::default(),
        })
    }

    pub fn with_events(mut self, events: EventBus) -> Self {
        self.events = events;
        self
    }

    /// Serve only `kinds`; requests for anything else fail as unavailable.
    pub fn restrict_to(mut self, kinds: &[BackendKind]) -> Self {
        self.adapters.retain(kinds);
        self.remotes.retain(|kind, _| kinds.contains(kind));
        self
    }

    /// Backends this router can serve, locally or remotely.
    pub fn backends(&self) -> Vec<BackendKind> {
        BackendKind::ALL
            .into_iter()
            .filter(|k| self.remotes.contains_key(k) || self.adapters.get(*k).is_some())
            .collect()
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    /// Base URL when `kind` is served by another process.
    pub fn remote_url(&self, kind: BackendKind) -> Option<&str> {
        self.remotes.get(&kind).map(RemoteBackend::base_url)
    }

    /// Run one request to completion. Never panics, never retries.
    pub async fn handle(&self, raw: RawRequest) -> ResponseEnvelope {
        let mut lifecycle = Lifecycle::start(&self.events);
        let span = info_span!("request", id = %lifecycle.id);
        async move {
            let request = match raw.validate() {
                Ok(request) => request,
                Err(failure) => return lifecycle.fail(failure),
            };
            lifecycle.validated(request.kind());

            if let Some(remote) = self.remotes.get(&request.kind()) {
                lifecycle.advance(Stage::Invoking);
                info!(
                    backend = %request.kind(),
                    url = remote.base_url(),
                    "forwarding to remote backend"
                );
                let envelope = remote.forward(&request).await;
                return lifecycle.finish(envelope);
            }

            match self.run_local(&request, &mut lifecycle).await {
                Ok(artifact) => lifecycle.finish(ResponseEnvelope::Success { artifact }),
                Err(failure) => lifecycle.fail(failure),
            }
        }
        .instrument(span)
        .await
    }

    /// `POST /restore`: defaults first, then the common path.
    pub async fn handle_restore(&self, body: RestoreBody) -> ResponseEnvelope {
        match body.into_raw() {
            Ok(raw) => self.handle(raw).await,
            Err(failure) => Lifecycle::start(&self.events).fail(failure),
        }
    }

    /// `POST /generate`.
    pub async fn handle_generate(&self, body: GenerateBody) -> ResponseEnvelope {
        self.handle(body.into_raw()).await
    }

    async fn run_local(
        &self,
        request: &RestorationRequest,
        lifecycle: &mut Lifecycle<'_>,
    ) -> Result<OutputArtifact, Failure> {
        let kind = request.kind();
        let adapter = self
            .adapters
            .get(kind)
            .ok_or_else(|| Failure::unavailable(format!("{kind} is not served here")))?;

        let output_dir = self.create_output_dir(request, lifecycle.id).await?;
        let spec = adapter
            .build_command(request, &output_dir)
            .map_err(|e| Failure::invocation(e.to_string()))?;

        lifecycle.advance(Stage::Invoking);
        info!(command = %spec.display(), output_dir = %output_dir.display(), "invoking backend");

        let timeout = self.config.invocation_timeout;
        let result = self
            .invoker
            .invoke(&spec, timeout)
            .await
            .map_err(|e| Failure::invocation(e.to_string()))?;

        if !result.success() {
            let message = if result.timed_out {
                format!("{kind} timed out after {timeout:?}")
            } else {
                format!("{kind} exited with code {}", result.exit_code)
            };
            return Err(Failure::invocation(message)
                .with_diagnostics(Diagnostics::from_invocation(&result)));
        }

        lifecycle.advance(Stage::Resolving);
        let patterns = adapter
            .expected_output_layout(request, &output_dir)
            .map_err(|e| Failure::new(FailureKind::Resolution, e.to_string()))?;
        let cropped_dir = adapter.cropped_faces_dir(&output_dir);
        let stem = request.input_stem();

        let located = tokio::task::spawn_blocking(move || {
            resolver::locate(&patterns, &stem, cropped_dir.as_deref())
        })
        .await
        .map_err(|e| Failure::new(FailureKind::Resolution, format!("output lookup failed: {e}")))?;

        located.map_err(|not_found| {
            let mut diagnostics = Diagnostics::from_invocation(&result);
            diagnostics.attempted_patterns = not_found.attempted;
            Failure::new(
                FailureKind::Resolution,
                "process succeeded but no output found",
            )
            .with_diagnostics(diagnostics)
        })
    }

    /// `<root>/<kind>-<request id>`. The last component is created with a
    /// non-recursive create, so an existing directory is never reused.
    async fn create_output_dir(
        &self,
        request: &RestorationRequest,
        id: Uuid,
    ) -> Result<PathBuf, Failure> {
        let root = request
            .output_root
            .clone()
            .unwrap_or_else(|| self.config.output_root.clone());
        let dir_error = |path: &PathBuf, e: std::io::Error| {
            let message = format!("cannot create output directory {}: {e}", path.display());
            if request.output_root.is_some() {
                Failure::validation("output_path", message)
            } else {
                Failure::invocation(message)
            }
        };

        tokio::fs::create_dir_all(&root)
            .await
            .map_err(|e| dir_error(&root, e))?;
        let dir = root.join(format!("{kind}-{id}", kind = request.kind()));
        tokio::fs::create_dir(&dir)
            .await
            .map_err(|e| dir_error(&dir, e))?;
        tokio::fs::canonicalize(&dir)
            .await
            .map_err(|e| dir_error(&dir, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stages_only_move_forward() {
        assert!(Stage::Received.can_advance_to(Stage::Validated));
        assert!(Stage::Validated.can_advance_to(Stage::Invoking));
        assert!(Stage::Invoking.can_advance_to(Stage::Resolving));
        assert!(Stage::Resolving.can_advance_to(Stage::Succeeded));

        assert!(!Stage::Validated.can_advance_to(Stage::Received));
        assert!(!Stage::Resolving.can_advance_to(Stage::Invoking));
        assert!(!Stage::Received.can_advance_to(Stage::Invoking));
    }

    #[test]
    fn remote_path_skips_resolving() {
        assert!(Stage::Invoking.can_advance_to(Stage::Succeeded));
    }

    #[test]
    fn failed_reachable_from_any_open_stage() {
        for stage in [
            Stage::Received,
            Stage::Validated,
            Stage::Invoking,
            Stage::Resolving,
        ] {
            assert!(stage.can_advance_to(Stage::Failed), "{stage:?}");
        }
        assert!(!Stage::Succeeded.can_advance_to(Stage::Failed));
        assert!(!Stage::Failed.can_advance_to(Stage::Failed));
    }

    #[test]
    fn lifecycle_ignores_backward_moves() {
        let bus = EventBus::default();
        let mut rx = bus.subscribe();
        let mut lifecycle = Lifecycle::start(&bus);
        lifecycle.validated(BackendKind::Gfpgan);
        lifecycle.advance(Stage::Received);
        assert_eq!(lifecycle.stage, Stage::Validated);

        let mut seen = Vec::new();
        while let Ok(Event::StageChanged { stage, .. }) = rx.try_recv() {
            seen.push(stage);
        }
        assert_eq!(seen, vec![Stage::Received, Stage::Validated]);
    }

    #[test]
    fn stage_serializes_snake_case() {
        assert_eq!(
            serde_json::to_value(Stage::Succeeded).unwrap(),
            serde_json::json!("succeeded")
        );
    }
}
