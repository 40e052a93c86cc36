pub mod codeformer;
pub mod gfpgan;
pub mod refldm;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::config::{BackendConfig, ServiceConfig};
use crate::invoker::CommandSpec;
use crate::request::{BackendKind, RestorationRequest};
use crate::resolver::CandidatePattern;

pub use codeformer::CodeFormerAdapter;
pub use gfpgan::GfpganAdapter;
pub use refldm::RefLdmAdapter;

#[derive(Debug, thiserror::Error)]
pub enum AdapterError {
    #[error("{request} request routed to the {adapter} adapter")]
    Mismatch {
        adapter: BackendKind,
        request: BackendKind,
    },
    #[error("invalid output pattern: {0}")]
    Pattern(#[from] globset::Error),
}

/// Backend-specific knowledge: flag names, flag order, output layout.
/// Adapters describe work; they never run anything.
pub trait BackendAdapter: Send + Sync {
    fn kind(&self) -> BackendKind;

    fn build_command(
        &self,
        request: &RestorationRequest,
        output_dir: &Path,
    ) -> Result<CommandSpec, AdapterError>;

    /// Where the result may land, most specific first.
    fn expected_output_layout(
        &self,
        request: &RestorationRequest,
        output_dir: &Path,
    ) -> Result<Vec<CandidatePattern>, AdapterError>;

    /// Directory holding per-face crops, for backends that produce them.
    fn cropped_faces_dir(&self, _output_dir: &Path) -> Option<PathBuf> {
        None
    }
}

/// `<program> [<script>]` running in the backend's working directory.
fn base_command(config: &BackendConfig, output_dir: &Path) -> CommandSpec {
    let mut args = Vec::new();
    if !config.script.is_empty() {
        args.push(config.script.clone());
    }
    CommandSpec {
        program: config.program.clone(),
        args,
        work_dir: config.work_dir.clone(),
        output_dir: output_dir.to_path_buf(),
    }
}

fn path_arg(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

fn mismatch(adapter: BackendKind, request: &RestorationRequest) -> AdapterError {
    AdapterError::Mismatch {
        adapter,
        request: request.kind(),
    }
}

/// Adapters keyed by kind. Built once; read-only afterwards.
#[derive(Default, Clone)]
pub struct AdapterRegistry {
    adapters: HashMap<BackendKind, Arc<dyn BackendAdapter>>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// One adapter per backend, configured from `config`.
    pub fn from_config(config: &ServiceConfig) -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(CodeFormerAdapter::new(
            config.backend(BackendKind::CodeFormer).clone(),
        )));
        registry.register(Arc::new(GfpganAdapter::new(
            config.backend(BackendKind::Gfpgan).clone(),
        )));
        registry.register(Arc::new(RefLdmAdapter::new(
            config.backend(BackendKind::RefLdm).clone(),
        )));
        registry
    }

    pub fn register(&mut self, adapter: Arc<dyn BackendAdapter>) {
        self.adapters.insert(adapter.kind(), adapter);
    }

    /// Drop every adapter whose kind is not in `kinds`.
    pub fn retain(&mut self, kinds: &[BackendKind]) {
        self.adapters.retain(|kind, _| kinds.contains(kind));
    }

    pub fn get(&self, kind: BackendKind) -> Option<Arc<dyn BackendAdapter>> {
        self.adapters.get(&kind).cloned()
    }

    pub fn kinds(&self) -> Vec<BackendKind> {
        BackendKind::ALL
            .into_iter()
            .filter(|k| self.adapters.contains_key(k))
            .collect()
    }
}
