use std::path::{Path, PathBuf};

use super::{AdapterError, BackendAdapter, base_command, mismatch, path_arg};
use crate::config::BackendConfig;
use crate::invoker::CommandSpec;
use crate::request::{BackendKind, BackendParams, RestorationRequest};
use crate::resolver::CandidatePattern;

/// Background upsampler passed on every run.
const BG_UPSAMPLER: &str = "realesrgan";

/// GFPGAN face restoration (`inference_gfpgan.py`).
///
/// The restored whole image keeps the input's extension under
/// `restored_imgs/`; per-face outputs go to `restored_faces/`.
pub struct GfpganAdapter {
    config: BackendConfig,
}

impl GfpganAdapter {
    pub fn new(config: BackendConfig) -> Self {
        Self { config }
    }
}

impl BackendAdapter for GfpganAdapter {
    fn kind(&self) -> BackendKind {
        BackendKind::Gfpgan
    }

    fn build_command(
        &self,
        request: &RestorationRequest,
        output_dir: &Path,
    ) -> Result<CommandSpec, AdapterError> {
        let BackendParams::Gfpgan(params) = &request.params else {
            return Err(mismatch(self.kind(), request));
        };

        let mut spec = base_command(&self.config, output_dir);
        spec.args.extend([
            "-i".to_string(),
            path_arg(&request.input_path),
            "-o".to_string(),
            path_arg(output_dir),
            "-v".to_string(),
            params.version.as_str().to_string(),
            "-s".to_string(),
            params.upscale.to_string(),
            "-w".to_string(),
            params.weight.to_string(),
            "--bg_upsampler".to_string(),
            BG_UPSAMPLER.to_string(),
        ]);
        Ok(spec)
    }

    fn expected_output_layout(
        &self,
        request: &RestorationRequest,
        output_dir: &Path,
    ) -> Result<Vec<CandidatePattern>, AdapterError> {
        if request.kind() != self.kind() {
            return Err(mismatch(self.kind(), request));
        }
        let stem = request.input_stem();
        let images = output_dir.join("restored_imgs");
        let faces = output_dir.join("restored_faces");

        Ok(vec![
            CandidatePattern::stem(&images, stem.as_str()),
            CandidatePattern::prefix(&images, stem.as_str(), None),
            CandidatePattern::prefix(&faces, format!("{stem}_"), None),
            CandidatePattern::glob(&images, "*")?,
        ])
    }

    fn cropped_faces_dir(&self, output_dir: &Path) -> Option<PathBuf> {
        Some(output_dir.join("cropped_faces"))
    }
}
