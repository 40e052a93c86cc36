use std::path::{Path, PathBuf};

use super::{AdapterError, BackendAdapter, base_command, mismatch, path_arg};
use crate::config::BackendConfig;
use crate::invoker::CommandSpec;
use crate::request::{BackendKind, BackendParams, RestorationRequest};
use crate::resolver::CandidatePattern;

/// CodeFormer face restoration (`inference_codeformer.py`).
///
/// Writes `final_results/` (whole image), `restored_faces/` and
/// `cropped_faces/` under the output path, though older checkouts
/// drop results straight into the output directory.
pub struct CodeFormerAdapter {
    config: BackendConfig,
}

impl CodeFormerAdapter {
    pub fn new(config: BackendConfig) -> Self {
        Self { config }
    }
}

impl BackendAdapter for CodeFormerAdapter {
    fn kind(&self) -> BackendKind {
        BackendKind::CodeFormer
    }

    fn build_command(
        &self,
        request: &RestorationRequest,
        output_dir: &Path,
    ) -> Result<CommandSpec, AdapterError> {
        let BackendParams::CodeFormer(params) = &request.params else {
            return Err(mismatch(self.kind(), request));
        };

        let mut spec = base_command(&self.config, output_dir);
        spec.args.extend([
            "-w".to_string(),
            params.weight.to_string(),
            "--input_path".to_string(),
            path_arg(&request.input_path),
            "--output_path".to_string(),
            path_arg(output_dir),
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
        let finals = output_dir.join("final_results");
        let faces = output_dir.join("restored_faces");

        Ok(vec![
            CandidatePattern::exact(&finals, format!("{stem}.png")),
            CandidatePattern::prefix(&finals, stem.as_str(), Some("png")),
            CandidatePattern::exact(&faces, format!("{stem}.png")),
            CandidatePattern::prefix(&faces, format!("{stem}_"), Some("png")),
            CandidatePattern::prefix(&faces, stem.as_str(), Some("png")),
            CandidatePattern::exact(output_dir, format!("{stem}.png")),
            CandidatePattern::prefix(output_dir, stem.as_str(), Some("png")),
            CandidatePattern::glob(&finals, "*.png")?,
            CandidatePattern::glob(&faces, "*.png")?,
            CandidatePattern::glob(output_dir, "*.png")?,
        ])
    }

    fn cropped_faces_dir(&self, output_dir: &Path) -> Option<PathBuf> {
        Some(output_dir.join("cropped_faces"))
    }
}
