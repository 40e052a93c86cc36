use std::path::Path;

use super::{AdapterError, BackendAdapter, base_command, mismatch, path_arg};
use crate::config::BackendConfig;
use crate::invoker::CommandSpec;
use crate::request::{BackendKind, BackendParams, RestorationRequest};
use crate::resolver::CandidatePattern;

/// Reference-guided diffusion (Ref-LDM `inference.py`).
///
/// Unlike the face restorers it writes a single file at exactly the path it
/// is given; the fallbacks only cover checkouts that rename on save.
pub struct RefLdmAdapter {
    config: BackendConfig,
}

impl RefLdmAdapter {
    pub fn new(config: BackendConfig) -> Self {
        Self { config }
    }

    fn output_name(request: &RestorationRequest) -> String {
        request
            .output_name
            .clone()
            .unwrap_or_else(|| format!("{}.png", request.input_stem()))
    }
}

impl BackendAdapter for RefLdmAdapter {
    fn kind(&self) -> BackendKind {
        BackendKind::RefLdm
    }

    fn build_command(
        &self,
        request: &RestorationRequest,
        output_dir: &Path,
    ) -> Result<CommandSpec, AdapterError> {
        let BackendParams::RefLdm(params) = &request.params else {
            return Err(mismatch(self.kind(), request));
        };

        let mut spec = base_command(&self.config, output_dir);
        spec.args.extend([
            "--lq_path".to_string(),
            path_arg(&request.input_path),
            "--output_path".to_string(),
            path_arg(&output_dir.join(Self::output_name(request))),
            "--cfg_scale".to_string(),
            params.cfg_scale.to_string(),
            "--ddim_step".to_string(),
            params.ddim_steps.to_string(),
            "--seed".to_string(),
            params.seed.to_string(),
            "--ref_paths".to_string(),
        ]);
        // Variadic flag: must stay last.
        spec.args
            .extend(params.ref_paths.iter().map(|p| path_arg(p)));
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
        Ok(vec![
            CandidatePattern::exact(output_dir, Self::output_name(request)),
            CandidatePattern::prefix(output_dir, request.input_stem(), Some("png")),
            CandidatePattern::glob(output_dir, "*.png")?,
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::RefLdmParams;
    use std::path::PathBuf;

    fn adapter() -> RefLdmAdapter {
        RefLdmAdapter::new(BackendConfig {
            program: "python".into(),
            script: "inference.py".into(),
            work_dir: PathBuf::from("/srv/ref-ldm"),
            url: None,
        })
    }

    fn request(output_name: Option<&str>) -> RestorationRequest {
        RestorationRequest {
            input_path: PathBuf::from("/data/lq.png"),
            output_root: None,
            output_name: output_name.map(str::to_string),
            params: BackendParams::RefLdm(RefLdmParams {
                ref_paths: vec![PathBuf::from("/data/ref2.png"), PathBuf::from("/data/ref1.png")],
                cfg_scale: 1.5,
                ddim_steps: 50,
                seed: 2024,
            }),
        }
    }

    #[test]
    fn builds_refldm_arguments_with_trailing_refs() {
        let spec = adapter()
            .build_command(&request(None), Path::new("/out/req"))
            .unwrap();
        assert_eq!(
            spec.args,
            vec![
                "inference.py",
                "--lq_path",
                "/data/lq.png",
                "--output_path",
                "/out/req/lq.png",
                "--cfg_scale",
                "1.5",
                "--ddim_step",
                "50",
                "--seed",
                "2024",
                "--ref_paths",
                "/data/ref2.png",
                "/data/ref1.png",
            ]
        );
    }

    #[test]
    fn honours_requested_output_name() {
        let adapter = adapter();
        let req = request(Some("result.png"));
        let spec = adapter.build_command(&req, Path::new("/out/req")).unwrap();
        assert!(spec.args.contains(&"/out/req/result.png".to_string()));

        let layout = adapter
            .expected_output_layout(&req, Path::new("/out/req"))
            .unwrap();
        assert_eq!(layout[0].to_string(), "/out/req/result.png");
        assert_eq!(layout.last().unwrap().to_string(), "/out/req/*.png");
    }

    #[test]
    fn no_cropped_faces() {
        assert!(adapter().cropped_faces_dir(Path::new("/out")).is_none());
    }
}
