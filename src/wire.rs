//! JSON bodies for `/restore` and `/generate`.
//!
//! These are the loose shapes clients send and receive. Defaults for absent
//! tuning fields are applied here, at the transport edge, so that
//! [`RawRequest::validate`](crate::request::RawRequest::validate) only ever
//! sees complete requests or genuinely missing data.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::envelope::{Failure, FailureKind, OutputArtifact, ResponseEnvelope};
use crate::request::{BackendKind, BackendParams, RawRequest, RestorationRequest, VersionField};

pub const DEFAULT_WEIGHT: f64 = 0.5;
pub const DEFAULT_GFPGAN_VERSION: &str = "1.4";
pub const DEFAULT_UPSCALE: i64 = 2;
pub const DEFAULT_CFG_SCALE: f64 = 1.5;
pub const DEFAULT_DDIM_STEP: i64 = 50;
pub const DEFAULT_SEED: i64 = 2024;

/// `POST /restore` body. Accepts both snake_case and camelCase keys.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RestoreBody {
    #[serde(default, alias = "backendKind", skip_serializing_if = "Option::is_none")]
    pub backend_kind: Option<String>,
    #[serde(default, alias = "inputPath", skip_serializing_if = "Option::is_none")]
    pub input_path: Option<String>,
    #[serde(default, alias = "outputPath", skip_serializing_if = "Option::is_none")]
    pub output_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weight: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<VersionField>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upscale: Option<i64>,
}

impl RestoreBody {
    /// Fill per-backend defaults. Ref-LDM has its own endpoint.
    pub fn into_raw(self) -> Result<RawRequest, Failure> {
        let kind = match self.backend_kind.as_deref() {
            Some(name) => Some(
                name.parse::<BackendKind>()
                    .map_err(|e| Failure::validation("backend_kind", e))?,
            ),
            None => None,
        };

        let mut raw = RawRequest {
            backend_kind: self.backend_kind,
            input_path: self.input_path,
            output_path: self.output_path,
            weight: self.weight,
            version: self.version,
            upscale: self.upscale,
            ..RawRequest::default()
        };

        match kind {
            Some(BackendKind::CodeFormer) => {
                raw.weight.get_or_insert(DEFAULT_WEIGHT);
            }
            Some(BackendKind::Gfpgan) => {
                raw.weight.get_or_insert(DEFAULT_WEIGHT);
                raw.upscale.get_or_insert(DEFAULT_UPSCALE);
                raw.version
                    .get_or_insert_with(|| VersionField::Text(DEFAULT_GFPGAN_VERSION.to_string()));
            }
            Some(BackendKind::RefLdm) => {
                return Err(Failure::validation(
                    "backend_kind",
                    "refldm needs reference images; use POST /generate",
                ));
            }
            None => {}
        }
        Ok(raw)
    }

    /// Body to forward an already validated face-restoration request.
    pub fn from_request(request: &RestorationRequest) -> Self {
        let mut body = Self {
            backend_kind: Some(request.kind().to_string()),
            input_path: Some(request.input_path.to_string_lossy().into_owned()),
            output_path: request
                .output_root
                .as_ref()
                .map(|p| p.to_string_lossy().into_owned()),
            ..Self::default()
        };
        match &request.params {
            BackendParams::CodeFormer(p) => body.weight = Some(p.weight),
            BackendParams::Gfpgan(p) => {
                body.weight = Some(p.weight);
                body.upscale = Some(i64::from(p.upscale));
                body.version = Some(VersionField::Text(p.version.as_str().to_string()));
            }
            BackendParams::RefLdm(_) => {}
        }
        body
    }
}

/// `POST /generate` body (Ref-LDM).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GenerateBody {
    #[serde(default, alias = "lqPath", skip_serializing_if = "Option::is_none")]
    pub lq_path: Option<String>,
    #[serde(default, alias = "refPaths", skip_serializing_if = "Option::is_none")]
    pub ref_paths: Option<Vec<String>>,
    #[serde(default, alias = "outputPath", skip_serializing_if = "Option::is_none")]
    pub output_path: Option<String>,
    #[serde(default, alias = "cfgScale", skip_serializing_if = "Option::is_none")]
    pub cfg_scale: Option<f64>,
    #[serde(
        default,
        alias = "ddimStep",
        alias = "ddim_steps",
        skip_serializing_if = "Option::is_none"
    )]
    pub ddim_step: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<i64>,
}

impl GenerateBody {
    pub fn into_raw(self) -> RawRequest {
        RawRequest {
            backend_kind: Some(BackendKind::RefLdm.to_string()),
            input_path: self.lq_path,
            output_path: self.output_path,
            ref_paths: self.ref_paths,
            cfg_scale: Some(self.cfg_scale.unwrap_or(DEFAULT_CFG_SCALE)),
            ddim_steps: Some(self.ddim_step.unwrap_or(DEFAULT_DDIM_STEP)),
            seed: Some(self.seed.unwrap_or(DEFAULT_SEED)),
            ..RawRequest::default()
        }
    }

    pub fn from_request(request: &RestorationRequest) -> Self {
        let output_path = match (&request.output_root, &request.output_name) {
            (Some(root), Some(name)) => Some(root.join(name)),
            (Some(root), None) => Some(root.clone()),
            (None, Some(name)) => Some(PathBuf::from(name)),
            (None, None) => None,
        };
        let mut body = Self {
            lq_path: Some(request.input_path.to_string_lossy().into_owned()),
            output_path: output_path.map(|p| p.to_string_lossy().into_owned()),
            ..Self::default()
        };
        if let BackendParams::RefLdm(p) = &request.params {
            body.ref_paths = Some(
                p.ref_paths
                    .iter()
                    .map(|r| r.to_string_lossy().into_owned())
                    .collect(),
            );
            body.cfg_scale = Some(p.cfg_scale);
            body.ddim_step = Some(i64::from(p.ddim_steps));
            body.seed = Some(p.seed);
        }
        body
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Success,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RestoreResponse {
    pub status: Status,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_files: Option<OutputArtifact>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<Failure>,
}

impl From<ResponseEnvelope> for RestoreResponse {
    fn from(envelope: ResponseEnvelope) -> Self {
        match envelope {
            ResponseEnvelope::Success { artifact } => Self {
                status: Status::Success,
                output_files: Some(artifact),
                message: Some("restoration complete".to_string()),
                error: None,
            },
            ResponseEnvelope::Failure(failure) => Self {
                status: Status::Error,
                output_files: None,
                message: None,
                error: Some(failure),
            },
        }
    }
}

impl RestoreResponse {
    pub fn into_envelope(self) -> ResponseEnvelope {
        match (self.status, self.output_files, self.error) {
            (Status::Success, Some(artifact), _) => ResponseEnvelope::Success { artifact },
            (_, _, Some(failure)) => failure.into(),
            (Status::Success, None, None) => Failure::new(
                FailureKind::Resolution,
                "backend reported success without output files",
            )
            .into(),
            (Status::Error, _, None) => {
                Failure::invocation("backend reported an error without details").into()
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerateResponse {
    pub status: Status,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_file: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<Failure>,
}

impl From<ResponseEnvelope> for GenerateResponse {
    fn from(envelope: ResponseEnvelope) -> Self {
        match envelope {
            ResponseEnvelope::Success { artifact } => Self {
                status: Status::Success,
                output_file: Some(artifact.main_result),
                message: Some("image generation complete".to_string()),
                detail: None,
            },
            ResponseEnvelope::Failure(failure) => Self {
                status: Status::Error,
                output_file: None,
                message: None,
                detail: Some(failure),
            },
        }
    }
}

impl GenerateResponse {
    /// Ref-LDM reports a single file; companions are not tracked remotely.
    pub fn into_envelope(self) -> ResponseEnvelope {
        match (self.status, self.output_file, self.detail) {
            (Status::Success, Some(main_result), _) => ResponseEnvelope::Success {
                artifact: OutputArtifact {
                    related_files: vec![main_result.clone()],
                    main_result,
                    cropped_faces: None,
                },
            },
            (_, _, Some(failure)) => failure.into(),
            (Status::Success, None, None) => Failure::new(
                FailureKind::Resolution,
                "backend reported success without an output file",
            )
            .into(),
            (Status::Error, _, None) => {
                Failure::invocation("backend reported an error without details").into()
            }
        }
    }
}
