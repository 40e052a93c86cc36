//! Inbound request validation.
//!
//! A [`RawRequest`] is the loose, transport-level union of every field any
//! backend understands. [`RawRequest::validate`] turns it into a closed
//! [`RestorationRequest`] whose [`BackendParams`] variant carries exactly the
//! fields its backend needs, with every referenced path checked on disk.

use std::fmt;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::consts::IMAGE_EXTENSIONS;
use crate::envelope::Failure;

/// The three restoration engines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    CodeFormer,
    Gfpgan,
    RefLdm,
}

impl BackendKind {
    pub const ALL: [BackendKind; 3] = [
        BackendKind::CodeFormer,
        BackendKind::Gfpgan,
        BackendKind::RefLdm,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            BackendKind::CodeFormer => "codeformer",
            BackendKind::Gfpgan => "gfpgan",
            BackendKind::RefLdm => "refldm",
        }
    }

    /// Face restorers also emit per-face crops next to the main result.
    pub fn is_face_restorer(self) -> bool {
        matches!(self, BackendKind::CodeFormer | BackendKind::Gfpgan)
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackendKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "codeformer" => Ok(BackendKind::CodeFormer),
            "gfpgan" => Ok(BackendKind::Gfpgan),
            "refldm" | "ref-ldm" | "ref_ldm" => Ok(BackendKind::RefLdm),
            other => Err(format!(
                "unknown backend kind '{other}' (expected codeformer, gfpgan or refldm)"
            )),
        }
    }
}

/// GFPGAN model generations we know how to drive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GfpganVersion {
    V1_3,
    V1_4,
}

impl GfpganVersion {
    pub fn as_str(self) -> &'static str {
        match self {
            GfpganVersion::V1_3 => "1.3",
            GfpganVersion::V1_4 => "1.4",
        }
    }
}

impl FromStr for GfpganVersion {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let bare = trimmed
            .strip_prefix('v')
            .or_else(|| trimmed.strip_prefix('V'))
            .unwrap_or(trimmed);
        match bare {
            "1.3" => Ok(GfpganVersion::V1_3),
            "1.4" => Ok(GfpganVersion::V1_4),
            other => Err(format!("unsupported GFPGAN version '{other}' (expected 1.3 or 1.4)")),
        }
    }
}

/// `version` arrives as either `"1.4"` or `1.4` depending on the client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum VersionField {
    Text(String),
    Number(f64),
}

impl VersionField {
    fn parse(&self) -> Result<GfpganVersion, String> {
        match self {
            VersionField::Text(text) => text.parse(),
            VersionField::Number(number) => number.to_string().parse(),
        }
    }
}

/// Transport-level request: every field optional, nothing checked yet.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawRequest {
    pub backend_kind: Option<String>,
    pub input_path: Option<String>,
    pub output_path: Option<String>,
    pub weight: Option<f64>,
    pub version: Option<VersionField>,
    pub upscale: Option<i64>,
    pub ref_paths: Option<Vec<String>>,
    pub cfg_scale: Option<f64>,
    pub ddim_steps: Option<i64>,
    pub seed: Option<i64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CodeFormerParams {
    pub weight: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GfpganParams {
    pub version: GfpganVersion,
    pub upscale: u32,
    pub weight: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RefLdmParams {
    pub ref_paths: Vec<PathBuf>,
    pub cfg_scale: f64,
    pub ddim_steps: u32,
    pub seed: i64,
}

/// Backend-specific parameters. Closed: a request is exactly one of these.
#[derive(Debug, Clone, PartialEq)]
pub enum BackendParams {
    CodeFormer(CodeFormerParams),
    Gfpgan(GfpganParams),
    RefLdm(RefLdmParams),
}

/// A validated request. Paths are canonical and existed at validation time.
#[derive(Debug, Clone, PartialEq)]
pub struct RestorationRequest {
    pub input_path: PathBuf,
    /// Parent for the per-request output directory; `None` means the configured root.
    pub output_root: Option<PathBuf>,
    /// Requested file name for single-file backends.
    pub output_name: Option<String>,
    pub params: BackendParams,
}

impl RestorationRequest {
    pub fn kind(&self) -> BackendKind {
        match self.params {
            BackendParams::CodeFormer(_) => BackendKind::CodeFormer,
            BackendParams::Gfpgan(_) => BackendKind::Gfpgan,
            BackendParams::RefLdm(_) => BackendKind::RefLdm,
        }
    }

    /// Input file name without extension, e.g. `face1` for `inputs/face1.jpg`.
    pub fn input_stem(&self) -> String {
        self.input_path
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

impl RawRequest {
    /// Check every field and build the closed request.
    ///
    /// Never touches anything but file metadata; no process is started here.
    pub fn validate(&self) -> Result<RestorationRequest, Failure> {
        let kind_name = self
            .backend_kind
            .as_deref()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| Failure::validation("backend_kind", "backend_kind is required"))?;
        let kind: BackendKind = kind_name
            .parse()
            .map_err(|e: String| Failure::validation("backend_kind", e))?;

        let input_path = readable_file("input_path", self.input_path.as_deref())?;

        let params = match kind {
            BackendKind::CodeFormer => BackendParams::CodeFormer(CodeFormerParams {
                weight: unit_interval("weight", self.weight)?,
            }),
            BackendKind::Gfpgan => {
                let version = self
                    .version
                    .as_ref()
                    .ok_or_else(|| Failure::validation("version", "version is required"))?
                    .parse()
                    .map_err(|e| Failure::validation("version", e))?;
                let upscale = self
                    .upscale
                    .ok_or_else(|| Failure::validation("upscale", "upscale is required"))?;
                let upscale = u32::try_from(upscale)
                    .ok()
                    .filter(|u| *u >= 1)
                    .ok_or_else(|| {
                        Failure::validation(
                            "upscale",
                            format!("upscale must be >= 1, got {upscale}"),
                        )
                    })?;
                BackendParams::Gfpgan(GfpganParams {
                    version,
                    upscale,
                    weight: unit_interval("weight", self.weight)?,
                })
            }
            BackendKind::RefLdm => {
                let refs = self
                    .ref_paths
                    .as_ref()
                    .filter(|refs| !refs.is_empty())
                    .ok_or_else(|| {
                        Failure::validation("ref_paths", "at least one reference image is required")
                    })?;
                let ref_paths = refs
                    .iter()
                    .map(|r| readable_file("ref_paths", Some(r)))
                    .collect::<Result<Vec<_>, _>>()?;

                let cfg_scale = self
                    .cfg_scale
                    .ok_or_else(|| Failure::validation("cfg_scale", "cfg_scale is required"))?;
                if !cfg_scale.is_finite() || cfg_scale <= 0.0 {
                    return Err(Failure::validation(
                        "cfg_scale",
                        format!("cfg_scale must be a positive number, got {cfg_scale}"),
                    ));
                }

                let steps = self
                    .ddim_steps
                    .ok_or_else(|| Failure::validation("ddim_step", "ddim_step is required"))?;
                let ddim_steps = u32::try_from(steps)
                    .ok()
                    .filter(|s| *s > 0)
                    .ok_or_else(|| {
                        Failure::validation(
                            "ddim_step",
                            format!("ddim_step must be > 0, got {steps}"),
                        )
                    })?;

                let seed = self
                    .seed
                    .ok_or_else(|| Failure::validation("seed", "seed is required"))?;

                BackendParams::RefLdm(RefLdmParams {
                    ref_paths,
                    cfg_scale,
                    ddim_steps,
                    seed,
                })
            }
        };

        let (output_root, output_name) = split_output_path(kind, self.output_path.as_deref());

        Ok(RestorationRequest {
            input_path,
            output_root,
            output_name,
            params,
        })
    }
}

fn unit_interval(field: &str, value: Option<f64>) -> Result<f64, Failure> {
    let value = value.ok_or_else(|| Failure::validation(field, format!("{field} is required")))?;
    if !(0.0..=1.0).contains(&value) {
        return Err(Failure::validation(
            field,
            format!("{field} must be within [0, 1], got {value}"),
        ));
    }
    Ok(value)
}

fn readable_file(field: &str, raw: Option<&str>) -> Result<PathBuf, Failure> {
    let raw = raw
        .filter(|p| !p.trim().is_empty())
        .ok_or_else(|| Failure::validation(field, format!("{field} is required")))?;

    let path = std::fs::canonicalize(raw)
        .map_err(|_| Failure::validation(field, format!("file does not exist: {raw}")))?;

    let metadata = std::fs::metadata(&path)
        .map_err(|e| Failure::validation(field, format!("cannot stat {raw}: {e}")))?;
    if !metadata.is_file() {
        return Err(Failure::validation(
            field,
            format!("not a regular file: {raw}"),
        ));
    }
    File::open(&path)
        .map_err(|e| Failure::validation(field, format!("file is not readable: {raw}: {e}")))?;

    Ok(path)
}

/// Ref-LDM historically took a file path for its output; the face restorers
/// took a directory. A file-like path contributes both a root and a name.
fn split_output_path(kind: BackendKind, raw: Option<&str>) -> (Option<PathBuf>, Option<String>) {
    let Some(raw) = raw.filter(|p| !p.trim().is_empty()) else {
        return (None, None);
    };
    let path = Path::new(raw);

    if kind == BackendKind::RefLdm && has_image_extension(path) {
        let root = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(Path::to_path_buf);
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned());
        return (root, name);
    }

    (Some(path.to_path_buf()), None)
}

pub(crate) fn has_image_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|ext| {
            IMAGE_EXTENSIONS
                .iter()
                .any(|known| known.eq_ignore_ascii_case(ext))
        })
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::FailureKind;

    fn touch(dir: &Path, name: &str) -> String {
        let path = dir.join(name);
        std::fs::write(&path, b"img").unwrap();
        path.to_string_lossy().into_owned()
    }

    fn codeformer(input: &str, weight: Option<f64>) -> RawRequest {
        RawRequest {
            backend_kind: Some("codeformer".to_string()),
            input_path: Some(input.to_string()),
            weight,
            ..RawRequest::default()
        }
    }

    fn refldm(input: &str, refs: Vec<String>) -> RawRequest {
        RawRequest {
            backend_kind: Some("ref-ldm".to_string()),
            input_path: Some(input.to_string()),
            ref_paths: Some(refs),
            cfg_scale: Some(1.5),
            ddim_steps: Some(50),
            seed: Some(2024),
            ..RawRequest::default()
        }
    }

    fn field_of(failure: &Failure) -> &str {
        failure.diagnostics.field.as_deref().unwrap_or_default()
    }

    #[test]
    fn backend_kind_parses_aliases() {
        assert_eq!("CodeFormer".parse::<BackendKind>().unwrap(), BackendKind::CodeFormer);
        assert_eq!("GFPGAN".parse::<BackendKind>().unwrap(), BackendKind::Gfpgan);
        assert_eq!("ref-ldm".parse::<BackendKind>().unwrap(), BackendKind::RefLdm);
        assert_eq!("ref_ldm".parse::<BackendKind>().unwrap(), BackendKind::RefLdm);
        assert!("esrgan".parse::<BackendKind>().is_err());
    }

    #[test]
    fn gfpgan_version_accepts_text_and_number() {
        assert_eq!(VersionField::Number(1.4).parse().unwrap(), GfpganVersion::V1_4);
        assert_eq!(VersionField::Text("v1.3".into()).parse().unwrap(), GfpganVersion::V1_3);
        assert!(VersionField::Text("1.2".into()).parse().is_err());
    }

    #[test]
    fn missing_backend_kind_is_validation_error() {
        let failure = RawRequest::default().validate().unwrap_err();
        assert_eq!(failure.kind, FailureKind::Validation);
        assert_eq!(field_of(&failure), "backend_kind");
    }

    #[test]
    fn unknown_backend_kind_is_validation_error() {
        let raw = RawRequest {
            backend_kind: Some("dalle".into()),
            ..RawRequest::default()
        };
        let failure = raw.validate().unwrap_err();
        assert!(failure.message.contains("dalle"));
    }

    #[test]
    fn codeformer_request_validates() {
        let dir = tempfile::tempdir().unwrap();
        let input = touch(dir.path(), "face1.jpg");

        let request = codeformer(&input, Some(0.7)).validate().unwrap();
        assert_eq!(request.kind(), BackendKind::CodeFormer);
        assert_eq!(request.input_stem(), "face1");
        assert!(request.input_path.is_absolute());
        assert_eq!(
            request.params,
            BackendParams::CodeFormer(CodeFormerParams { weight: 0.7 })
        );
    }

    #[test]
    fn weight_outside_unit_interval_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let input = touch(dir.path(), "face1.jpg");

        for weight in [-0.1, 1.01, f64::NAN] {
            let failure = codeformer(&input, Some(weight)).validate().unwrap_err();
            assert_eq!(field_of(&failure), "weight");
        }
        assert!(codeformer(&input, Some(0.0)).validate().is_ok());
        assert!(codeformer(&input, Some(1.0)).validate().is_ok());
    }

    #[test]
    fn missing_weight_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let input = touch(dir.path(), "face1.jpg");
        let failure = codeformer(&input, None).validate().unwrap_err();
        assert_eq!(field_of(&failure), "weight");
    }

    #[test]
    fn nonexistent_input_rejected() {
        let failure = codeformer("/definitely/not/here.png", Some(0.5))
            .validate()
            .unwrap_err();
        assert_eq!(failure.kind, FailureKind::Validation);
        assert_eq!(field_of(&failure), "input_path");
        assert!(failure.message.contains("does not exist"));
    }

    #[test]
    fn directory_input_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let failure = codeformer(dir.path().to_str().unwrap(), Some(0.5))
            .validate()
            .unwrap_err();
        assert!(failure.message.contains("not a regular file"));
    }

    #[test]
    fn gfpgan_requires_positive_upscale() {
        let dir = tempfile::tempdir().unwrap();
        let input = touch(dir.path(), "face1.jpg");
        let mut raw = RawRequest {
            backend_kind: Some("gfpgan".into()),
            input_path: Some(input),
            version: Some(VersionField::Text("1.4".into())),
            upscale: Some(0),
            weight: Some(0.5),
            ..RawRequest::default()
        };
        assert_eq!(field_of(&raw.validate().unwrap_err()), "upscale");

        raw.upscale = Some(2);
        let request = raw.validate().unwrap();
        assert_eq!(
            request.params,
            BackendParams::Gfpgan(GfpganParams {
                version: GfpganVersion::V1_4,
                upscale: 2,
                weight: 0.5,
            })
        );
    }

    #[test]
    fn refldm_requires_references() {
        let dir = tempfile::tempdir().unwrap();
        let input = touch(dir.path(), "lq.png");
        let failure = refldm(&input, vec![]).validate().unwrap_err();
        assert_eq!(field_of(&failure), "ref_paths");
    }

    #[test]
    fn refldm_rejects_missing_reference_file() {
        let dir = tempfile::tempdir().unwrap();
        let input = touch(dir.path(), "lq.png");
        let good = touch(dir.path(), "ref1.png");
        let failure = refldm(&input, vec![good, "/nope/ref2.png".into()])
            .validate()
            .unwrap_err();
        assert_eq!(field_of(&failure), "ref_paths");
        assert!(failure.message.contains("/nope/ref2.png"));
    }

    #[test]
    fn refldm_preserves_reference_order() {
        let dir = tempfile::tempdir().unwrap();
        let input = touch(dir.path(), "lq.png");
        let b = touch(dir.path(), "b.png");
        let a = touch(dir.path(), "a.png");

        let request = refldm(&input, vec![b.clone(), a.clone()]).validate().unwrap();
        let BackendParams::RefLdm(params) = request.params else {
            panic!("expected RefLdm params");
        };
        let names: Vec<_> = params
            .ref_paths
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["b.png", "a.png"]);
    }

    #[test]
    fn refldm_rejects_bad_numbers() {
        let dir = tempfile::tempdir().unwrap();
        let input = touch(dir.path(), "lq.png");
        let reference = touch(dir.path(), "ref.png");

        let mut raw = refldm(&input, vec![reference.clone()]);
        raw.cfg_scale = Some(0.0);
        assert_eq!(field_of(&raw.validate().unwrap_err()), "cfg_scale");

        let mut raw = refldm(&input, vec![reference]);
        raw.ddim_steps = Some(-5);
        assert_eq!(field_of(&raw.validate().unwrap_err()), "ddim_step");
    }

    #[test]
    fn refldm_file_like_output_path_splits() {
        let dir = tempfile::tempdir().unwrap();
        let input = touch(dir.path(), "lq.png");
        let reference = touch(dir.path(), "ref.png");

        let mut raw = refldm(&input, vec![reference]);
        raw.output_path = Some("out/gen/result.PNG".into());
        let request = raw.validate().unwrap();
        assert_eq!(request.output_root, Some(PathBuf::from("out/gen")));
        assert_eq!(request.output_name.as_deref(), Some("result.PNG"));

        raw.output_path = Some("result.png".into());
        let request = raw.validate().unwrap();
        assert_eq!(request.output_root, None);
        assert_eq!(request.output_name.as_deref(), Some("result.png"));
    }

    #[test]
    fn face_backend_output_path_is_a_root() {
        let dir = tempfile::tempdir().unwrap();
        let input = touch(dir.path(), "face1.jpg");
        let mut raw = codeformer(&input, Some(0.5));
        raw.output_path = Some("results/custom.png".into());
        let request = raw.validate().unwrap();
        assert_eq!(request.output_root, Some(PathBuf::from("results/custom.png")));
        assert_eq!(request.output_name, None);
    }
}
