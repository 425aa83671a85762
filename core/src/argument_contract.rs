//! Argument contract: TaskRequest → ArgumentVector, and back-validation.
//!
//! The vector is a fixed-length positional payload the generation engine
//! expects; position semantics are frozen by contract version 1.

use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::{DispatchError, Result};

pub const CONTRACT_VERSION: u32 = 1;
pub const VECTOR_LEN: usize = 152;

pub const DEFAULT_MAX_LORA_NUMBER: usize = 5;
const DEFAULT_CONTROLNET_IMAGE_COUNT: usize = 4;
const DEFAULT_ENHANCE_TABS: usize = 3;

/// One LoRA slot: `(enabled, name, weight)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoraSlot {
    pub enabled: bool,
    pub name: String,
    pub weight: f64,
}

impl Default for LoraSlot {
    fn default() -> Self {
        Self { enabled: false, name: "None".to_string(), weight: 1.0 }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Png,
    Jpeg,
    Webp,
}

impl OutputFormat {
    pub fn extension(self) -> &'static str {
        match self {
            OutputFormat::Png => "png",
            OutputFormat::Jpeg => "jpg",
            OutputFormat::Webp => "webp",
        }
    }
}

/// User-supplied generation request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRequest {
    pub prompt: String,
    #[serde(default)]
    pub negative_prompt: String,
    #[serde(default)]
    pub style_selections: Vec<String>,
    #[serde(default = "default_performance")]
    pub performance_selection: String,
    #[serde(default = "default_aspect_ratio")]
    pub aspect_ratio: String,
    #[serde(default = "default_image_number")]
    pub image_number: i64,
    #[serde(default = "default_image_seed")]
    pub image_seed: i64,
    #[serde(default)]
    pub seed_random: bool,
    #[serde(default = "default_sharpness")]
    pub image_sharpness: f64,
    #[serde(default = "default_guidance_scale")]
    pub guidance_scale: f64,
    #[serde(default = "default_base_model")]
    pub base_model_name: String,
    #[serde(default = "default_refiner_model")]
    pub refiner_model_name: String,
    #[serde(default = "default_refiner_switch")]
    pub refiner_switch: f64,
    #[serde(default = "default_sampler")]
    pub sampler_name: String,
    #[serde(default = "default_scheduler")]
    pub scheduler_name: String,
    #[serde(default = "default_vae")]
    pub vae_name: String,
    #[serde(default)]
    pub output_format: OutputFormat,
    #[serde(default = "default_clip_skip")]
    pub clip_skip: i64,
    #[serde(default)]
    pub loras: Vec<LoraSlot>,
}

fn default_performance() -> String { "Speed".to_string() }
fn default_aspect_ratio() -> String { "1024×1024".to_string() }
fn default_image_number() -> i64 { 1 }
fn default_image_seed() -> i64 { -1 }
fn default_sharpness() -> f64 { 2.0 }
fn default_guidance_scale() -> f64 { 4.0 }
fn default_base_model() -> String { "juggernautXL_v8Rundiffusion.safetensors".to_string() }
fn default_refiner_model() -> String { "None".to_string() }
fn default_refiner_switch() -> f64 { 0.5 }
fn default_sampler() -> String { "dpmpp_2m_sde_gpu".to_string() }
fn default_scheduler() -> String { "karras".to_string() }
fn default_vae() -> String { "Default (model)".to_string() }
fn default_clip_skip() -> i64 { 2 }

impl TaskRequest {
    /// Validate the request shape before it is lowered to an ArgumentVector.
    /// Keeps field-level checks out of `build`, which assumes a sane input.
    pub fn validate(&self, max_clip_skip: i64) -> Result<()> {
        if self.prompt.trim().is_empty() {
            return Err(DispatchError::Validation("prompt must not be empty".into()));
        }
        if self.image_number < 1 {
            return Err(DispatchError::Validation("image_number must be >= 1".into()));
        }
        if self.image_sharpness < 0.0 {
            return Err(DispatchError::Validation("image_sharpness must be >= 0".into()));
        }
        if self.guidance_scale < 0.0 {
            return Err(DispatchError::Validation("guidance_scale must be >= 0".into()));
        }
        if !(0.0..=1.0).contains(&self.refiner_switch) {
            return Err(DispatchError::Validation("refiner_switch must be in [0,1]".into()));
        }
        if self.clip_skip < 1 || self.clip_skip > max_clip_skip {
            return Err(DispatchError::Validation(format!(
                "clip_skip must be in [1,{max_clip_skip}]"
            )));
        }
        if self.loras.len() > DEFAULT_MAX_LORA_NUMBER {
            return Err(DispatchError::Validation(format!(
                "loras length {} exceeds max {}",
                self.loras.len(),
                DEFAULT_MAX_LORA_NUMBER
            )));
        }
        Ok(())
    }
}

/// One position in the argument vector. Untagged so the JSON wire form is
/// the plain positional array the worker expects, not a tagged enum.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ArgValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    StrList(Vec<String>),
    Null,
}

impl ArgValue {
    fn is_bool(&self) -> bool {
        matches!(self, ArgValue::Bool(_))
    }
    fn is_string(&self) -> bool {
        matches!(self, ArgValue::Str(_))
    }
    fn is_string_list(&self) -> bool {
        matches!(self, ArgValue::StrList(_))
    }
    fn is_number(&self) -> bool {
        matches!(self, ArgValue::Int(_) | ArgValue::Float(_))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArgumentVector(pub Vec<ArgValue>);

fn resolved_seed(request: &TaskRequest) -> i64 {
    if request.seed_random || request.image_seed == -1 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0)
    } else {
        request.image_seed
    }
}

/// Build a 152-element ArgumentVector from a TaskRequest, padding/defaulting
/// every position the gateway doesn't own with the documented defaults.
pub fn build(request: &TaskRequest) -> ArgumentVector {
    let mut v = Vec::with_capacity(VECTOR_LEN);

    v.push(ArgValue::Bool(false)); // 0: generate_image_grid
    v.push(ArgValue::Str(request.prompt.clone())); // 1
    v.push(ArgValue::Str(request.negative_prompt.clone())); // 2
    v.push(ArgValue::StrList(request.style_selections.clone())); // 3
    v.push(ArgValue::Str(request.performance_selection.clone())); // 4
    v.push(ArgValue::Str(request.aspect_ratio.clone())); // 5
    v.push(ArgValue::Int(request.image_number)); // 6
    v.push(ArgValue::Str(request.output_format.extension().to_string())); // 7
    v.push(ArgValue::Int(resolved_seed(request))); // 8
    v.push(ArgValue::Bool(request.seed_random)); // 9
    v.push(ArgValue::Float(request.image_sharpness)); // 10
    v.push(ArgValue::Float(request.guidance_scale)); // 11
    v.push(ArgValue::Str(request.base_model_name.clone())); // 12
    v.push(ArgValue::Str(request.refiner_model_name.clone())); // 13
    v.push(ArgValue::Float(request.refiner_switch)); // 14

    for i in 0..DEFAULT_MAX_LORA_NUMBER {
        if let Some(slot) = request.loras.get(i) {
            v.push(ArgValue::Bool(slot.enabled));
            v.push(ArgValue::Str(slot.name.clone()));
            v.push(ArgValue::Float(slot.weight));
        } else {
            let slot = LoraSlot::default();
            v.push(ArgValue::Bool(slot.enabled));
            v.push(ArgValue::Str(slot.name));
            v.push(ArgValue::Float(slot.weight));
        }
    }

    // Fixed block of 50 engine-specific parameters (input image / inpaint /
    // ADM / canny / FreeU / metadata scheme), all disabled/defaulted since
    // this surface doesn't expose image-to-image inputs.
    v.push(ArgValue::Bool(false)); // input_image_checkbox
    v.push(ArgValue::Str("uov".into())); // current_tab
    v.push(ArgValue::Str("Disabled".into())); // uov_method
    v.push(ArgValue::Null); // uov_input_image
    v.push(ArgValue::StrList(vec![])); // outpaint_selections
    v.push(ArgValue::Null); // inpaint_input_image
    v.push(ArgValue::Str(String::new())); // inpaint_additional_prompt
    v.push(ArgValue::Null); // inpaint_mask_image_upload
    v.push(ArgValue::Bool(false)); // disable_preview
    v.push(ArgValue::Bool(false)); // disable_intermediate_results
    v.push(ArgValue::Bool(false)); // disable_seed_increment
    v.push(ArgValue::Bool(false)); // black_out_nsfw
    v.push(ArgValue::Float(1.5)); // adm_scaler_positive
    v.push(ArgValue::Float(0.8)); // adm_scaler_negative
    v.push(ArgValue::Float(0.3)); // adm_scaler_end
    v.push(ArgValue::Bool(false)); // adaptive_cfg
    v.push(ArgValue::Int(request.clip_skip)); // clip_skip
    v.push(ArgValue::Str(request.sampler_name.clone())); // sampler_name
    v.push(ArgValue::Str(request.scheduler_name.clone())); // scheduler_name
    v.push(ArgValue::Str(request.vae_name.clone())); // vae_name
    v.push(ArgValue::Int(-1)); // overwrite_step
    v.push(ArgValue::Int(-1)); // overwrite_switch
    v.push(ArgValue::Int(-1)); // overwrite_width
    v.push(ArgValue::Int(-1)); // overwrite_height
    v.push(ArgValue::Int(-1)); // overwrite_vary_strength
    v.push(ArgValue::Int(-1)); // overwrite_upscale_strength
    v.push(ArgValue::Bool(false)); // mixing_image_prompt_and_vary_upscale
    v.push(ArgValue::Bool(false)); // mixing_image_prompt_and_inpaint
    v.push(ArgValue::Bool(false)); // debugging_cn_preprocessor
    v.push(ArgValue::Bool(false)); // skipping_cn_preprocessor
    v.push(ArgValue::Int(64)); // canny_low_threshold
    v.push(ArgValue::Int(128)); // canny_high_threshold
    v.push(ArgValue::Str("joint".into())); // refiner_swap_method
    v.push(ArgValue::Float(0.25)); // controlnet_softness
    v.push(ArgValue::Bool(false)); // freeu_enabled
    v.push(ArgValue::Float(1.1)); // freeu_b1
    v.push(ArgValue::Float(1.2)); // freeu_b2
    v.push(ArgValue::Float(0.9)); // freeu_s1
    v.push(ArgValue::Float(0.2)); // freeu_s2
    v.push(ArgValue::Bool(false)); // debugging_inpaint_preprocessor
    v.push(ArgValue::Bool(false)); // inpaint_disable_initial_latent
    v.push(ArgValue::Str("None".into())); // inpaint_engine
    v.push(ArgValue::Float(1.0)); // inpaint_strength
    v.push(ArgValue::Float(0.0)); // inpaint_respective_field
    v.push(ArgValue::Bool(false)); // inpaint_advanced_masking_checkbox
    v.push(ArgValue::Bool(false)); // invert_mask_checkbox
    v.push(ArgValue::Int(0)); // inpaint_erode_or_dilate
    v.push(ArgValue::Bool(false)); // save_only_final_enhanced_image
    v.push(ArgValue::Bool(true)); // save_metadata_to_images
    v.push(ArgValue::Str("a1111".into())); // metadata_scheme

    debug_assert_eq!(v.len(), 15 + DEFAULT_MAX_LORA_NUMBER * 3 + 50);

    for _ in 0..DEFAULT_CONTROLNET_IMAGE_COUNT {
        v.push(ArgValue::Null); // image
        v.push(ArgValue::Float(1.0)); // weight
        v.push(ArgValue::Float(1.0)); // stop
        v.push(ArgValue::Str("ImagePrompt".into())); // type
    }

    v.push(ArgValue::Bool(false)); // debugging_dino
    v.push(ArgValue::Int(0)); // dino_erode_or_dilate
    v.push(ArgValue::Bool(false)); // debugging_enhance_masks_checkbox
    v.push(ArgValue::Null); // enhance_input_image
    v.push(ArgValue::Bool(false)); // enhance_checkbox
    v.push(ArgValue::Str("Disabled".into())); // enhance_uov_method
    v.push(ArgValue::Bool(true)); // enhance_uov_processing_order (before)
    v.push(ArgValue::Bool(true)); // enhance_uov_prompt_type (original)

    for _ in 0..DEFAULT_ENHANCE_TABS {
        v.push(ArgValue::Bool(false));
        v.push(ArgValue::Str(String::new()));
        v.push(ArgValue::Str(String::new()));
        v.push(ArgValue::Str(String::new()));
        v.push(ArgValue::Str("None".into()));
        v.push(ArgValue::Str("None".into()));
        v.push(ArgValue::Str("None".into()));
        v.push(ArgValue::Float(0.3));
        v.push(ArgValue::Float(0.25));
        v.push(ArgValue::Int(0));
        v.push(ArgValue::Bool(false));
        v.push(ArgValue::Str("None".into()));
        v.push(ArgValue::Float(1.0));
        v.push(ArgValue::Float(0.618));
        v.push(ArgValue::Int(0));
        v.push(ArgValue::Bool(false));
    }

    debug_assert_eq!(v.len(), VECTOR_LEN);
    ArgumentVector(v)
}

/// Check length and the type contract at the positions the gateway and
/// worker both rely on. Everything else is opaque.
pub fn validate(vec: &ArgumentVector, contract_version: u32) -> std::result::Result<(), String> {
    if contract_version != CONTRACT_VERSION {
        return Err(format!(
            "contract version mismatch: got {contract_version}, expected {CONTRACT_VERSION}"
        ));
    }
    if vec.0.len() != VECTOR_LEN {
        return Err(format!(
            "argument vector length mismatch: got {}, expected {VECTOR_LEN}",
            vec.0.len()
        ));
    }
    type PositionCheck = (usize, fn(&ArgValue) -> bool, &'static str);
    let checks: &[PositionCheck] = &[
        (0, ArgValue::is_bool, "bool"),
        (1, ArgValue::is_string, "string"),
        (2, ArgValue::is_string, "string"),
        (3, ArgValue::is_string_list, "list-of-string"),
        (6, ArgValue::is_number, "number"),
        (8, ArgValue::is_number, "number"),
        (9, ArgValue::is_bool, "bool"),
    ];
    for (idx, check, label) in checks {
        if !check(&vec.0[*idx]) {
            return Err(format!("argument vector[{idx}] must be {label}"));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_request() -> TaskRequest {
        TaskRequest {
            prompt: "a cat".to_string(),
            negative_prompt: String::new(),
            style_selections: vec!["Default".to_string()],
            performance_selection: default_performance(),
            aspect_ratio: default_aspect_ratio(),
            image_number: 1,
            image_seed: 42,
            seed_random: false,
            image_sharpness: default_sharpness(),
            guidance_scale: default_guidance_scale(),
            base_model_name: "base.safetensors".to_string(),
            refiner_model_name: default_refiner_model(),
            refiner_switch: default_refiner_switch(),
            sampler_name: default_sampler(),
            scheduler_name: default_scheduler(),
            vae_name: default_vae(),
            output_format: OutputFormat::Png,
            clip_skip: 2,
            loras: vec![],
        }
    }

    #[test]
    fn minimal_json_request_fills_every_default() {
        let req: TaskRequest = serde_json::from_str(r#"{"prompt":"a cat"}"#).unwrap();
        assert_eq!(req.base_model_name, default_base_model());
        assert_eq!(req.aspect_ratio, default_aspect_ratio());
        assert_eq!(req.image_number, 1);
        assert!(req.validate(12).is_ok());
    }

    #[test]
    fn build_produces_152_elements() {
        let v = build(&sample_request());
        assert_eq!(v.0.len(), VECTOR_LEN);
        assert!(validate(&v, CONTRACT_VERSION).is_ok());
    }

    #[test]
    fn validate_rejects_wrong_contract_version() {
        let v = build(&sample_request());
        let err = validate(&v, 0).unwrap_err();
        assert!(err.contains("contract version"));
    }

    #[test]
    fn validate_rejects_wrong_length() {
        let mut v = build(&sample_request());
        v.0.pop();
        let err = validate(&v, CONTRACT_VERSION).unwrap_err();
        assert!(err.contains("length"));
    }

    #[test]
    fn explicit_seed_is_preserved_when_not_random() {
        let req = sample_request();
        let v = build(&req);
        match &v.0[8] {
            ArgValue::Int(seed) => assert_eq!(*seed, 42),
            other => panic!("unexpected seed value: {other:?}"),
        }
    }

    #[test]
    fn random_seed_overrides_explicit_value() {
        let mut req = sample_request();
        req.seed_random = true;
        req.image_seed = 42;
        let v = build(&req);
        match &v.0[8] {
            ArgValue::Int(seed) => assert_ne!(*seed, 42),
            other => panic!("unexpected seed value: {other:?}"),
        }
    }

    #[test]
    fn too_many_loras_is_rejected() {
        let mut req = sample_request();
        req.loras = (0..DEFAULT_MAX_LORA_NUMBER + 1)
            .map(|i| LoraSlot { enabled: true, name: format!("lora-{i}"), weight: 1.0 })
            .collect();
        assert!(req.validate(10).is_err());
    }

    #[test]
    fn loras_shorter_than_max_are_padded_by_build() {
        let mut req = sample_request();
        req.loras = vec![LoraSlot { enabled: true, name: "style".into(), weight: 0.8 }];
        let v = build(&req);
        // position 15 is the first lora's `enabled` flag, 16 its name.
        match (&v.0[15], &v.0[16]) {
            (ArgValue::Bool(true), ArgValue::Str(name)) => assert_eq!(name, "style"),
            other => panic!("unexpected first lora slot: {other:?}"),
        }
        // the padded second slot should be the documented default.
        match (&v.0[18], &v.0[19]) {
            (ArgValue::Bool(false), ArgValue::Str(name)) => assert_eq!(name, "None"),
            other => panic!("unexpected padded lora slot: {other:?}"),
        }
    }
}
