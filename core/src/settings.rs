//! Settings Surface (`GET /settings`): the read-only capability snapshot
//! describing what a client may legally put into a `TaskRequest`.

use serde::{Deserialize, Serialize};

use crate::argument_contract::DEFAULT_MAX_LORA_NUMBER;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapabilitySnapshot {
    pub base_models: Vec<String>,
    pub refiner_models: Vec<String>,
    pub loras: Vec<String>,
    pub vaes: Vec<String>,
    pub aspect_ratios: Vec<String>,
    pub performance_options: Vec<String>,
    pub samplers: Vec<String>,
    pub schedulers: Vec<String>,
    pub styles: Vec<String>,
    pub output_formats: Vec<String>,
    pub presets: Vec<String>,
    pub clip_skip_max: i64,
    pub default_lora_count: usize,
}

impl Default for CapabilitySnapshot {
    fn default() -> Self {
        Self {
            base_models: vec!["juggernautXL_v8Rundiffusion.safetensors".to_string()],
            refiner_models: vec!["None".to_string()],
            loras: vec!["None".to_string(), "sd_xl_offset_example-lora_1.0.safetensors".to_string()],
            vaes: vec!["Default (model)".to_string()],
            aspect_ratios: vec![
                "704×1408".to_string(),
                "832×1216".to_string(),
                "960×1152".to_string(),
                "1024×1024".to_string(),
                "1152×960".to_string(),
                "1216×832".to_string(),
                "1408×704".to_string(),
            ],
            performance_options: vec!["Speed".to_string(), "Quality".to_string(), "Extreme Speed".to_string()],
            samplers: vec!["dpmpp_2m_sde_gpu".to_string(), "euler".to_string(), "euler_ancestral".to_string()],
            schedulers: vec!["karras".to_string(), "normal".to_string(), "simple".to_string()],
            styles: vec!["Default".to_string(), "Enhance".to_string(), "Sharp".to_string()],
            output_formats: vec!["png".to_string(), "jpeg".to_string(), "webp".to_string()],
            presets: vec!["default".to_string(), "anime".to_string(), "realistic".to_string()],
            clip_skip_max: 12,
            default_lora_count: DEFAULT_MAX_LORA_NUMBER,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PresetBundle {
    pub name: String,
    pub body: serde_json::Value,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_snapshot_matches_contract_lora_cap() {
        let snap = CapabilitySnapshot::default();
        assert_eq!(snap.default_lora_count, DEFAULT_MAX_LORA_NUMBER);
        assert!(snap.output_formats.contains(&"png".to_string()));
    }
}
