//! Embedded image metadata: PNG `tEXt` chunks (`parameters`, `scheme`) are
//! written after a successful generation and read back as the fallback path
//! when the metadata store has no row for a filename. JPEG/WEBP fall back
//! to the EXIF `UserComment` tag via `rexif` (read-only — nothing in this
//! stack embeds EXIF on write, so that path only serves externally-produced
//! artifacts).

use std::collections::HashMap;
use std::fs::File;
use std::path::Path;

use serde_json::Value as Json;

pub const PARAMETERS_KEY: &str = "parameters";
pub const SCHEME_KEY: &str = "scheme";
pub const SCHEME_VALUE: &str = "dispatch_log";

pub fn embed_png_metadata(path: &Path, metadata: &Json) -> anyhow::Result<()> {
    let img = image::open(path)?.to_rgba8();
    let (width, height) = img.dimensions();
    let parameters = serde_json::to_string(metadata)?;

    let file = File::create(path)?;
    let mut encoder = png::Encoder::new(file, width, height);
    encoder.set_color(png::ColorType::Rgba);
    encoder.set_depth(png::BitDepth::Eight);
    encoder.add_text_chunk(PARAMETERS_KEY.to_string(), parameters)?;
    encoder.add_text_chunk(SCHEME_KEY.to_string(), SCHEME_VALUE.to_string())?;
    let mut writer = encoder.write_header()?;
    writer.write_image_data(&img)?;
    Ok(())
}

fn read_png_text(path: &Path) -> anyhow::Result<HashMap<String, String>> {
    let decoder = png::Decoder::new(File::open(path)?);
    let reader = decoder.read_info()?;
    let mut out = HashMap::new();
    for chunk in &reader.info().uncompressed_latin1_text {
        out.insert(chunk.keyword.clone(), chunk.text.clone());
    }
    Ok(out)
}

fn read_exif_user_comment(path: &Path) -> Option<Json> {
    let exif = rexif::parse_file(path).ok()?;
    let entry = exif.entries.iter().find(|e| e.tag == rexif::ExifTag::UserComment)?;
    serde_json::from_str(&entry.value.to_string()).ok()
}

/// Fallback metadata lookup for a filename whose `MetadataStore` row is
/// missing: parse the artifact's own embedded metadata.
pub fn fallback_metadata(path: &Path) -> Option<Json> {
    match path.extension().and_then(|e| e.to_str()).map(|e| e.to_ascii_lowercase()) {
        Some(ext) if ext == "png" => {
            let text = read_png_text(path).ok()?;
            let raw = text.get(PARAMETERS_KEY)?;
            let mut parsed: Json = serde_json::from_str(raw).ok()?;
            if let Some(obj) = parsed.as_object_mut() {
                obj.insert("scheme".to_string(), Json::String(text.get(SCHEME_KEY).cloned().unwrap_or_default()));
            }
            Some(parsed)
        }
        Some(ext) if ext == "jpg" || ext == "jpeg" || ext == "webp" => read_exif_user_comment(path),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn embed_then_fallback_round_trips() {
        let tmp = std::env::temp_dir().join(format!("meta-test-{}.png", uuid::Uuid::new_v4()));
        let img = image::RgbaImage::new(4, 4);
        img.save(&tmp).unwrap();

        embed_png_metadata(&tmp, &json!({"prompt": "a cat", "seed": 42})).unwrap();
        let got = fallback_metadata(&tmp).unwrap();
        assert_eq!(got["prompt"], "a cat");
        assert_eq!(got["seed"], 42);
        assert_eq!(got["scheme"], SCHEME_VALUE);

        std::fs::remove_file(&tmp).ok();
    }
}
