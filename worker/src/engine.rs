//! Simulated generation engine. Stands in for the real diffusion pipeline:
//! consumes a validated argument vector, emits progress frames with a small
//! JPEG preview, and writes one PNG artifact per requested image.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use base64::Engine as _;
use chrono::Utc;
use dispatch_core::argument_contract::ArgValue;
use dispatch_core::protocol::ProgressResponse;
use image::{ImageBuffer, ImageFormat, Rgba};
use tokio::sync::mpsc;
use tokio::time::Duration;

const STEPS_PER_IMAGE: u32 = 10;

pub struct EngineJob {
    pub task_id: String,
    pub args: Vec<ArgValue>,
    pub output_dir: PathBuf,
    pub stop_flag: Arc<AtomicBool>,
}

struct ParsedArgs {
    image_number: u32,
    output_format: String,
    width: u32,
    height: u32,
    seed: i64,
}

fn parse_args(args: &[ArgValue]) -> ParsedArgs {
    let image_number = match args.get(6) {
        Some(ArgValue::Int(n)) => (*n).max(1) as u32,
        _ => 1,
    };
    let output_format = match args.get(7) {
        Some(ArgValue::Str(s)) => s.clone(),
        _ => "png".to_string(),
    };
    let (width, height) = match args.get(5) {
        Some(ArgValue::Str(ratio)) => parse_aspect_ratio(ratio),
        _ => (1024, 1024),
    };
    let seed = match args.get(8) {
        Some(ArgValue::Int(n)) => *n,
        _ => 0,
    };
    ParsedArgs { image_number, output_format, width, height, seed }
}

fn parse_aspect_ratio(ratio: &str) -> (u32, u32) {
    let cleaned = ratio.replace(['×', 'X'], "x");
    let mut parts = cleaned.split('x');
    let w = parts.next().and_then(|s| s.trim().parse().ok()).unwrap_or(1024);
    let h = parts.next().and_then(|s| s.trim().parse().ok()).unwrap_or(1024);
    (w, h)
}

/// Runs the job to completion, sending progress updates as they occur and
/// returning the relative artifact paths on success.
pub async fn run(
    job: EngineJob,
    progress_tx: mpsc::Sender<ProgressResponse>,
) -> Result<Vec<String>, String> {
    let parsed = parse_args(&job.args);
    let date_dir = Utc::now().format("%Y-%m-%d").to_string();
    let dir = job.output_dir.join(&date_dir);
    tokio::fs::create_dir_all(&dir).await.map_err(|e| e.to_string())?;

    let mut results = Vec::with_capacity(parsed.image_number as usize);
    let total_steps = parsed.image_number * STEPS_PER_IMAGE;

    for image_idx in 0..parsed.image_number {
        for step in 0..STEPS_PER_IMAGE {
            if job.stop_flag.load(Ordering::Relaxed) {
                return Err("Stopped".to_string());
            }

            let done = image_idx * STEPS_PER_IMAGE + step;
            let percentage = ((done as f64 / total_steps as f64) * 100.0) as u8;
            let preview = if step == STEPS_PER_IMAGE / 2 {
                Some(render_preview(parsed.seed + image_idx as i64, step))
            } else {
                None
            };

            let _ = progress_tx
                .send(ProgressResponse {
                    percentage,
                    status_text: format!("Sampling image {}/{}...", image_idx + 1, parsed.image_number),
                    finished: false,
                    preview,
                    results: vec![],
                    error: None,
                })
                .await;

            tokio::time::sleep(Duration::from_millis(30)).await;
        }

        let filename = format!("{}_{}.{}", job.task_id, image_idx, extension_for(&parsed.output_format));
        let path = dir.join(&filename);
        render_final(parsed.seed + image_idx as i64, parsed.width, parsed.height, &parsed.output_format, &path)
            .map_err(|e| e.to_string())?;
        results.push(format!("{date_dir}/{filename}"));
    }

    Ok(results)
}

fn extension_for(output_format: &str) -> &'static str {
    match output_format {
        "jpeg" | "jpg" => "jpg",
        "webp" => "webp",
        _ => "png",
    }
}

/// Small gradient JPEG, base64-encoded, used as a mid-render preview.
fn render_preview(seed: i64, step: u32) -> String {
    let width = 64;
    let height = 64;
    let buf = gradient_buffer(seed, step, width, height);
    let mut bytes = Vec::new();
    let mut cursor = std::io::Cursor::new(&mut bytes);
    let _ = buf.write_to(&mut cursor, ImageFormat::Jpeg);
    base64::engine::general_purpose::STANDARD.encode(&bytes)
}

fn render_final(
    seed: i64,
    width: u32,
    height: u32,
    output_format: &str,
    path: &Path,
) -> Result<(), String> {
    let buf = gradient_buffer(seed, STEPS_PER_IMAGE, width, height);
    let format = match output_format {
        "jpeg" | "jpg" => ImageFormat::Jpeg,
        "webp" => ImageFormat::WebP,
        _ => ImageFormat::Png,
    };
    buf.save_with_format(path, format).map_err(|e| e.to_string())
}

fn gradient_buffer(seed: i64, step: u32, width: u32, height: u32) -> ImageBuffer<Rgba<u8>, Vec<u8>> {
    let mut img = ImageBuffer::new(width, height);
    let seed = seed.unsigned_abs() as u32;
    for y in 0..height {
        for x in 0..width {
            let r = ((x + seed + step * 8) % 256) as u8;
            let g = ((y + seed + step * 4) % 256) as u8;
            let b = ((step * 16 + seed) % 256) as u8;
            img.put_pixel(x, y, Rgba([r, g, b, 255]));
        }
    }
    img
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_aspect_ratio_with_multiplication_sign() {
        assert_eq!(parse_aspect_ratio("1024×1024"), (1024, 1024));
        assert_eq!(parse_aspect_ratio("1152x960"), (1152, 960));
    }

    #[test]
    fn extension_matches_requested_format() {
        assert_eq!(extension_for("jpeg"), "jpg");
        assert_eq!(extension_for("webp"), "webp");
        assert_eq!(extension_for("png"), "png");
    }

    #[tokio::test]
    async fn run_produces_one_artifact_per_image() {
        let tmp = std::env::temp_dir().join(format!("engine-test-{}", uuid::Uuid::new_v4()));
        let job = EngineJob {
            task_id: "t1".to_string(),
            args: vec![
                ArgValue::Bool(false),
                ArgValue::Str("".into()),
                ArgValue::Str("".into()),
                ArgValue::StrList(vec![]),
                ArgValue::Str("Speed".into()),
                ArgValue::Str("64x64".into()),
                ArgValue::Int(2),
                ArgValue::Str("png".into()),
                ArgValue::Int(42),
            ],
            output_dir: tmp.clone(),
            stop_flag: Arc::new(AtomicBool::new(false)),
        };
        let (tx, mut rx) = mpsc::channel(64);
        let handle = tokio::spawn(run(job, tx));
        while rx.recv().await.is_some() {}
        let results = handle.await.unwrap().unwrap();
        assert_eq!(results.len(), 2);
        tokio::fs::remove_dir_all(&tmp).await.ok();
    }

    #[tokio::test]
    async fn stop_flag_aborts_before_completion() {
        let tmp = std::env::temp_dir().join(format!("engine-test-{}", uuid::Uuid::new_v4()));
        let stop_flag = Arc::new(AtomicBool::new(true));
        let job = EngineJob {
            task_id: "t2".to_string(),
            args: vec![
                ArgValue::Bool(false),
                ArgValue::Str("".into()),
                ArgValue::Str("".into()),
                ArgValue::StrList(vec![]),
                ArgValue::Str("Speed".into()),
                ArgValue::Str("64x64".into()),
                ArgValue::Int(1),
                ArgValue::Str("png".into()),
                ArgValue::Int(1),
            ],
            output_dir: tmp.clone(),
            stop_flag,
        };
        let (tx, mut rx) = mpsc::channel(64);
        let handle = tokio::spawn(run(job, tx));
        while rx.recv().await.is_some() {}
        let err = handle.await.unwrap().unwrap_err();
        assert_eq!(err, "Stopped");
    }
}
