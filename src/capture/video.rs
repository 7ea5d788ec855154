//! Video capture using yt-dlp, normalized to MP4 with ffmpeg.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::LazyLock;

use anyhow::{Context, Result};
use async_trait::async_trait;
use regex::Regex;
use tokio::process::Command;
use tracing::{debug, warn};

use super::traits::{CaptureError, CaptureResult, CaptureStrategy};
use crate::config::Config;
use crate::db::{ArchiveKind, MetaValue, Metadata};

/// yt-dlp writes the download as `original.<ext>`.
const ORIGINAL_STEM: &str = "original";
pub const VIDEO_FILE: &str = "archive.mp4";
pub const INFO_FILE: &str = "info.json";
pub const SUBTITLES_FILE: &str = "subtitles.txt";

/// Best video plus best audio, merged; single best stream otherwise.
const FORMAT_SELECTOR: &str = "bv*+ba/best";

static VTT_TAG: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<[^>]*>").unwrap());

/// External tool locations.
#[derive(Debug, Clone)]
pub struct VideoCaptureConfig {
    pub yt_dlp_path: String,
    pub ffmpeg_path: String,
}

impl VideoCaptureConfig {
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self {
            yt_dlp_path: config.yt_dlp_path.clone(),
            ffmpeg_path: config.ffmpeg_path.clone(),
        }
    }
}

/// Video capture strategy.
pub struct VideoCapture {
    config: VideoCaptureConfig,
}

impl VideoCapture {
    #[must_use]
    pub const fn new(config: VideoCaptureConfig) -> Self {
        Self { config }
    }

    async fn download(&self, url: &str, out_dir: &Path) -> Result<CaptureResult> {
        tokio::fs::create_dir_all(out_dir)
            .await
            .with_context(|| format!("Failed to create {}", out_dir.display()))?;
        remove_stale_downloads(out_dir).await?;

        let output_template = out_dir.join(format!("{ORIGINAL_STEM}.%(ext)s"));
        let args = vec![
            "--no-playlist".to_string(),
            "--no-warnings".to_string(),
            "--quiet".to_string(),
            "--format".to_string(),
            FORMAT_SELECTOR.to_string(),
            "--write-info-json".to_string(),
            "--write-subs".to_string(),
            "--write-auto-subs".to_string(),
            "--sub-langs".to_string(),
            "en.*,en".to_string(),
            "--sub-format".to_string(),
            "vtt".to_string(),
            "--add-metadata".to_string(),
            "--output".to_string(),
            output_template.to_string_lossy().to_string(),
            // URL goes last
            url.to_string(),
        ];

        debug!(url = %url, "Running yt-dlp");
        run_tool(&self.config.yt_dlp_path, &args, out_dir).await?;

        let original = find_original(out_dir)
            .await?
            .context("yt-dlp did not produce an output file")?;
        let video_path = self.normalize(&original, out_dir).await?;

        let info = read_info_json(out_dir).await;
        let meta = video_metadata(info.as_ref(), url);
        let title = match meta.get("title") {
            Some(MetaValue::Text(t)) if !t.trim().is_empty() => Some(t.trim().to_string()),
            _ => None,
        };

        let subtitles = collect_subtitles(out_dir).await?;
        let (text_content, text_path) = if subtitles.is_empty() {
            (None, None)
        } else {
            (Some(subtitles), Some(out_dir.join(SUBTITLES_FILE)))
        };

        Ok(CaptureResult {
            title,
            primary_path: video_path,
            meta,
            text_content,
            text_path,
        })
    }

    /// Move or remux the download into `archive.mp4`.
    async fn normalize(&self, original: &Path, out_dir: &Path) -> Result<PathBuf> {
        let target = out_dir.join(VIDEO_FILE);
        let is_mp4 = original
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("mp4"));

        if is_mp4 {
            tokio::fs::rename(original, &target)
                .await
                .with_context(|| format!("Failed to move {}", original.display()))?;
        } else {
            debug!(source = %original.display(), "Remuxing to mp4");
            let args = vec![
                "-y".to_string(),
                "-i".to_string(),
                original.to_string_lossy().to_string(),
                "-c".to_string(),
                "copy".to_string(),
                target.to_string_lossy().to_string(),
            ];
            run_tool(&self.config.ffmpeg_path, &args, out_dir).await?;
            if let Err(e) = tokio::fs::remove_file(original).await {
                warn!(path = %original.display(), "Failed to remove source after remux: {e}");
            }
        }

        Ok(target)
    }
}

#[async_trait]
impl CaptureStrategy for VideoCapture {
    fn kind(&self) -> ArchiveKind {
        ArchiveKind::Video
    }

    async fn capture(&self, url: &str, out_dir: &Path) -> Result<CaptureResult, CaptureError> {
        self.download(url, out_dir)
            .await
            .map_err(CaptureError::from)
    }
}

/// Run an external tool, failing with its stderr on a non-zero exit.
async fn run_tool(program: &str, args: &[String], work_dir: &Path) -> Result<()> {
    let output = Command::new(program)
        .args(args)
        .current_dir(work_dir)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        // Dropping the future (processor timeout) must not leave the tool running.
        .kill_on_drop(true)
        .output()
        .await
        .with_context(|| format!("Failed to spawn {program}"))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        anyhow::bail!("{program} failed ({}): {}", output.status, stderr.trim());
    }

    Ok(())
}

/// Downloaded media named `original.<ext>`, ignoring sidecar files.
fn is_original_media(name: &str) -> bool {
    let Some(rest) = name.strip_prefix(ORIGINAL_STEM).and_then(|r| r.strip_prefix('.')) else {
        return false;
    };
    // Sidecars carry a second extension, e.g. `original.en.vtt`, `original.info.json`.
    !rest.is_empty() && !rest.contains('.') && !matches!(rest, "part" | "ytdl" | "json" | "vtt")
}

async fn find_original(out_dir: &Path) -> Result<Option<PathBuf>> {
    let mut entries = tokio::fs::read_dir(out_dir)
        .await
        .context("Failed to read output directory")?;

    let mut found = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name().to_string_lossy().to_string();
        if is_original_media(&name) {
            found.push(entry.path());
        }
    }
    found.sort();
    Ok(found.into_iter().next())
}

/// Clear `original.*` and subtitle files left by an earlier run.
async fn remove_stale_downloads(out_dir: &Path) -> Result<()> {
    let mut entries = tokio::fs::read_dir(out_dir)
        .await
        .context("Failed to read output directory")?;

    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name().to_string_lossy().to_string();
        if name.starts_with(&format!("{ORIGINAL_STEM}.")) || name.ends_with(".vtt") {
            let path = entry.path();
            tokio::fs::remove_file(&path)
                .await
                .with_context(|| format!("Failed to remove stale {}", path.display()))?;
        }
    }
    Ok(())
}

/// Parse yt-dlp's info JSON, keeping a stable copy as `info.json`.
async fn read_info_json(out_dir: &Path) -> Option<serde_json::Value> {
    let written = out_dir.join(format!("{ORIGINAL_STEM}.info.json"));
    let stable = out_dir.join(INFO_FILE);

    if tokio::fs::try_exists(&written).await.unwrap_or(false) {
        if let Err(e) = tokio::fs::rename(&written, &stable).await {
            warn!(path = %written.display(), "Failed to rename info json: {e}");
            return read_json(&written).await;
        }
    }
    read_json(&stable).await
}

async fn read_json(path: &Path) -> Option<serde_json::Value> {
    let content = tokio::fs::read_to_string(path).await.ok()?;
    match serde_json::from_str(&content) {
        Ok(json) => Some(json),
        Err(e) => {
            warn!(path = %path.display(), "Failed to parse info json: {e}");
            None
        }
    }
}

fn video_metadata(info: Option<&serde_json::Value>, url: &str) -> Metadata {
    let field = |key: &str| info.and_then(|json| json.get(key)).map_or(MetaValue::Null, json_scalar);

    let mut meta = Metadata::new();
    meta.insert("title".to_string(), field("title"));
    meta.insert("uploader".to_string(), field("uploader"));
    meta.insert("upload_date".to_string(), field("upload_date"));
    meta.insert("duration".to_string(), field("duration"));
    let webpage_url = match field("webpage_url") {
        MetaValue::Null => MetaValue::from(url),
        value => value,
    };
    meta.insert("webpage_url".to_string(), webpage_url);
    meta.insert("extractor".to_string(), field("extractor"));
    meta.insert("video_id".to_string(), field("id"));
    meta
}

fn json_scalar(value: &serde_json::Value) -> MetaValue {
    match value {
        serde_json::Value::Bool(b) => MetaValue::Bool(*b),
        serde_json::Value::Number(n) => n
            .as_i64()
            .map(MetaValue::Int)
            .or_else(|| n.as_f64().map(MetaValue::Float))
            .unwrap_or(MetaValue::Null),
        serde_json::Value::String(s) => MetaValue::Text(s.clone()),
        serde_json::Value::Null | serde_json::Value::Array(_) | serde_json::Value::Object(_) => {
            MetaValue::Null
        }
    }
}

/// Concatenate the text of every `.vtt` file in `out_dir`.
async fn collect_subtitles(out_dir: &Path) -> Result<String> {
    let mut entries = tokio::fs::read_dir(out_dir)
        .await
        .context("Failed to read output directory")?;

    let mut files = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        if entry.file_name().to_string_lossy().ends_with(".vtt") {
            files.push(entry.path());
        }
    }
    files.sort();

    let mut sections = Vec::new();
    for path in files {
        let bytes = tokio::fs::read(&path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let text = vtt_to_text(&String::from_utf8_lossy(&bytes));
        if !text.is_empty() {
            sections.push(text);
        }
    }
    Ok(sections.join("\n\n"))
}

/// Strip WebVTT headers, cue ids, timings and inline tags.
///
/// Auto-generated captions repeat each line across rolling cues, so
/// consecutive duplicates are collapsed.
fn vtt_to_text(vtt: &str) -> String {
    let mut lines: Vec<String> = Vec::new();
    let mut in_note = false;

    for raw in vtt.lines() {
        let line = raw.trim();
        if line.is_empty() {
            in_note = false;
            continue;
        }
        if in_note {
            continue;
        }
        if line.starts_with("NOTE") || line.starts_with("STYLE") || line.starts_with("REGION") {
            in_note = true;
            continue;
        }
        if line.starts_with("WEBVTT")
            || line.starts_with("Kind:")
            || line.starts_with("Language:")
            || line.contains("-->")
            || line.chars().all(|c| c.is_ascii_digit())
        {
            continue;
        }

        let cleaned = VTT_TAG.replace_all(line, "");
        let cleaned = cleaned
            .replace("&amp;", "&")
            .replace("&lt;", "<")
            .replace("&gt;", ">")
            .replace("&nbsp;", " ");
        let cleaned = cleaned.trim();
        if cleaned.is_empty() || lines.last().is_some_and(|last| last == cleaned) {
            continue;
        }
        lines.push(cleaned.to_string());
    }

    lines.join("\n")
}
