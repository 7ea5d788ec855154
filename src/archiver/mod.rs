use std::path::Path;

pub mod processor;
pub mod rate_limiter;
pub mod worker;

pub use processor::{ArchiveProcessor, ProcessError};
pub use rate_limiter::DomainRateLimiter;
pub use worker::{ArchiveWorker, JobOutcome};

/// Longest name part kept by [`sanitize_filename`].
const MAX_NAME_LENGTH: usize = 120;

/// Sanitize a filename to be URL-safe and filesystem-safe.
///
/// Path separators and characters that break headers or URLs become
/// underscores, runs of underscores collapse, the extension is preserved
/// and the name is truncated on a character boundary.
///
/// # Examples
///
/// ```
/// # use url_archiver::archiver::sanitize_filename;
/// assert_eq!(sanitize_filename("My Video #1.mp4"), "My_Video_1.mp4");
/// assert_eq!(sanitize_filename("../../etc/passwd"), "etc_passwd");
/// ```
#[must_use]
pub fn sanitize_filename(filename: &str) -> String {
    let (name, ext) = match filename.rfind('.') {
        Some(dot_pos) if dot_pos > 0 && is_extension(&filename[dot_pos + 1..]) => {
            filename.split_at(dot_pos)
        }
        _ => (filename, ""),
    };

    let sanitized_name: String = name
        .chars()
        .map(|c| match c {
            '(' | ')' | '[' | ']' | '-' | '_' => c,
            c if c.is_alphanumeric() => c,
            _ => '_',
        })
        .collect();

    let sanitized_name = sanitized_name
        .split('_')
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("_");

    let truncated_name: String = sanitized_name.chars().take(MAX_NAME_LENGTH).collect();

    format!("{truncated_name}{ext}")
}

fn is_extension(ext: &str) -> bool {
    !ext.is_empty() && ext.len() <= 8 && ext.chars().all(|c| c.is_ascii_alphanumeric())
}

/// Friendly download name: sanitized title plus the artifact's extension.
///
/// Falls back to `fallback_stem` when the title is missing or sanitizes away.
#[must_use]
pub fn download_filename(title: Option<&str>, primary_path: &Path, fallback_stem: &str) -> String {
    let stem = title
        .map(|t| sanitize_filename(t.trim()))
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| sanitize_filename(fallback_stem));

    match primary_path.extension().and_then(|e| e.to_str()) {
        Some(ext) if is_extension(ext) => format!("{stem}.{}", ext.to_ascii_lowercase()),
        _ => stem,
    }
}
