use url::Url;

use crate::db::ArchiveKind;

/// Hosts whose pages are captured as video.
const VIDEO_HOSTS: &[&str] = &[
    "youtube.com",
    "www.youtube.com",
    "m.youtube.com",
    "youtu.be",
    "vimeo.com",
    "www.vimeo.com",
    "tiktok.com",
    "www.tiktok.com",
];

/// Path suffixes of directly linked media files.
const MEDIA_EXTENSIONS: &[&str] = &[".mp4", ".mkv", ".mov", ".webm", ".mp3", ".m4a"];

/// Decide which capture strategy applies to a URL.
///
/// An explicit kind always wins. Otherwise the host is checked against known
/// video sites, then the path (not the query) against media extensions.
/// Anything else is a page. Never fails.
///
/// # Examples
///
/// ```
/// use url_archiver::capture::select_kind;
/// use url_archiver::db::ArchiveKind;
///
/// assert_eq!(select_kind("https://youtu.be/abc123", None), ArchiveKind::Video);
/// assert_eq!(select_kind("https://example.com/article", None), ArchiveKind::Page);
/// assert_eq!(
///     select_kind("https://youtu.be/abc123", Some(ArchiveKind::Page)),
///     ArchiveKind::Page
/// );
/// ```
#[must_use]
pub fn select_kind(url: &str, explicit: Option<ArchiveKind>) -> ArchiveKind {
    if let Some(kind) = explicit {
        return kind;
    }

    let Ok(parsed) = Url::parse(url.trim()) else {
        return ArchiveKind::Page;
    };

    let host = parsed.host_str().unwrap_or_default().to_ascii_lowercase();
    if VIDEO_HOSTS.contains(&host.as_str()) {
        return ArchiveKind::Video;
    }

    let path = parsed.path().to_ascii_lowercase();
    if MEDIA_EXTENSIONS.iter().any(|ext| path.ends_with(ext)) {
        return ArchiveKind::Video;
    }

    ArchiveKind::Page
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_video_hosts() {
        assert_eq!(
            select_kind("https://www.youtube.com/watch?v=dQw4w9WgXcQ", None),
            ArchiveKind::Video
        );
        assert_eq!(select_kind("https://youtu.be/abc123", None), ArchiveKind::Video);
        assert_eq!(select_kind("https://vimeo.com/12345", None), ArchiveKind::Video);
        assert_eq!(
            select_kind("https://www.tiktok.com/@user/video/1", None),
            ArchiveKind::Video
        );
        assert_eq!(select_kind("HTTPS://WWW.YOUTUBE.COM/x", None), ArchiveKind::Video);
    }

    #[test]
    fn test_media_extensions() {
        assert_eq!(
            select_kind("https://cdn.example.com/clip.mp4", None),
            ArchiveKind::Video
        );
        assert_eq!(
            select_kind("https://cdn.example.com/CLIP.MKV", None),
            ArchiveKind::Video
        );
        assert_eq!(
            select_kind("https://cdn.example.com/song.m4a?token=abc", None),
            ArchiveKind::Video
        );
    }

    #[test]
    fn test_query_string_is_ignored() {
        assert_eq!(
            select_kind("https://example.com/watch?file=clip.mp4", None),
            ArchiveKind::Page
        );
    }

    #[test]
    fn test_default_is_page() {
        assert_eq!(select_kind("https://example.com/article", None), ArchiveKind::Page);
        assert_eq!(select_kind("https://notyoutube.com/x", None), ArchiveKind::Page);
        assert_eq!(select_kind("not a url", None), ArchiveKind::Page);
        assert_eq!(select_kind("", None), ArchiveKind::Page);
    }

    #[test]
    fn test_explicit_kind_wins() {
        assert_eq!(
            select_kind("https://example.com/article", Some(ArchiveKind::Video)),
            ArchiveKind::Video
        );
        assert_eq!(
            select_kind("https://www.youtube.com/watch?v=x", Some(ArchiveKind::Page)),
            ArchiveKind::Page
        );
    }
}
