//! Content-type classification for supported media kinds

/// The kinds of media this service caches
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Image,
    Video,
    Audio,
    Hls,
}

/// Extract the bare MIME type from a Content-Type header value.
///
/// Splits on `;`, trims, and lowercases. Matching is always against the
/// full normalized type, never a substring, so a value like
/// `text/html; image/png` cannot smuggle a media type past the check.
fn normalize(content_type: &str) -> String {
    content_type
        .split(';')
        .next()
        .unwrap_or("")
        .trim()
        .to_ascii_lowercase()
}

const IMAGE_TYPES: &[&str] = &[
    "image/jpeg",
    "image/jpg",
    "image/png",
    "image/gif",
    "image/webp",
    "image/avif",
    "image/svg+xml",
    "image/bmp",
    "image/tiff",
    "image/x-icon",
    "image/heic",
    "image/heif",
    "image/jxl",
];

const VIDEO_TYPES: &[&str] = &[
    "video/mp4",
    "video/webm",
    "video/ogg",
    "video/quicktime",
    "video/x-matroska",
    "video/x-m4v",
    "video/mp2t",
];

const AUDIO_TYPES: &[&str] = &[
    "audio/mpeg",
    "audio/ogg",
    "audio/wav",
    "audio/webm",
    "audio/x-m4a",
    "audio/mp4",
    "audio/aac",
    "audio/flac",
];

const HLS_TYPES: &[&str] = &[
    "application/vnd.apple.mpegurl",
    "application/x-mpegurl",
    "audio/mpegurl",
    "audio/x-mpegurl",
];

pub fn is_image(content_type: &str) -> bool {
    IMAGE_TYPES.contains(&normalize(content_type).as_str())
}

pub fn is_video(content_type: &str) -> bool {
    VIDEO_TYPES.contains(&normalize(content_type).as_str())
}

pub fn is_audio(content_type: &str) -> bool {
    AUDIO_TYPES.contains(&normalize(content_type).as_str())
}

pub fn is_hls(content_type: &str) -> bool {
    HLS_TYPES.contains(&normalize(content_type).as_str())
}

/// Classify a Content-Type header value into a supported media kind.
pub fn classify(content_type: &str) -> Option<MediaKind> {
    let normalized = normalize(content_type);
    let t = normalized.as_str();
    if IMAGE_TYPES.contains(&t) {
        Some(MediaKind::Image)
    } else if VIDEO_TYPES.contains(&t) {
        Some(MediaKind::Video)
    } else if AUDIO_TYPES.contains(&t) {
        Some(MediaKind::Audio)
    } else if HLS_TYPES.contains(&t) {
        Some(MediaKind::Hls)
    } else {
        None
    }
}

/// Whether the content-type is any supported media kind.
pub fn is_media(content_type: &str) -> bool {
    classify(content_type).is_some()
}
