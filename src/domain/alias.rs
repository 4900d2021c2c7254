//! 别名规范化与视频链接识别

use reqwest::Url;

const WATCH_PREFIX: &str = "https://www.youtube.com/watch?v=";

/// 是否像一个视频链接（带协议，或以 youtube.com/ youtu.be/ 开头）
pub fn is_url(s: &str) -> bool {
    let s = s.trim_start();
    if s.starts_with("http://") || s.starts_with("https://") {
        return true;
    }
    let rest = s.strip_prefix("www.").unwrap_or(s);
    rest.starts_with("youtube.com/") || rest.starts_with("youtu.be/")
}

/// 别名规范化：去掉首尾空白；非链接再转小写
pub fn normalize_alias(s: &str) -> String {
    let s = s.trim();
    if is_url(s) {
        s.to_owned()
    } else {
        s.to_lowercase()
    }
}

/// 把 youtu.be/ID、watch?v=ID、shorts/ID 统一成 watch 链接
pub fn canonical_url(raw: &str) -> Option<String> {
    let raw = raw.trim();
    let parsed = if raw.starts_with("http://") || raw.starts_with("https://") {
        Url::parse(raw)
    } else {
        Url::parse(&format!("https://{raw}"))
    };
    let url = parsed.ok()?;
    let host = url.host_str()?.to_ascii_lowercase();

    let video_id = if host == "youtu.be" || host.ends_with(".youtu.be") {
        url.path().trim_start_matches('/').to_owned()
    } else if host == "youtube.com" || host.ends_with(".youtube.com") {
        if url.path() == "/watch" {
            url.query_pairs()
                .find(|(k, _)| k == "v")
                .map(|(_, v)| v.into_owned())?
        } else if let Some(rest) = url.path().strip_prefix("/shorts/") {
            rest.split('/').next().unwrap_or_default().to_owned()
        } else {
            return None;
        }
    } else {
        return None;
    };

    if video_id.is_empty() {
        return None;
    }
    Some(format!("{WATCH_PREFIX}{video_id}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    const RICK: &str = "https://www.youtube.com/watch?v=dQw4w9WgXcQ";

    #[test]
    fn canonical_url_handles_known_shapes() {
        assert_eq!(canonical_url("https://youtu.be/dQw4w9WgXcQ").as_deref(), Some(RICK));
        assert_eq!(
            canonical_url("https://www.youtube.com/watch?v=dQw4w9WgXcQ&t=42").as_deref(),
            Some(RICK)
        );
        assert_eq!(
            canonical_url("youtube.com/shorts/dQw4w9WgXcQ").as_deref(),
            Some(RICK)
        );
        assert_eq!(
            canonical_url("https://m.youtube.com/watch?list=PL1&v=dQw4w9WgXcQ").as_deref(),
            Some(RICK)
        );
    }

    #[test]
    fn canonical_url_rejects_other_links() {
        assert_eq!(canonical_url("https://example.com/watch?v=abc"), None);
        assert_eq!(canonical_url("https://www.youtube.com/channel/xyz"), None);
        assert_eq!(canonical_url("https://www.youtube.com/watch?list=PL1"), None);
        assert_eq!(canonical_url("https://youtu.be/"), None);
        assert_eq!(canonical_url("never gonna give you up"), None);
    }

    #[test]
    fn is_url_accepts_bare_hosts() {
        assert!(is_url("https://anything.example/x"));
        assert!(is_url("youtu.be/abc"));
        assert!(is_url("www.youtube.com/watch?v=abc"));
        assert!(!is_url("rickroll"));
        assert!(!is_url("youtube rewind"));
    }

    #[test]
    fn normalize_alias_keeps_url_case() {
        assert_eq!(normalize_alias("  RickRoll "), "rickroll");
        assert_eq!(
            normalize_alias("https://youtu.be/dQw4w9WgXcQ"),
            "https://youtu.be/dQw4w9WgXcQ"
        );
    }
}
