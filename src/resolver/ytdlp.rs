use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::process::Command;

use super::Resolver;
use crate::domain::{Reference, TrackMetadata};
use crate::error::ResolveError;

const DEFAULT_FORMAT: &str = "bestaudio[abr<=64]/bestaudio/best";
const UNTITLED: &str = "<untitled>";

#[derive(Debug, Clone)]
pub struct YtDlpConfig {
    pub bin: String,
    pub format: String,
    /// 仅当文件存在且非空时才传给 yt-dlp
    pub cookies_file: Option<PathBuf>,
    pub timeout: Duration,
}

impl Default for YtDlpConfig {
    fn default() -> Self {
        Self {
            bin: "yt-dlp".to_owned(),
            format: DEFAULT_FORMAT.to_owned(),
            cookies_file: None,
            timeout: Duration::from_secs(60),
        }
    }
}

/// 调用外部 yt-dlp 进程，读取 `-J` 输出的 JSON
pub struct YtDlpResolver {
    cfg: YtDlpConfig,
}

impl YtDlpResolver {
    pub fn new(cfg: YtDlpConfig) -> Self {
        Self { cfg }
    }

    fn cookies(&self) -> Option<&PathBuf> {
        let path = self.cfg.cookies_file.as_ref()?;
        match std::fs::metadata(path) {
            Ok(md) if md.is_file() && md.len() > 0 => Some(path),
            _ => None,
        }
    }

    fn build_args(&self, reference: &Reference) -> Vec<String> {
        let mut args = vec![
            "-J".to_owned(),
            "--no-playlist".to_owned(),
            "--no-warnings".to_owned(),
            "--skip-download".to_owned(),
            "-f".to_owned(),
            self.cfg.format.clone(),
        ];
        if let Some(cookies) = self.cookies() {
            args.push("--cookies".to_owned());
            args.push(cookies.display().to_string());
        }
        args.push(match reference {
            Reference::Url(url) => url.clone(),
            Reference::Search(query) => format!("ytsearch1:{query}"),
        });
        args
    }
}

#[async_trait]
impl Resolver for YtDlpResolver {
    async fn resolve(&self, reference: &Reference) -> Result<TrackMetadata, ResolveError> {
        let args = self.build_args(reference);
        tracing::debug!(reference = reference.as_str(), "调用 yt-dlp 解析");

        let mut cmd = Command::new(&self.cfg.bin);
        cmd.args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let output = match tokio::time::timeout(self.cfg.timeout, cmd.output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                return Err(ResolveError::Transient(format!(
                    "启动 {} 失败: {e}",
                    self.cfg.bin
                )));
            }
            Err(_) => {
                return Err(ResolveError::Transient(format!(
                    "解析超时({}s)",
                    self.cfg.timeout.as_secs()
                )));
            }
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            tracing::warn!(
                reference = reference.as_str(),
                status = ?output.status.code(),
                "yt-dlp 返回失败"
            );
            return Err(classify_failure(&stderr));
        }

        let meta = parse_info(&output.stdout)?;
        tracing::info!(
            canonical_id = %meta.canonical_id,
            title = %meta.title,
            duration_secs = meta.duration_secs,
            "解析完成"
        );
        Ok(meta)
    }
}

#[derive(Debug, Deserialize)]
struct InfoDto {
    url: Option<String>,
    webpage_url: Option<String>,
    title: Option<String>,
    duration: Option<f64>,
    uploader: Option<String>,
    entries: Option<Vec<InfoDto>>,
}

/// 搜索结果带 `entries`，取第一条
fn parse_info(stdout: &[u8]) -> Result<TrackMetadata, ResolveError> {
    let mut info: InfoDto = serde_json::from_slice(stdout)
        .map_err(|e| ResolveError::Malformed(format!("yt-dlp 输出不是合法 JSON: {e}")))?;

    if let Some(entries) = info.entries.take() {
        info = entries
            .into_iter()
            .next()
            .ok_or_else(|| ResolveError::NotFound("搜索没有结果".to_owned()))?;
    }

    let stream_url = info
        .url
        .filter(|s| !s.is_empty())
        .ok_or_else(|| ResolveError::Malformed("缺少 url 字段".to_owned()))?;
    let canonical_id = info
        .webpage_url
        .filter(|s| !s.is_empty())
        .ok_or_else(|| ResolveError::Malformed("缺少 webpage_url 字段".to_owned()))?;
    let duration_secs = info
        .duration
        .filter(|d| d.is_finite() && *d > 0.0)
        .map(|d| d.round() as u64)
        .unwrap_or(0);

    Ok(TrackMetadata::new(
        canonical_id,
        stream_url,
        info.title.unwrap_or_else(|| UNTITLED.to_owned()),
        info.uploader.unwrap_or_default(),
        duration_secs,
    ))
}

fn classify_failure(stderr: &str) -> ResolveError {
    let lower = stderr.to_lowercase();
    let last = stderr
        .lines()
        .rev()
        .find(|l| !l.trim().is_empty())
        .unwrap_or("yt-dlp 失败")
        .trim()
        .to_owned();

    if lower.contains("not available in your country")
        || lower.contains("geo restriction")
        || lower.contains("sign in to confirm your age")
    {
        ResolveError::Restricted(last)
    } else if lower.contains("video unavailable")
        || lower.contains("private video")
        || lower.contains("does not exist")
        || lower.contains("no video results")
        || lower.contains("unsupported url")
    {
        ResolveError::NotFound(last)
    } else {
        ResolveError::Transient(last)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_info_reads_single_video() {
        let json = br#"{
            "url": "https://rr1.example/videoplayback?id=1",
            "webpage_url": "https://www.youtube.com/watch?v=dQw4w9WgXcQ",
            "title": "Never Gonna Give You Up",
            "duration": 212.6,
            "uploader": "Rick Astley"
        }"#;
        let meta = parse_info(json).unwrap();
        assert_eq!(meta.canonical_id, "https://www.youtube.com/watch?v=dQw4w9WgXcQ");
        assert_eq!(meta.stream_url, "https://rr1.example/videoplayback?id=1");
        assert_eq!(meta.duration_secs, 213);
        assert_eq!(meta.uploader, "Rick Astley");
    }

    #[test]
    fn parse_info_takes_first_search_entry() {
        let json = br#"{
            "entries": [
                {"url": "u1", "webpage_url": "w1", "title": null, "duration": null, "uploader": null},
                {"url": "u2", "webpage_url": "w2", "title": "second", "duration": 5, "uploader": "x"}
            ]
        }"#;
        let meta = parse_info(json).unwrap();
        assert_eq!(meta.canonical_id, "w1");
        assert_eq!(meta.title, UNTITLED);
        assert_eq!(meta.duration_secs, 0);
        assert_eq!(meta.uploader, "");
    }

    #[test]
    fn parse_info_empty_search_is_not_found() {
        let err = parse_info(br#"{"entries": []}"#).unwrap_err();
        assert!(matches!(err, ResolveError::NotFound(_)));
    }

    #[test]
    fn parse_info_missing_url_is_malformed() {
        let err = parse_info(br#"{"webpage_url": "w"}"#).unwrap_err();
        assert!(matches!(err, ResolveError::Malformed(_)));

        let err = parse_info(b"not json").unwrap_err();
        assert!(matches!(err, ResolveError::Malformed(_)));
    }

    #[test]
    fn classify_failure_maps_common_messages() {
        let geo = "ERROR: [youtube] abc: The uploader has not made this video available in your country";
        assert!(matches!(classify_failure(geo), ResolveError::Restricted(_)));

        let gone = "ERROR: [youtube] abc: Video unavailable";
        assert!(matches!(classify_failure(gone), ResolveError::NotFound(_)));

        let net = "ERROR: Unable to download webpage: <urlopen error timed out>\n";
        match classify_failure(net) {
            ResolveError::Transient(msg) => assert!(msg.contains("timed out")),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn search_reference_uses_ytsearch_prefix() {
        let resolver = YtDlpResolver::new(YtDlpConfig::default());
        let args = resolver.build_args(&Reference::Search("rickroll".to_owned()));
        assert_eq!(args.last().map(String::as_str), Some("ytsearch1:rickroll"));
        assert!(!args.iter().any(|a| a == "--cookies"));
    }

    #[test]
    fn cookies_file_only_used_when_non_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cookies.txt");
        std::fs::write(&path, b"").unwrap();

        let resolver = YtDlpResolver::new(YtDlpConfig {
            cookies_file: Some(path.clone()),
            ..YtDlpConfig::default()
        });
        let url = Reference::Url("https://youtu.be/x".to_owned());
        assert!(!resolver.build_args(&url).iter().any(|a| a == "--cookies"));

        std::fs::write(&path, b"# Netscape HTTP Cookie File\n").unwrap();
        assert!(resolver.build_args(&url).iter().any(|a| a == "--cookies"));
    }
}
