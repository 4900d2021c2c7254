use std::path::Path;
use std::time::Duration;

use futures_util::StreamExt;
use reqwest::StatusCode;
use tokio::io::AsyncWriteExt;

use super::ReconnectPolicy;

const BACKOFF_BASE_MS: u64 = 250;

/// 把流媒体链接完整下载到本地文件，按重连策略重试
pub async fn download_to_path(
    http: &reqwest::Client,
    out_path: &Path,
    url: &str,
    title: &str,
    policy: ReconnectPolicy,
) -> Result<(), String> {
    let retries = policy.retries();
    let max_ms = policy.max_delay().as_millis() as u64;

    for attempt in 0..=retries {
        let _ = tokio::fs::remove_file(out_path).await;

        let resp = match http.get(url).send().await {
            Ok(r) => r,
            Err(e) => {
                if attempt < retries {
                    sleep_backoff(attempt, max_ms).await;
                    continue;
                }
                return Err(format!("下载音频失败({title}): {e}"));
            }
        };

        if !resp.status().is_success() {
            let status = resp.status();
            if attempt < retries && is_retryable_status(status) {
                sleep_backoff(attempt, max_ms).await;
                continue;
            }
            return Err(format!("下载音频失败({title}): HTTP {status}"));
        }

        let mut file = tokio::fs::File::create(out_path)
            .await
            .map_err(|e| format!("创建临时文件失败({title}): {e}"))?;

        let mut stream = resp.bytes_stream();
        let mut failed = None::<String>;
        let mut interrupted = false;
        while let Some(chunk) = stream.next().await {
            match chunk {
                Ok(bytes) => {
                    if let Err(e) = file.write_all(&bytes).await {
                        failed = Some(format!("写入临时文件失败({title}): {e}"));
                        break;
                    }
                }
                Err(e) => {
                    failed = Some(format!("下载音频中断({title}): {e}"));
                    interrupted = true;
                    break;
                }
            }
        }

        if failed.is_none()
            && let Err(e) = file.flush().await
        {
            failed = Some(format!("写入临时文件失败({title}): {e}"));
        }

        if let Some(err) = failed {
            // 传输中途断开只有在允许流式重连时才重试
            let may_retry = !interrupted || policy.streamed;
            if attempt < retries && may_retry {
                tracing::debug!(attempt, err = %err, "下载失败，准备重试");
                sleep_backoff(attempt, max_ms).await;
                continue;
            }
            return Err(err);
        }

        return Ok(());
    }

    Err(format!("下载音频失败({title})"))
}

fn is_retryable_status(status: StatusCode) -> bool {
    status == StatusCode::REQUEST_TIMEOUT
        || status == StatusCode::TOO_MANY_REQUESTS
        || status.is_server_error()
}

async fn sleep_backoff(attempt: u32, max_ms: u64) {
    let exp = BACKOFF_BASE_MS.saturating_mul(2u64.saturating_pow(attempt.min(6)));
    let jitter = rand::random::<u64>() % 251;
    let ms = exp.saturating_add(jitter).min(max_ms.max(BACKOFF_BASE_MS));
    tokio::time::sleep(Duration::from_millis(ms)).await;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(enabled: bool) -> ReconnectPolicy {
        ReconnectPolicy {
            enabled,
            streamed: true,
            max_delay_secs: 1,
        }
    }

    #[tokio::test]
    async fn downloads_body_to_file() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("GET", "/audio.webm")
            .with_status(200)
            .with_body(b"fake-audio-bytes")
            .create_async()
            .await;

        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("track.bin");
        let http = reqwest::Client::new();
        download_to_path(
            &http,
            &out,
            &format!("{}/audio.webm", server.url()),
            "t",
            policy(false),
        )
        .await
        .unwrap();

        assert_eq!(std::fs::read(&out).unwrap(), b"fake-audio-bytes");
    }

    #[tokio::test]
    async fn client_error_is_not_retried() {
        let mut server = mockito::Server::new_async().await;
        let m = server
            .mock("GET", "/gone")
            .with_status(403)
            .expect(1)
            .create_async()
            .await;

        let dir = tempfile::tempdir().unwrap();
        let http = reqwest::Client::new();
        let err = download_to_path(
            &http,
            &dir.path().join("x"),
            &format!("{}/gone", server.url()),
            "t",
            policy(true),
        )
        .await
        .unwrap_err();

        assert!(err.contains("403"));
        m.assert_async().await;
    }
}
