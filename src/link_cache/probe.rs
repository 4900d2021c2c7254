use std::time::Duration;

use async_trait::async_trait;

/// 流媒体链接有效性探测
#[async_trait]
pub trait LinkProbe: Send + Sync {
    /// 任何网络错误、超时都视为失效
    async fn is_valid(&self, url: &str) -> bool;
}

/// 跟随重定向的 HEAD 请求，最终状态码 200..400 视为有效
pub struct HttpProbe {
    http: reqwest::Client,
}

impl HttpProbe {
    pub fn new(timeout: Duration) -> Self {
        let http = match reqwest::Client::builder().timeout(timeout).build() {
            Ok(c) => c,
            Err(e) => {
                tracing::warn!(err = %e, "初始化探测 HTTP 客户端失败，使用默认配置");
                reqwest::Client::new()
            }
        };
        Self { http }
    }
}

#[async_trait]
impl LinkProbe for HttpProbe {
    async fn is_valid(&self, url: &str) -> bool {
        match self.http.head(url).send().await {
            Ok(resp) => {
                let status = resp.status();
                let ok = status.is_success() || status.is_redirection();
                if !ok {
                    tracing::debug!(status = status.as_u16(), "链接探测失败");
                }
                ok
            }
            Err(e) => {
                tracing::debug!(err = %e, "链接探测请求失败");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn head_200_is_valid() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("HEAD", "/videoplayback")
            .with_status(200)
            .create_async()
            .await;

        let probe = HttpProbe::new(Duration::from_secs(2));
        assert!(probe.is_valid(&format!("{}/videoplayback", server.url())).await);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn head_403_is_stale() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("HEAD", "/expired")
            .with_status(403)
            .create_async()
            .await;

        let probe = HttpProbe::new(Duration::from_secs(2));
        assert!(!probe.is_valid(&format!("{}/expired", server.url())).await);
    }

    #[tokio::test]
    async fn redirect_to_ok_is_valid() {
        let mut server = mockito::Server::new_async().await;
        let target = format!("{}/final", server.url());
        let _hop = server
            .mock("HEAD", "/hop")
            .with_status(302)
            .with_header("location", &target)
            .create_async()
            .await;
        let _fin = server
            .mock("HEAD", "/final")
            .with_status(204)
            .create_async()
            .await;

        let probe = HttpProbe::new(Duration::from_secs(2));
        assert!(probe.is_valid(&format!("{}/hop", server.url())).await);
    }

    #[tokio::test]
    async fn unreachable_host_is_stale() {
        let probe = HttpProbe::new(Duration::from_millis(500));
        assert!(!probe.is_valid("http://127.0.0.1:1/nothing").await);
    }
}
