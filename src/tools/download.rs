//! 素材下载：带重试与大小校验
//!
//! 429 / 5xx / 网络错误重试，第 n 次重试前等待 backoff_base * 2^n（饱和计算）；
//! 声明了 content-length 时校验落盘大小，不一致视为失败。失败时删除残留文件。
//! fetch_bytes 读入内存供视频分析使用，超过上限直接失败、不重试。

use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::Duration;

use reqwest::{Client, StatusCode};
use tokio::io::AsyncWriteExt;

use crate::config::DownloadSection;

pub struct Downloader {
    client: Client,
    max_retries: u32,
    backoff_base: Duration,
}

/// 单次尝试的结果：可重试或不可重试
enum AttemptError {
    Retryable(String),
    Fatal(String),
}

impl Downloader {
    pub fn new(cfg: &DownloadSection) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(cfg.timeout_secs))
            .build()
            .unwrap_or_default();
        Self {
            client,
            max_retries: cfg.max_retries.max(1),
            backoff_base: Duration::from_millis(cfg.backoff_base_ms),
        }
    }

    /// 下载到 dir 下，返回保存路径
    pub async fn fetch(&self, url: &str, dir: &Path, index: usize) -> Result<PathBuf, String> {
        let path = dir.join(file_name_for(url, index));
        let target = &path;
        self.with_retries(url, || async move {
            let result = self.attempt(url, target).await;
            if result.is_err() {
                let _ = tokio::fs::remove_file(target).await;
            }
            result
        })
        .await?;
        Ok(path)
    }

    /// 读入内存，响应体超过 max_bytes 时失败
    pub async fn fetch_bytes(&self, url: &str, max_bytes: u64) -> Result<Vec<u8>, String> {
        self.with_retries(url, || self.attempt_bytes(url, max_bytes)).await
    }

    async fn with_retries<T, F, Fut>(&self, url: &str, mut op: F) -> Result<T, String>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, AttemptError>>,
    {
        let mut last_error = String::new();
        for attempt in 0..self.max_retries {
            tracing::info!(url = %url, attempt = attempt + 1, max = self.max_retries, "downloading video");
            match op().await {
                Ok(value) => return Ok(value),
                Err(AttemptError::Fatal(e)) => return Err(format!("下载失败 {url}: {e}")),
                Err(AttemptError::Retryable(e)) => {
                    tracing::warn!(url = %url, attempt = attempt + 1, error = %e, "download attempt failed");
                    last_error = e;
                    if attempt + 1 < self.max_retries {
                        tokio::time::sleep(self.backoff_delay(attempt)).await;
                    }
                }
            }
        }
        Err(format!("下载失败 {url}: {last_error}"))
    }

    /// 第 attempt 次失败后的等待时间
    fn backoff_delay(&self, attempt: u32) -> Duration {
        self.backoff_base.saturating_mul(2u32.saturating_pow(attempt))
    }

    async fn send(&self, url: &str) -> Result<reqwest::Response, AttemptError> {
        let resp = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| AttemptError::Retryable(format!("Request failed: {e}")))?;

        let status = resp.status();
        if !status.is_success() {
            let msg = format!("HTTP {status}");
            return Err(if is_retryable(status) {
                AttemptError::Retryable(msg)
            } else {
                AttemptError::Fatal(msg)
            });
        }
        Ok(resp)
    }

    async fn attempt_bytes(&self, url: &str, max_bytes: u64) -> Result<Vec<u8>, AttemptError> {
        let mut resp = self.send(url).await?;
        let too_large = |n: u64| AttemptError::Fatal(format!("文件超过大小上限 {max_bytes} 字节 ({n})"));
        if let Some(n) = resp.content_length().filter(|n| *n > max_bytes) {
            return Err(too_large(n));
        }

        let mut data = Vec::new();
        while let Some(chunk) = resp
            .chunk()
            .await
            .map_err(|e| AttemptError::Retryable(format!("Read body: {e}")))?
        {
            data.extend_from_slice(&chunk);
            if data.len() as u64 > max_bytes {
                return Err(too_large(data.len() as u64));
            }
        }
        Ok(data)
    }

    async fn attempt(&self, url: &str, path: &Path) -> Result<(), AttemptError> {
        let mut resp = self.send(url).await?;
        let expected = resp.content_length().filter(|n| *n > 0);
        let mut file = tokio::fs::File::create(path)
            .await
            .map_err(|e| AttemptError::Fatal(format!("Create {}: {e}", path.display())))?;
        let mut written: u64 = 0;
        while let Some(chunk) = resp
            .chunk()
            .await
            .map_err(|e| AttemptError::Retryable(format!("Read body: {e}")))?
        {
            file.write_all(&chunk)
                .await
                .map_err(|e| AttemptError::Fatal(format!("Write {}: {e}", path.display())))?;
            written += chunk.len() as u64;
        }
        file.flush()
            .await
            .map_err(|e| AttemptError::Fatal(format!("Write {}: {e}", path.display())))?;

        if let Some(expected) = expected {
            if written != expected {
                return Err(AttemptError::Retryable(format!(
                    "文件大小不匹配: 期望 {expected}, 实际 {written}"
                )));
            }
        }
        Ok(())
    }
}

fn is_retryable(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

/// 取 URL 最后一段作为文件名（去掉查询串）；取不到时用序号命名
pub fn file_name_for(url: &str, index: usize) -> String {
    let without_query = url.split(['?', '#']).next().unwrap_or(url);
    let last = without_query.trim_end_matches('/').rsplit('/').next().unwrap_or("");
    if last.is_empty() || last.contains(':') {
        format!("video_{index}.mp4")
    } else {
        format!("{index}_{last}")
    }
}
