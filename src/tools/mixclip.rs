//! mixclip：下载素材并调用外部混剪程序
//!
//! 每次调用使用独立的 input/output 子目录；成片取输出目录中最新的 mp4。
//! 无论成功与否，调用结束后都会删除本次的输入目录。

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::process::Command;

use crate::config::{DownloadSection, MixclipSection};
use crate::tools::capability::{Capability, MixclipArgs};
use crate::tools::download::Downloader;
use crate::tools::registry::parse_args;
use crate::tools::schema::args_schema;
use crate::tools::Tool;

pub const NOTHING_DOWNLOADED: &str = "没有成功下载任何视频文件";

pub struct MixclipTool {
    cfg: MixclipSection,
    downloader: Downloader,
}

impl MixclipTool {
    pub fn new(cfg: &MixclipSection, download: &DownloadSection) -> Self {
        Self {
            cfg: cfg.clone(),
            downloader: Downloader::new(download),
        }
    }

    fn command_args(&self, input_dir: &Path, output_dir: &Path, product_name: &str) -> Vec<String> {
        let mut args = vec![
            "--input-dir".to_string(),
            input_dir.display().to_string(),
            "--output-dir".to_string(),
            output_dir.display().to_string(),
            "--product-name".to_string(),
            product_name.to_string(),
            "--output-time".to_string(),
            self.cfg.output_time.to_string(),
            "--num-output".to_string(),
            self.cfg.num_output.to_string(),
        ];
        if self.cfg.keep_original_audio {
            args.push("--keep-original-audio".to_string());
        }
        if let Some(ref music) = self.cfg.background_music_path {
            args.push("--background-music".to_string());
            args.push(music.display().to_string());
            args.push("--background-volume".to_string());
            args.push(self.cfg.background_volume.to_string());
        }
        args
    }

    async fn run(&self, args: &MixclipArgs, input_dir: &Path, output_dir: &Path) -> Result<String, String> {
        tokio::fs::create_dir_all(input_dir)
            .await
            .map_err(|e| format!("混剪失败: {e}"))?;

        let mut downloaded = 0usize;
        let urls = args
            .video_urls
            .iter()
            .map(|u| u.trim())
            .filter(|u| !u.is_empty())
            .take(self.cfg.max_videos);
        for (i, url) in urls.enumerate() {
            match self.downloader.fetch(url, input_dir, i).await {
                Ok(_) => downloaded += 1,
                Err(e) => tracing::error!(url = %url, error = %e, "无法下载视频"),
            }
        }
        if downloaded == 0 {
            return Err(NOTHING_DOWNLOADED.to_string());
        }

        tokio::fs::create_dir_all(output_dir)
            .await
            .map_err(|e| format!("混剪失败: {e}"))?;

        let child = Command::new(&self.cfg.command)
            .args(self.command_args(input_dir, output_dir, &args.product_name))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| format!("混剪失败: {e}"))?;

        let output = tokio::time::timeout(
            Duration::from_secs(self.cfg.timeout_secs),
            child.wait_with_output(),
        )
        .await
        .map_err(|_| format!("混剪失败: 超过 {} 秒未完成", self.cfg.timeout_secs))?
        .map_err(|e| format!("混剪失败: {e}"))?;

        let status = output.status;
        if !status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            tracing::error!(stderr = %stderr.trim(), "mixclip command failed");
            let code = status
                .code()
                .map(|c| c.to_string())
                .unwrap_or_else(|| "signal".to_string());
            return Err(format!("混剪失败，错误码：{code}"));
        }

        let video = newest_mp4(output_dir).map_err(|e| format!("混剪失败: {e}"))?;
        let video = video.canonicalize().unwrap_or(video);
        Ok(format!("混剪结果保存在{}", video.display()))
    }
}

/// 输出目录中修改时间最新的 mp4
pub fn newest_mp4(dir: &Path) -> Result<PathBuf, String> {
    let pattern = dir.join("*.mp4");
    let entries = glob::glob(&pattern.to_string_lossy()).map_err(|e| e.to_string())?;
    let mut files: Vec<(std::time::SystemTime, PathBuf)> = entries
        .filter_map(Result::ok)
        .filter_map(|p| {
            let modified = std::fs::metadata(&p).and_then(|m| m.modified()).ok()?;
            Some((modified, p))
        })
        .collect();
    if files.len() > 1 {
        tracing::warn!(dir = %dir.display(), count = files.len(), "multiple mp4 outputs, picking newest");
    }
    files.sort_by(|a, b| b.0.cmp(&a.0));
    files
        .into_iter()
        .next()
        .map(|(_, p)| p)
        .ok_or_else(|| format!("在目录 {} 中没有找到mp4文件", dir.display()))
}

#[async_trait]
impl Tool for MixclipTool {
    fn name(&self) -> &str {
        Capability::MIXCLIP
    }

    fn description(&self) -> &str {
        "对视频素材进行混剪。输入: {\"video_urls\": [最多3个视频链接，必须来自对话中出现过的有效链接], \"product_name\": \"产品名称\"}。输出: 混剪成片的保存路径。"
    }

    fn parameters_schema(&self) -> Value {
        args_schema::<MixclipArgs>()
    }

    async fn execute(&self, args: Value) -> Result<String, String> {
        let args: MixclipArgs = parse_args(self.name(), args)?;
        if args.product_name.trim().is_empty() {
            return Err("Missing product_name".to_string());
        }

        let run_id = uuid::Uuid::new_v4().simple().to_string();
        let input_dir = self.cfg.input_dir.join(&run_id);
        let output_dir = self.cfg.output_dir.join(&run_id);

        let result = self.run(&args, &input_dir, &output_dir).await;

        if let Err(e) = tokio::fs::remove_dir_all(&input_dir).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(dir = %input_dir.display(), error = %e, "failed to clean input dir");
            }
        }
        if let Err(ref e) = result {
            tracing::error!(product = %args.product_name, error = %e, "mixclip failed");
        }
        result
    }
}
