//! 偏好设置和持久化
//!
//! 服务器只读取 [`Preferences`] 的快照；修改由外部设置界面完成后通过
//! [`crate::ServerController::update`] 重新启动生效。

use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// 默认 HTTP 端口
pub const DEFAULT_PORT: u16 = 8080;

/// 应用偏好设置
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Preferences {
    /// HTTP 监听端口
    pub port: u16,
    /// 接收文件的保存目录
    pub upload_dir: PathBuf,
    /// 允许浏览器下载的共享目录
    pub shared_dir: PathBuf,
    /// 是否发送桌面通知
    pub show_notifications: bool,
    /// 接收完成后是否自动打开文件
    pub auto_open_files: bool,
    /// 是否开放 /files 和 /download
    pub enable_downloads: bool,
    /// 数据通道空闲多久后放弃未完成的文件
    pub transfer_idle_timeout_secs: u64,
}

impl Default for Preferences {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            upload_dir: dirs::download_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("LAN-Drop"),
            shared_dir: dirs::document_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("LAN-Drop Shared"),
            show_notifications: true,
            auto_open_files: false,
            enable_downloads: false,
            transfer_idle_timeout_secs: 120,
        }
    }
}

impl Preferences {
    /// 获取配置文件路径
    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("landrop")
            .join("settings.toml")
    }

    /// 加载设置（如果文件不存在则使用默认值）
    pub fn load() -> Self {
        Self::load_from(&Self::config_path())
    }

    /// 从指定文件加载，读取或解析失败时回退到默认值
    pub fn load_from(path: &Path) -> Self {
        if path.exists() {
            match fs::read_to_string(path) {
                Ok(content) => match toml::from_str(&content) {
                    Ok(prefs) => {
                        debug!("Loaded preferences from {:?}", path);
                        return prefs;
                    }
                    Err(e) => warn!("Failed to parse preferences: {}, using defaults", e),
                },
                Err(e) => warn!("Failed to read preferences file: {}, using defaults", e),
            }
        }
        Self::default()
    }

    /// 保存设置
    pub fn save(&self) -> anyhow::Result<()> {
        self.save_to(&Self::config_path())
    }

    pub fn save_to(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        fs::write(path, content)?;
        debug!("Saved preferences to {:?}", path);
        Ok(())
    }

    /// 确保上传目录和共享目录存在
    pub fn ensure_dirs(&self) -> anyhow::Result<()> {
        fs::create_dir_all(&self.upload_dir)?;
        fs::create_dir_all(&self.shared_dir)?;
        Ok(())
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.transfer_idle_timeout_secs.max(1))
    }
}
