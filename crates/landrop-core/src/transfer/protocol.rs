//! 数据通道消息格式
//!
//! - 文本帧：JSON 对象。带 `type` 字段的是控制消息
//!   (`session_start` / `session_end`)，不带 `type` 但带 `name` 和 `size`
//!   的是文件元数据。
//! - 二进制帧：紧跟在元数据之后的原始文件字节，没有额外分帧。

use serde::Deserialize;
use serde_json::Value;

/// 数据通道打开后发给浏览器的问候
pub const GREETING: &str = "Data channel established";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelMessage {
    /// 开始一批文件
    SessionStart { session_id: String, total_files: u32 },
    /// 一批文件发送完毕
    SessionEnd,
    /// 下一个文件的元数据
    FileMeta { name: String, size: u64 },
    /// 不认识的控制消息，忽略
    Unknown(String),
}

#[derive(Deserialize)]
struct SessionStartBody {
    #[serde(default)]
    session_id: String,
    #[serde(default)]
    total_files: u32,
}

#[derive(Deserialize)]
struct FileMetaBody {
    name: String,
    size: u64,
}

impl ChannelMessage {
    /// 解析一个文本帧
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        let value: Value = serde_json::from_str(text)?;

        let msg_type = value
            .get("type")
            .and_then(Value::as_str)
            .filter(|t| !t.is_empty())
            .map(str::to_owned);

        match msg_type.as_deref() {
            Some("session_start") => {
                let body: SessionStartBody = serde_json::from_value(value)?;
                Ok(Self::SessionStart {
                    session_id: body.session_id,
                    total_files: body.total_files,
                })
            }
            Some("session_end") => Ok(Self::SessionEnd),
            Some(other) => Ok(Self::Unknown(other.to_string())),
            None => {
                let body: FileMetaBody = serde_json::from_value(value)?;
                Ok(Self::FileMeta {
                    name: body.name,
                    size: body.size,
                })
            }
        }
    }
}
