//! 单个数据通道的接收状态机
//!
//! 每个数据通道拥有自己的 [`ChannelReceiver`]，其中最多一个进行中的文件
//! 和最多一个传输会话。所有错误都只影响当前消息，通道继续工作。

use log::{debug, info, warn};
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;

use crate::config::Preferences;
use crate::fs::create_unique;
use crate::status::{FileAction, StatusBus, best_action_for, display_name};
use crate::transfer::protocol::ChannelMessage;

#[derive(Debug, Error)]
pub enum ReceiveError {
    #[error("received file data before file metadata")]
    ChunkWithoutMetadata,
    #[error("malformed message: {0}")]
    Malformed(String),
    #[error("file I/O failed: {0}")]
    Io(#[from] io::Error),
}

/// 一批文件
#[derive(Debug, Clone)]
pub struct TransferSession {
    pub id: String,
    pub total_files: u32,
    pub received_files: u32,
    /// 已保存文件的实际路径，按接收顺序
    pub files: Vec<PathBuf>,
    pub start_time: Instant,
}

/// 正在写入的文件
#[derive(Debug)]
struct InFlightFile {
    name: String,
    path: PathBuf,
    expected_size: u64,
    bytes_received: u64,
    file: File,
}

pub struct ChannelReceiver {
    upload_dir: PathBuf,
    show_notifications: bool,
    auto_open_files: bool,
    bus: StatusBus,
    session: Option<TransferSession>,
    current: Option<InFlightFile>,
    last_activity: Instant,
}

impl ChannelReceiver {
    pub fn new(prefs: &Preferences, bus: StatusBus) -> Self {
        Self {
            upload_dir: prefs.upload_dir.clone(),
            show_notifications: prefs.show_notifications,
            auto_open_files: prefs.auto_open_files,
            bus,
            session: None,
            current: None,
            last_activity: Instant::now(),
        }
    }

    pub fn session(&self) -> Option<&TransferSession> {
        self.session.as_ref()
    }

    pub fn has_open_file(&self) -> bool {
        self.current.is_some()
    }

    /// 处理一个数据通道帧
    pub async fn handle_frame(&mut self, is_string: bool, data: &[u8]) -> Result<(), ReceiveError> {
        if is_string {
            let text = std::str::from_utf8(data)
                .map_err(|e| ReceiveError::Malformed(e.to_string()))?;
            self.handle_text(text).await
        } else {
            self.handle_binary(data).await
        }
    }

    pub async fn handle_text(&mut self, text: &str) -> Result<(), ReceiveError> {
        self.last_activity = Instant::now();

        let msg =
            ChannelMessage::parse(text).map_err(|e| ReceiveError::Malformed(e.to_string()))?;

        match msg {
            ChannelMessage::SessionStart {
                session_id,
                total_files,
            } => {
                // 批量传输过程中保持安静，完成时再统一通知
                debug!("Session {} started ({} files)", session_id, total_files);
                self.session = Some(TransferSession {
                    id: session_id,
                    total_files,
                    received_files: 0,
                    files: Vec::new(),
                    start_time: Instant::now(),
                });
                Ok(())
            }
            ChannelMessage::SessionEnd => {
                self.finish_session();
                Ok(())
            }
            ChannelMessage::FileMeta { name, size } => self.open_file(name, size).await,
            ChannelMessage::Unknown(msg_type) => {
                debug!("Ignoring unknown control message: {}", msg_type);
                Ok(())
            }
        }
    }

    pub async fn handle_binary(&mut self, data: &[u8]) -> Result<(), ReceiveError> {
        self.last_activity = Instant::now();

        let Some(current) = self.current.as_mut() else {
            return Err(ReceiveError::ChunkWithoutMetadata);
        };

        if let Err(e) = current.file.write_all(data).await {
            self.abandon().await;
            return Err(e.into());
        }
        current.bytes_received += data.len() as u64;

        if current.bytes_received >= current.expected_size {
            self.complete_current().await?;
        }
        Ok(())
    }

    /// 放弃未完成的文件并删除已写入的部分
    pub async fn abandon(&mut self) {
        if let Some(current) = self.current.take() {
            warn!(
                "Abandoning partial file {:?} ({}/{} bytes)",
                current.path, current.bytes_received, current.expected_size
            );
            drop(current.file);
            if let Err(e) = tokio::fs::remove_file(&current.path).await {
                warn!("Failed to remove partial file {:?}: {}", current.path, e);
            }
        }
    }

    /// 空闲超过 `idle` 时放弃进行中的文件和会话，返回是否发生了清理
    pub async fn expire_if_idle(&mut self, idle: Duration) -> bool {
        if self.current.is_none() && self.session.is_none() {
            return false;
        }
        if self.last_activity.elapsed() < idle {
            return false;
        }

        self.abandon().await;
        if let Some(session) = self.session.take() {
            warn!(
                "Session {} stalled after {}/{} files",
                session.id, session.received_files, session.total_files
            );
        }
        self.bus.report("Transfer timed out");
        true
    }

    async fn open_file(&mut self, name: String, size: u64) -> Result<(), ReceiveError> {
        if self.current.is_some() {
            warn!("New file metadata arrived before the previous file completed");
            self.abandon().await;
        }

        let (path, file) = create_unique(&self.upload_dir, &name).await?;
        debug!("Receiving {} ({} bytes) into {:?}", name, size, path);
        self.bus.report(format!("Receiving: {}", display_name(&name)));

        self.current = Some(InFlightFile {
            name,
            path,
            expected_size: size,
            bytes_received: 0,
            file,
        });

        if size == 0 {
            self.complete_current().await?;
        }
        Ok(())
    }

    async fn complete_current(&mut self) -> Result<(), ReceiveError> {
        let Some(mut current) = self.current.take() else {
            return Ok(());
        };

        if let Err(e) = current.file.flush().await {
            let _ = tokio::fs::remove_file(&current.path).await;
            return Err(e.into());
        }
        drop(current.file);

        info!(
            "File {:?} received completely ({} bytes)",
            current.path, current.bytes_received
        );
        self.bus
            .report(format!("Received: {}", display_name(&current.name)));

        if let Some(session) = self.session.as_mut() {
            session.files.push(current.path);
            session.received_files += 1;
            if session.received_files > session.total_files {
                warn!(
                    "Session {} announced {} files but sent more",
                    session.id, session.total_files
                );
                session.total_files = session.received_files;
            }
        }
        Ok(())
    }

    fn finish_session(&mut self) {
        let Some(session) = self.session.take() else {
            debug!("session_end without an active session");
            return;
        };

        let count = session.total_files;
        match session.files.first() {
            Some(path) if count == 1 => {
                let action = best_action_for(path);
                if self.show_notifications {
                    self.bus.notify(
                        format!("Received file: {}", file_name_of(path)),
                        path.clone(),
                        action,
                    );
                    if self.auto_open_files {
                        self.bus.request_action(path.clone(), action);
                    }
                }
            }
            _ => {
                if self.show_notifications {
                    self.bus.notify(
                        format!("Received {} files", count),
                        self.upload_dir.clone(),
                        FileAction::Show,
                    );
                    if self.auto_open_files {
                        self.bus
                            .request_action(self.upload_dir.clone(), FileAction::OpenFolder);
                    }
                }
            }
        }

        // 结束状态只看宣告的数量
        if count == 1 {
            self.bus.report("File received");
        } else {
            self.bus.report(format!("Received {} files", count));
        }
    }
}

fn file_name_of(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::status::StatusEvent;
    use tokio::sync::broadcast;

    fn receiver_in(dir: &Path, auto_open: bool) -> (ChannelReceiver, broadcast::Receiver<StatusEvent>) {
        let prefs = Preferences {
            upload_dir: dir.to_path_buf(),
            show_notifications: true,
            auto_open_files: auto_open,
            ..Default::default()
        };
        let bus = StatusBus::new();
        let rx = bus.subscribe();
        (ChannelReceiver::new(&prefs, bus), rx)
    }

    fn drain(rx: &mut broadcast::Receiver<StatusEvent>) -> Vec<StatusEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    fn statuses(events: &[StatusEvent]) -> Vec<String> {
        events
            .iter()
            .filter_map(|e| match e {
                StatusEvent::Status(s) => Some(s.clone()),
                _ => None,
            })
            .collect()
    }

    async fn send_file(r: &mut ChannelReceiver, name: &str, body: &[u8]) {
        let meta = serde_json::json!({ "name": name, "size": body.len() }).to_string();
        r.handle_text(&meta).await.unwrap();
        for chunk in body.chunks(4) {
            r.handle_binary(chunk).await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_session_of_two_files() {
        let dir = tempfile::tempdir().unwrap();
        let (mut r, mut rx) = receiver_in(dir.path(), false);

        r.handle_text(r#"{"type":"session_start","session_id":"s1","total_files":2}"#)
            .await
            .unwrap();
        send_file(&mut r, "one.txt", b"first file").await;
        send_file(&mut r, "two.bin", b"second file body").await;

        let session = r.session().unwrap();
        assert_eq!(session.received_files, 2);
        assert_eq!(session.files.len(), 2);

        r.handle_text(r#"{"type":"session_end"}"#).await.unwrap();
        assert!(r.session().is_none());

        assert_eq!(std::fs::read(dir.path().join("one.txt")).unwrap(), b"first file");
        assert_eq!(
            std::fs::read(dir.path().join("two.bin")).unwrap(),
            b"second file body"
        );

        let events = drain(&mut rx);
        let statuses = statuses(&events);
        assert_eq!(
            statuses.iter().filter(|s| *s == "Received 2 files").count(),
            1
        );
        assert!(statuses.contains(&"Receiving: one.txt".to_string()));
        assert!(statuses.contains(&"Received: two.bin".to_string()));
        assert!(events.iter().any(|e| matches!(
            e,
            StatusEvent::Notification(n) if n.content == "Received 2 files"
        )));
        assert!(!events.iter().any(|e| matches!(e, StatusEvent::Action { .. })));
    }

    #[tokio::test]
    async fn test_new_session_starts_from_zero() {
        let dir = tempfile::tempdir().unwrap();
        let (mut r, _rx) = receiver_in(dir.path(), false);

        r.handle_text(r#"{"type":"session_start","session_id":"a","total_files":1}"#)
            .await
            .unwrap();
        send_file(&mut r, "a.txt", b"aaaa").await;
        r.handle_text(r#"{"type":"session_end"}"#).await.unwrap();

        r.handle_text(r#"{"type":"session_start","session_id":"b","total_files":2}"#)
            .await
            .unwrap();
        let session = r.session().unwrap();
        assert_eq!(session.id, "b");
        assert_eq!(session.received_files, 0);
        assert!(session.files.is_empty());
    }

    #[tokio::test]
    async fn test_single_file_session_requests_action_when_auto_open() {
        let dir = tempfile::tempdir().unwrap();
        let (mut r, mut rx) = receiver_in(dir.path(), true);

        r.handle_text(r#"{"type":"session_start","session_id":"s","total_files":1}"#)
            .await
            .unwrap();
        send_file(&mut r, "picture.png", b"\x89PNG....").await;
        r.handle_text(r#"{"type":"session_end"}"#).await.unwrap();

        let events = drain(&mut rx);
        let saved = dir.path().join("picture.png");
        assert!(events.contains(&StatusEvent::Action {
            path: saved.clone(),
            action: FileAction::Open
        }));
        assert!(events.iter().any(|e| matches!(
            e,
            StatusEvent::Notification(n) if n.content == "Received file: picture.png" && n.file_path == saved
        )));
        assert_eq!(statuses(&events).last().unwrap(), "File received");
    }

    #[tokio::test]
    async fn test_multi_file_session_opens_folder_when_auto_open() {
        let dir = tempfile::tempdir().unwrap();
        let (mut r, mut rx) = receiver_in(dir.path(), true);

        r.handle_text(r#"{"type":"session_start","session_id":"s","total_files":2}"#)
            .await
            .unwrap();
        send_file(&mut r, "a.zip", b"zip").await;
        send_file(&mut r, "b.zip", b"zip").await;
        r.handle_text(r#"{"type":"session_end"}"#).await.unwrap();

        let events = drain(&mut rx);
        assert!(events.contains(&StatusEvent::Action {
            path: dir.path().to_path_buf(),
            action: FileAction::OpenFolder
        }));
    }

    #[tokio::test]
    async fn test_chunk_without_metadata_does_not_poison_channel() {
        let dir = tempfile::tempdir().unwrap();
        let (mut r, _rx) = receiver_in(dir.path(), false);

        let err = r.handle_binary(b"orphan").await.unwrap_err();
        assert!(matches!(err, ReceiveError::ChunkWithoutMetadata));

        send_file(&mut r, "after.txt", b"valid data").await;
        assert!(!r.has_open_file());
        assert_eq!(std::fs::read(dir.path().join("after.txt")).unwrap(), b"valid data");
    }

    #[tokio::test]
    async fn test_file_without_session_completes_silently() {
        let dir = tempfile::tempdir().unwrap();
        let (mut r, mut rx) = receiver_in(dir.path(), true);

        send_file(&mut r, "loose.pdf", b"%PDF").await;

        let events = drain(&mut rx);
        assert_eq!(
            statuses(&events),
            vec!["Receiving: loose.pdf".to_string(), "Received: loose.pdf".to_string()]
        );
        assert!(!events.iter().any(|e| matches!(e, StatusEvent::Notification(_))));
    }

    #[tokio::test]
    async fn test_colliding_names_get_suffixes_and_session_tracks_real_paths() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("dup.txt"), b"existing").unwrap();
        let (mut r, _rx) = receiver_in(dir.path(), false);

        r.handle_text(r#"{"type":"session_start","session_id":"s","total_files":1}"#)
            .await
            .unwrap();
        send_file(&mut r, "dup.txt", b"new").await;

        assert_eq!(r.session().unwrap().files, vec![dir.path().join("dup_1.txt")]);
        assert_eq!(std::fs::read(dir.path().join("dup.txt")).unwrap(), b"existing");
    }

    #[tokio::test]
    async fn test_long_names_are_truncated_in_status() {
        let dir = tempfile::tempdir().unwrap();
        let (mut r, mut rx) = receiver_in(dir.path(), false);

        send_file(&mut r, "vacation-2024.jpg", b"jpeg").await;

        assert_eq!(
            statuses(&drain(&mut rx)),
            vec!["Receiving: vacatio...".to_string(), "Received: vacatio...".to_string()]
        );
    }

    #[tokio::test]
    async fn test_zero_length_file_completes_on_metadata() {
        let dir = tempfile::tempdir().unwrap();
        let (mut r, _rx) = receiver_in(dir.path(), false);

        r.handle_text(r#"{"name":"empty.txt","size":0}"#).await.unwrap();
        assert!(!r.has_open_file());
        assert_eq!(std::fs::metadata(dir.path().join("empty.txt")).unwrap().len(), 0);
    }

    #[tokio::test]
    async fn test_replacing_incomplete_file_removes_partial() {
        let dir = tempfile::tempdir().unwrap();
        let (mut r, _rx) = receiver_in(dir.path(), false);

        r.handle_text(r#"{"name":"partial.bin","size":100}"#).await.unwrap();
        r.handle_binary(b"only a bit").await.unwrap();
        send_file(&mut r, "whole.bin", b"complete").await;

        assert!(!dir.path().join("partial.bin").exists());
        assert!(dir.path().join("whole.bin").exists());
    }

    #[tokio::test]
    async fn test_idle_expiry_discards_state() {
        let dir = tempfile::tempdir().unwrap();
        let (mut r, mut rx) = receiver_in(dir.path(), false);

        assert!(!r.expire_if_idle(Duration::ZERO).await);

        r.handle_text(r#"{"type":"session_start","session_id":"s","total_files":1}"#)
            .await
            .unwrap();
        r.handle_text(r#"{"name":"stalled.bin","size":10}"#).await.unwrap();
        r.handle_binary(b"abc").await.unwrap();

        assert!(!r.expire_if_idle(Duration::from_secs(3600)).await);
        assert!(r.expire_if_idle(Duration::ZERO).await);
        assert!(!r.has_open_file());
        assert!(r.session().is_none());
        assert!(!dir.path().join("stalled.bin").exists());
        assert!(statuses(&drain(&mut rx)).contains(&"Transfer timed out".to_string()));
    }

    #[tokio::test]
    async fn test_malformed_text_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let (mut r, _rx) = receiver_in(dir.path(), false);

        assert!(matches!(
            r.handle_frame(true, b"not json").await,
            Err(ReceiveError::Malformed(_))
        ));
        assert!(matches!(
            r.handle_frame(true, &[0xff, 0xfe]).await,
            Err(ReceiveError::Malformed(_))
        ));
    }

    #[tokio::test]
    async fn test_extra_files_keep_received_within_total() {
        let dir = tempfile::tempdir().unwrap();
        let (mut r, _rx) = receiver_in(dir.path(), false);

        r.handle_text(r#"{"type":"session_start","session_id":"s","total_files":1}"#)
            .await
            .unwrap();
        send_file(&mut r, "a", b"1").await;
        send_file(&mut r, "b", b"2").await;

        let session = r.session().unwrap();
        assert!(session.received_files <= session.total_files);
        assert_eq!(session.received_files, 2);
    }

    #[tokio::test]
    async fn test_huge_announced_total_is_only_a_count() {
        let dir = tempfile::tempdir().unwrap();
        let (mut r, mut rx) = receiver_in(dir.path(), false);

        r.handle_text(r#"{"type":"session_start","session_id":"x","total_files":4294967295}"#)
            .await
            .unwrap();
        let session = r.session().unwrap();
        assert_eq!(session.total_files, u32::MAX);
        assert!(session.files.is_empty());

        send_file(&mut r, "still-works.txt", b"ok").await;
        assert_eq!(r.session().unwrap().received_files, 1);

        r.handle_text(r#"{"type":"session_end"}"#).await.unwrap();
        assert_eq!(
            statuses(&drain(&mut rx)).last().unwrap(),
            &format!("Received {} files", u32::MAX)
        );
    }

    #[tokio::test]
    async fn test_early_end_of_single_file_session_reports_file_received() {
        let dir = tempfile::tempdir().unwrap();
        let (mut r, mut rx) = receiver_in(dir.path(), true);

        r.handle_text(r#"{"type":"session_start","session_id":"s","total_files":1}"#)
            .await
            .unwrap();
        r.handle_text(r#"{"type":"session_end"}"#).await.unwrap();

        let events = drain(&mut rx);
        assert_eq!(statuses(&events), vec!["File received".to_string()]);
        // 没有已保存的文件时退回到目录通知
        assert!(events.iter().any(|e| matches!(
            e,
            StatusEvent::Notification(n) if n.content == "Received 1 files" && n.file_path == dir.path()
        )));
        assert!(events.contains(&StatusEvent::Action {
            path: dir.path().to_path_buf(),
            action: FileAction::OpenFolder
        }));
    }

    #[tokio::test]
    async fn test_short_session_reports_announced_count() {
        let dir = tempfile::tempdir().unwrap();
        let (mut r, mut rx) = receiver_in(dir.path(), false);

        r.handle_text(r#"{"type":"session_start","session_id":"s","total_files":3}"#)
            .await
            .unwrap();
        send_file(&mut r, "only.txt", b"one").await;
        r.handle_text(r#"{"type":"session_end"}"#).await.unwrap();

        assert_eq!(
            statuses(&drain(&mut rx)).last().unwrap(),
            "Received 3 files"
        );
    }
}
