//! 画像取得（カメラ）の抽象化
//!
//! 実機のカメラは外部の協調者として [`Camera`] トレイトの背後に置きます。
//! [`StillsCamera`] はディレクトリ内の静止画を「撮影」結果として返す実装です。

use std::collections::VecDeque;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use thiserror::Error;

use crate::types::ImageHandle;

const STILL_EXTENSIONS: [&str; 4] = ["png", "jpg", "jpeg", "bmp"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Permission {
    Granted,
    Denied,
}

#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("capture was cancelled")]
    Cancelled,
    #[error("capture failed: {0}")]
    Failed(String),
}

/// カメラ機能
pub trait Camera: Send + Sync {
    /// カメラ使用許可を要求
    fn request_permission(&self) -> impl Future<Output = Permission> + Send;

    /// 静止画を1枚撮影
    fn take_picture(&self) -> impl Future<Output = Result<ImageHandle, CaptureError>> + Send;
}

/// ディレクトリ内の静止画を順番に返すカメラ
///
/// `stage` で指定された画像があればそれを優先し、なければディレクトリの
/// 画像をファイル名順に巡回します。
#[derive(Debug)]
pub struct StillsCamera {
    dir: PathBuf,
    staged: Mutex<VecDeque<PathBuf>>,
    cursor: AtomicUsize,
}

impl StillsCamera {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            staged: Mutex::new(VecDeque::new()),
            cursor: AtomicUsize::new(0),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// 次の撮影で返す画像を指定
    pub fn stage(&self, path: impl Into<PathBuf>) {
        if let Ok(mut staged) = self.staged.lock() {
            staged.push_back(path.into());
        }
    }

    /// 未使用の指定画像をすべて取り消し、取り消した件数を返す
    pub fn clear_staged(&self) -> usize {
        match self.staged.lock() {
            Ok(mut staged) => {
                let count = staged.len();
                staged.clear();
                count
            }
            Err(_) => 0,
        }
    }

    fn next_staged(&self) -> Option<PathBuf> {
        self.staged.lock().ok().and_then(|mut s| s.pop_front())
    }

    async fn list_stills(&self) -> Result<Vec<PathBuf>, CaptureError> {
        let mut entries = tokio::fs::read_dir(&self.dir)
            .await
            .map_err(|e| CaptureError::Failed(format!("{}: {}", self.dir.display(), e)))?;

        let mut stills = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| CaptureError::Failed(e.to_string()))?
        {
            let path = entry.path();
            let is_still = path
                .extension()
                .map(|ext| ext.to_string_lossy().to_lowercase())
                .is_some_and(|ext| STILL_EXTENSIONS.contains(&ext.as_str()));
            if is_still && path.is_file() {
                stills.push(path);
            }
        }
        stills.sort();
        Ok(stills)
    }
}

impl Camera for StillsCamera {
    async fn request_permission(&self) -> Permission {
        match tokio::fs::metadata(&self.dir).await {
            Ok(meta) if meta.is_dir() => Permission::Granted,
            _ => Permission::Denied,
        }
    }

    async fn take_picture(&self) -> Result<ImageHandle, CaptureError> {
        let path = match self.next_staged() {
            Some(path) => path,
            None => {
                let stills = self.list_stills().await?;
                if stills.is_empty() {
                    return Err(CaptureError::Failed(format!(
                        "no still images in {}",
                        self.dir.display()
                    )));
                }
                let index = self.cursor.fetch_add(1, Ordering::Relaxed) % stills.len();
                stills[index].clone()
            }
        };

        tracing::debug!("静止画を取得: {}", path.display());
        let bytes = tokio::fs::read(&path)
            .await
            .map_err(|e| CaptureError::Failed(format!("{}: {}", path.display(), e)))?;
        Ok(ImageHandle::new(bytes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_permission_follows_directory() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(StillsCamera::new(dir.path()).request_permission().await, Permission::Granted);
        assert_eq!(
            StillsCamera::new(dir.path().join("missing")).request_permission().await,
            Permission::Denied
        );
    }

    #[tokio::test]
    async fn test_cycles_stills_in_name_order() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("b.png"), b"second").unwrap();
        std::fs::write(dir.path().join("a.png"), b"first").unwrap();
        std::fs::write(dir.path().join("notes.txt"), b"ignored").unwrap();

        let camera = StillsCamera::new(dir.path());
        let shots: Vec<Vec<u8>> = vec![
            camera.take_picture().await.unwrap().bytes,
            camera.take_picture().await.unwrap().bytes,
            camera.take_picture().await.unwrap().bytes,
        ];
        assert_eq!(shots, [b"first".to_vec(), b"second".to_vec(), b"first".to_vec()]);
    }

    #[tokio::test]
    async fn test_staged_still_comes_first() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.png"), b"dir").unwrap();
        let staged = dir.path().join("elsewhere.jpg");
        std::fs::write(&staged, b"staged").unwrap();

        let camera = StillsCamera::new(dir.path());
        camera.stage(&staged);
        assert_eq!(camera.take_picture().await.unwrap().bytes, b"staged");
        assert_eq!(camera.take_picture().await.unwrap().bytes, b"dir");
    }

    #[tokio::test]
    async fn test_clear_staged_falls_back_to_directory() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.png"), b"dir").unwrap();

        let camera = StillsCamera::new(dir.path());
        camera.stage(dir.path().join("one.jpg"));
        camera.stage(dir.path().join("two.jpg"));
        assert_eq!(camera.clear_staged(), 2);
        assert_eq!(camera.clear_staged(), 0);
        assert_eq!(camera.take_picture().await.unwrap().bytes, b"dir");
    }

    #[tokio::test]
    async fn test_empty_directory_fails() {
        let dir = tempfile::tempdir().unwrap();
        let camera = StillsCamera::new(dir.path());
        assert!(matches!(camera.take_picture().await, Err(CaptureError::Failed(_))));
    }
}
