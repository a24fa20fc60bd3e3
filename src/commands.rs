//! 画面から呼び出される操作
//!
//! 各操作は成功時に表示用の結果、失敗時にユーザー向けメッセージを返します。
//! エラーはここで文字列に変換され、呼び出し元へは伝播しません。

use serde::Serialize;

use crate::camera::{Camera, StillsCamera};
use crate::ml::{EpochRecord, TrainingLog};
use crate::session::RecognitionSession;

/// 学習結果のペイロード
#[derive(Debug, Clone, Serialize)]
pub struct TrainingReport {
    pub epochs: Vec<EpochRecord>,
    pub message: String,
    pub log_lines: Vec<String>,
}

impl From<TrainingLog> for TrainingReport {
    fn from(log: TrainingLog) -> Self {
        let log_lines = log
            .epochs
            .iter()
            .map(|r| format!("Epoch {}: loss = {}", r.epoch, r.loss))
            .collect();
        Self {
            epochs: log.epochs,
            message: "Model training completed!".to_string(),
            log_lines,
        }
    }
}

/// 撮影して認識したラベルを返す
pub async fn recognize<C: Camera>(session: &RecognitionSession<C>) -> Result<String, String> {
    session
        .capture_and_recognize()
        .await
        .map(|r| r.label.to_string())
        .map_err(|e| e.user_message())
}

/// ラベルを設定して学習用画像を撮影する
pub async fn add_training_example<C: Camera>(
    session: &RecognitionSession<C>,
    label: &str,
) -> Result<String, String> {
    session.set_training_label(label);
    session
        .capture_for_training()
        .await
        .map(|receipt| format!("Image captured for label: {}", receipt.label))
        .map_err(|e| e.user_message())
}

/// バッファ内のサンプルで学習する
pub async fn train<C: Camera>(session: &RecognitionSession<C>) -> Result<TrainingReport, String> {
    session
        .train_model()
        .await
        .map(TrainingReport::from)
        .map_err(|e| e.user_message())
}

/// 実行中の学習を中断する
pub fn cancel_training<C: Camera>(session: &RecognitionSession<C>) -> Result<String, String> {
    if session.cancel_training() {
        Ok("Cancelling training...".to_string())
    } else {
        Err("No training is in progress.".to_string())
    }
}

/// 静止画を指定して認識する
///
/// 操作が失敗した場合、未使用の指定は取り消されます。
pub async fn recognize_still(
    session: &RecognitionSession<StillsCamera>,
    path: &str,
) -> Result<String, String> {
    session.camera().stage(path);
    let result = recognize(session).await;
    unstage_on_error(session, result)
}

/// 静止画を指定して学習用に撮影する
///
/// 操作が失敗した場合、未使用の指定は取り消されます。
pub async fn add_training_still(
    session: &RecognitionSession<StillsCamera>,
    label: &str,
    path: &str,
) -> Result<String, String> {
    session.camera().stage(path);
    let result = add_training_example(session, label).await;
    unstage_on_error(session, result)
}

fn unstage_on_error<T>(
    session: &RecognitionSession<StillsCamera>,
    result: Result<T, String>,
) -> Result<T, String> {
    if result.is_err() {
        let dropped = session.camera().clear_staged();
        if dropped > 0 {
            tracing::debug!("指定された静止画 {} 件を取り消しました", dropped);
        }
    }
    result
}
