//! 操作境界でのエラー分類
//!
//! 各操作（認識・学習用撮影・学習）の失敗はすべてここに集約され、
//! ユーザー向けメッセージに変換されます。

use thiserror::Error;

use crate::camera::CaptureError;
use crate::ml::{ClassifierError, CodecError, DecodeError, TrainError};

#[derive(Debug, Error)]
pub enum FlowError {
    #[error("camera permission denied")]
    PermissionDenied,
    #[error(transparent)]
    Capture(#[from] CaptureError),
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error("no training label entered")]
    MissingLabel,
    #[error("no training data available")]
    EmptyBuffer,
    #[error("label error: {0}")]
    LabelEncoding(CodecError),
    #[error("model is not ready")]
    ModelNotReady,
    #[error("training is already in progress")]
    Busy,
    #[error("training was cancelled")]
    TrainingCancelled,
    #[error("inference failed: {0}")]
    Inference(ClassifierError),
    #[error("training failed: {0}")]
    Training(ClassifierError),
    #[error("background task failed: {0}")]
    Task(String),
}

impl FlowError {
    /// 画面に表示するメッセージ
    pub fn user_message(&self) -> String {
        match self {
            FlowError::PermissionDenied => {
                "Camera permission is required for this app to work.".to_string()
            }
            FlowError::Capture(CaptureError::Cancelled) => "Capture was cancelled.".to_string(),
            FlowError::Capture(_) | FlowError::Decode(_) => {
                "Failed to capture image. Please try again.".to_string()
            }
            FlowError::MissingLabel => "Please enter a label for training.".to_string(),
            FlowError::EmptyBuffer => {
                "No training data available. Please capture some images first.".to_string()
            }
            FlowError::LabelEncoding(e) => format!("Invalid label: {}", e),
            FlowError::ModelNotReady => "The model is not ready yet.".to_string(),
            FlowError::Busy => "Training is already in progress.".to_string(),
            FlowError::TrainingCancelled => "Training was cancelled.".to_string(),
            FlowError::Inference(_) => "Failed to recognize the image. Please try again.".to_string(),
            FlowError::Training(e) => format!("Training failed: {}", e),
            FlowError::Task(_) => "Something went wrong. Please try again.".to_string(),
        }
    }
}

impl From<TrainError> for FlowError {
    fn from(e: TrainError) -> Self {
        match e {
            TrainError::EmptyBuffer => FlowError::EmptyBuffer,
            TrainError::Label { source, .. } => FlowError::LabelEncoding(source),
            TrainError::Classifier(ClassifierError::Cancelled { .. }) => FlowError::TrainingCancelled,
            TrainError::Classifier(e) => FlowError::Training(e),
        }
    }
}
