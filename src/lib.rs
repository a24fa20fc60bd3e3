//! カメラ画像から手話の文字を認識し、その場で撮影したサンプルで
//! 分類器を再学習するための最小構成ライブラリ

pub mod camera;
pub mod commands;
pub mod config;
pub mod error;
pub mod logging;
pub mod ml;
pub mod session;
pub mod types;

pub use camera::{Camera, CaptureError, Permission, StillsCamera};
pub use config::AppConfig;
pub use error::FlowError;
pub use session::{CaptureReceipt, Phase, Recognition, RecognitionSession};
pub use types::{DisplayState, EncodedImage, ImageHandle, Label, LabelIndex, OneHot, Probabilities, TrainingExample};
