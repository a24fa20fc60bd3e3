//! アプリケーション設定管理モジュール
//!
//! ラベル語彙・モデル・学習・カメラの設定をJSON形式で保存・読み込みします。

use anyhow::{bail, Context};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::ml::{
    LabelCodec, ModelConfig, Normalization, DEFAULT_EPOCHS, DEFAULT_LABELS, IMAGE_SIZE,
};

/// モデル設定
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelSettings {
    /// 入力画像サイズ（正方形、ピクセル）
    pub image_size: usize,
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self {
            image_size: IMAGE_SIZE,
        }
    }
}

/// 画像エンコード設定
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EncoderSettings {
    #[serde(default)]
    pub normalization: Normalization,
}

/// トレーニング設定
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingSettings {
    /// エポック数
    pub num_epochs: usize,
    /// 学習率（Adam）
    pub learning_rate: f64,
    /// 学習バッファの上限（None で無制限）
    #[serde(default)]
    pub buffer_capacity: Option<usize>,
    /// 学習成功後に使用したサンプルを破棄する
    #[serde(default = "default_true")]
    pub clear_after_train: bool,
}

fn default_true() -> bool {
    true
}

impl Default for TrainingSettings {
    fn default() -> Self {
        Self {
            num_epochs: DEFAULT_EPOCHS,
            learning_rate: 1e-3,
            buffer_capacity: Some(256),
            clear_after_train: true,
        }
    }
}

/// カメラ設定
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CameraSettings {
    /// 静止画カメラが読み込むディレクトリ
    #[serde(default)]
    pub stills_dir: Option<String>,
}

/// アプリケーション設定
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// クラスラベル（並び順がクラスインデックス）
    pub labels: Vec<String>,
    pub model: ModelSettings,
    #[serde(default)]
    pub encoder: EncoderSettings,
    pub training: TrainingSettings,
    #[serde(default)]
    pub camera: CameraSettings,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            labels: DEFAULT_LABELS.iter().map(|l| l.to_string()).collect(),
            model: ModelSettings::default(),
            encoder: EncoderSettings::default(),
            training: TrainingSettings::default(),
            camera: CameraSettings::default(),
        }
    }
}

impl AppConfig {
    /// 設定ファイルのデフォルトパス
    pub fn default_path() -> PathBuf {
        PathBuf::from("config.json")
    }

    /// 設定を読み込む
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config: {}", path.display()))?;
        let config: AppConfig = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config: {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// パスから設定を読み込む、存在しない・壊れている場合はデフォルト設定を返す
    pub fn load_or_default_from<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref();
        if !path.exists() {
            tracing::info!("設定ファイルが存在しません。デフォルト設定を使用します");
            return Self::default();
        }
        match Self::load(path) {
            Ok(config) => {
                tracing::info!("設定ファイルを読み込みました: {}", path.display());
                config
            }
            Err(e) => {
                tracing::warn!(
                    "設定ファイルの読み込みに失敗しました ({}): {:#}。デフォルト設定を使用します",
                    path.display(),
                    e
                );
                Self::default()
            }
        }
    }

    /// デフォルトパスから設定を読み込む
    pub fn load_or_default() -> Self {
        Self::load_or_default_from(Self::default_path())
    }

    /// 設定を保存する
    pub fn save<P: AsRef<Path>>(&self, path: P) -> anyhow::Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        fs::write(path.as_ref(), content)
            .with_context(|| format!("Failed to write config: {}", path.as_ref().display()))?;
        Ok(())
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        self.label_codec()?;
        if self.model.image_size == 0 {
            bail!("model.image_size must be greater than 0");
        }
        if self.training.num_epochs == 0 {
            bail!("training.num_epochs must be greater than 0");
        }
        if !(self.training.learning_rate > 0.0) {
            bail!("training.learning_rate must be positive");
        }
        if self.training.buffer_capacity == Some(0) {
            bail!("training.buffer_capacity must be greater than 0");
        }
        Ok(())
    }

    pub fn label_codec(&self) -> anyhow::Result<LabelCodec> {
        LabelCodec::new(self.labels.iter().cloned()).context("Invalid label vocabulary")
    }

    /// 語彙サイズをクラス数とするモデル設定
    pub fn model_config(&self) -> ModelConfig {
        ModelConfig::new(self.labels.len()).with_image_size(self.model.image_size)
    }

    /// 設定情報をログに出力
    pub fn display(&self) {
        tracing::info!("=== アプリケーション設定 ===");
        tracing::info!("ラベル: {}", self.labels.join(", "));
        tracing::info!("入力サイズ: {}x{}", self.model.image_size, self.model.image_size);
        tracing::info!("正規化: {:?}", self.encoder.normalization);
        tracing::info!("エポック数: {}", self.training.num_epochs);
        tracing::info!("学習率: {}", self.training.learning_rate);
        match self.training.buffer_capacity {
            Some(capacity) => tracing::info!("バッファ上限: {}", capacity),
            None => tracing::info!("バッファ上限: なし"),
        }
        tracing::info!("学習後にバッファを破棄: {}", self.training.clear_after_train);
        if let Some(ref dir) = self.camera.stills_dir {
            tracing::info!("静止画ディレクトリ: {}", dir);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.labels.len(), 10);
        assert_eq!(config.model.image_size, 224);
        assert_eq!(config.training.num_epochs, 10);
        assert!(config.training.clear_after_train);
        assert!(config.validate().is_ok());
        assert_eq!(config.model_config().num_classes, 10);
    }

    #[test]
    fn test_serialize_deserialize() {
        let config = AppConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        let deserialized: AppConfig = serde_json::from_str(&json).unwrap();

        assert_eq!(config.labels, deserialized.labels);
        assert_eq!(config.training.buffer_capacity, deserialized.training.buffer_capacity);
        assert_eq!(config.encoder.normalization, deserialized.encoder.normalization);
    }

    #[test]
    fn test_optional_sections_default() {
        let json = r#"{
            "labels": ["yes", "no"],
            "model": { "image_size": 32 },
            "training": { "num_epochs": 3, "learning_rate": 0.01 }
        }"#;
        let config: AppConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.encoder.normalization, Normalization::UnitRange);
        assert_eq!(config.training.buffer_capacity, None);
        assert!(config.training.clear_after_train);
        assert_eq!(config.model_config().num_classes, 2);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = AppConfig::default();
        config.training.num_epochs = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.labels.push("a".to_string());
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.training.learning_rate = f64::NAN;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        let mut config = AppConfig::default();
        config.camera.stills_dir = Some("shots".to_string());
        config.save(&path).unwrap();

        let loaded = AppConfig::load(&path).unwrap();
        assert_eq!(loaded.camera.stills_dir.as_deref(), Some("shots"));

        std::fs::write(&path, "{ not json").unwrap();
        assert!(AppConfig::load(&path).is_err());
        assert_eq!(AppConfig::load_or_default_from(&path).labels.len(), 10);
    }
}
