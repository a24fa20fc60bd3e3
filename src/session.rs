//! 認識フロー
//!
//! 1画面分のセッション状態（分類器・学習バッファ・表示状態）を所有し、
//! 「認識」「学習用撮影」「学習」の各操作を実行します。
//!
//! 各操作は独立しており、どの段階で失敗しても分類器の重みとバッファは
//! 変更されずに待機状態へ戻ります。

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use serde::Serialize;

use crate::camera::{Camera, Permission};
use crate::config::AppConfig;
use crate::error::FlowError;
use crate::ml::{
    Classifier, ClassifierError, ImageEncoder, LabelCodec, ModelConfig, Trainer, TrainingBuffer,
    TrainingLog,
};
use crate::types::{DisplayState, EncodedImage, Label, LabelIndex, Probabilities};

/// 操作の進行段階
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    AcquiringImage,
    Encoding,
    Inferring,
    Buffering,
    Training,
}

/// 認識結果
#[derive(Debug, Clone, Serialize)]
pub struct Recognition {
    pub label: Label,
    pub index: LabelIndex,
    pub probabilities: Probabilities,
}

impl Recognition {
    /// 予測クラスの確率
    pub fn confidence(&self) -> f32 {
        self.probabilities.get(self.index).unwrap_or(0.0)
    }
}

/// 学習用撮影の結果
#[derive(Debug, Clone, Serialize)]
pub struct CaptureReceipt {
    pub label: String,
    pub seq: u64,
    pub buffered: usize,
}

/// 実行中の学習のキャンセルトークン（`None` なら待機中）
type ActiveRun = Mutex<Option<Arc<AtomicBool>>>;

/// 操作終了時に実行中の学習を必ず解除する
struct BusyGuard<'a>(&'a ActiveRun);

impl<'a> BusyGuard<'a> {
    /// 待機中なら新しいトークンを登録する。学習中なら `None`
    fn acquire(run: &'a ActiveRun) -> Option<(Self, Arc<AtomicBool>)> {
        let mut slot = lock(run);
        if slot.is_some() {
            return None;
        }
        let cancel = Arc::new(AtomicBool::new(false));
        *slot = Some(cancel.clone());
        Some((Self(run), cancel))
    }
}

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        lock(self.0).take();
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

pub struct RecognitionSession<C: Camera> {
    camera: C,
    codec: LabelCodec,
    encoder: ImageEncoder,
    trainer: Trainer,
    model_config: ModelConfig,
    learning_rate: f64,
    clear_after_train: bool,
    classifier: Arc<tokio::sync::Mutex<Option<Classifier>>>,
    ready: AtomicBool,
    permission_granted: AtomicBool,
    buffer: Mutex<TrainingBuffer>,
    display: Mutex<DisplayState>,
    active_run: ActiveRun,
}

impl<C: Camera> RecognitionSession<C> {
    pub fn new(config: &AppConfig, camera: C) -> anyhow::Result<Self> {
        config.validate()?;
        let codec = config.label_codec()?;
        let buffer = match config.training.buffer_capacity {
            Some(capacity) => TrainingBuffer::with_capacity(capacity),
            None => TrainingBuffer::new(),
        };

        Ok(Self {
            camera,
            encoder: ImageEncoder::new(config.model.image_size, config.encoder.normalization),
            trainer: Trainer::new(codec.clone(), config.training.num_epochs),
            codec,
            model_config: config.model_config(),
            learning_rate: config.training.learning_rate,
            clear_after_train: config.training.clear_after_train,
            classifier: Arc::new(tokio::sync::Mutex::new(None)),
            ready: AtomicBool::new(false),
            permission_granted: AtomicBool::new(false),
            buffer: Mutex::new(buffer),
            display: Mutex::new(DisplayState::default()),
            active_run: Mutex::new(None),
        })
    }

    /// カメラ許可を要求し、分類器を構築する
    ///
    /// 許可が得られなくても分類器は構築されます（撮影時に再要求）。
    pub async fn init(&self) -> Result<(), FlowError> {
        if let Err(e) = self.ensure_permission().await {
            tracing::warn!("カメラの使用が許可されていません: {}", e);
        }

        let mut slot = self.classifier.lock().await;
        if slot.is_none() {
            let config = self.model_config.clone();
            let learning_rate = self.learning_rate;
            let classifier = tokio::task::spawn_blocking(move || Classifier::new(config, learning_rate))
                .await
                .map_err(|e| FlowError::Task(e.to_string()))?;
            *slot = Some(classifier);
        }
        self.ready.store(true, Ordering::Release);
        Ok(())
    }

    pub fn camera(&self) -> &C {
        &self.camera
    }

    pub fn codec(&self) -> &LabelCodec {
        &self.codec
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    pub fn is_training(&self) -> bool {
        lock(&self.active_run).is_some()
    }

    pub fn display_state(&self) -> DisplayState {
        lock(&self.display).clone()
    }

    pub fn set_training_label(&self, label: impl Into<String>) {
        lock(&self.display).training_label = label.into();
    }

    pub fn buffered_examples(&self) -> usize {
        lock(&self.buffer).len()
    }

    /// 現在の分類器の重み（未初期化なら `None`）
    pub async fn weights(&self) -> Option<Vec<f32>> {
        self.classifier.lock().await.as_ref().map(Classifier::weights)
    }

    /// 実行中の学習をエポックの区切りで中断する。学習中でなければ何もしない
    pub fn cancel_training(&self) -> bool {
        let Some(cancel) = lock(&self.active_run).clone() else {
            return false;
        };
        cancel.store(true, Ordering::Release);
        tracing::info!("学習のキャンセルを要求しました");
        true
    }

    /// 撮影して認識し、結果を表示状態に反映する
    pub async fn capture_and_recognize(&self) -> Result<Recognition, FlowError> {
        let result = self.recognize_inner().await;
        match &result {
            Ok(recognition) => {
                lock(&self.display).recognized_text = recognition.label.to_string();
                tracing::info!(
                    "認識結果: {} (確率 {:.3})",
                    recognition.label,
                    recognition.confidence()
                );
            }
            Err(e) => tracing::warn!("認識に失敗しました: {}", e),
        }
        self.enter("recognize", Phase::Idle);
        result
    }

    /// 入力中のラベルで撮影し、学習バッファに追加する
    pub async fn capture_for_training(&self) -> Result<CaptureReceipt, FlowError> {
        let result = self.capture_for_training_inner().await;
        match &result {
            Ok(receipt) => tracing::info!(
                "学習用画像を追加しました: ラベル {} (#{}, 計 {} 枚)",
                receipt.label,
                receipt.seq,
                receipt.buffered
            ),
            Err(e) => tracing::warn!("学習用撮影に失敗しました: {}", e),
        }
        self.enter("capture", Phase::Idle);
        result
    }

    /// バッファ内の全サンプルで分類器を学習する
    pub async fn train_model(&self) -> Result<TrainingLog, FlowError> {
        let result = self.train_inner().await;
        match &result {
            Ok(log) => tracing::info!(
                "学習が完了しました: {} エポック, 最終損失 {:?}",
                log.len(),
                log.last().map(|r| r.loss)
            ),
            Err(e) => tracing::warn!("学習に失敗しました: {}", e),
        }
        self.enter("train", Phase::Idle);
        result
    }

    fn enter(&self, action: &str, phase: Phase) {
        tracing::debug!("[{}] -> {:?}", action, phase);
    }

    async fn ensure_permission(&self) -> Result<(), FlowError> {
        if self.permission_granted.load(Ordering::Acquire) {
            return Ok(());
        }
        match self.camera.request_permission().await {
            Permission::Granted => {
                self.permission_granted.store(true, Ordering::Release);
                tracing::info!("カメラの使用が許可されました");
                Ok(())
            }
            Permission::Denied => Err(FlowError::PermissionDenied),
        }
    }

    async fn acquire(&self, action: &str) -> Result<EncodedImage, FlowError> {
        self.ensure_permission().await?;

        self.enter(action, Phase::AcquiringImage);
        let handle = self.camera.take_picture().await?;

        self.enter(action, Phase::Encoding);
        Ok(self.encoder.encode_async(handle).await?)
    }

    async fn recognize_inner(&self) -> Result<Recognition, FlowError> {
        if !self.is_ready() {
            return Err(FlowError::ModelNotReady);
        }
        let image = self.acquire("recognize").await?;

        self.enter("recognize", Phase::Inferring);
        let slot = self.classifier.clone().lock_owned().await;
        let predicted = tokio::task::spawn_blocking(move || {
            slot.as_ref()
                .map(|classifier| classifier.predict(std::slice::from_ref(&image)))
        })
        .await
        .map_err(|e| FlowError::Task(e.to_string()))?
        .ok_or(FlowError::ModelNotReady)?
        .map_err(FlowError::Inference)?;

        let probabilities = predicted
            .into_iter()
            .next()
            .ok_or_else(|| FlowError::Inference(ClassifierError::Data("empty prediction".into())))?;
        let index = probabilities.argmax().ok_or_else(|| {
            FlowError::Inference(ClassifierError::Data("prediction has no finite values".into()))
        })?;
        let label = self.codec.decode(index).map_err(FlowError::LabelEncoding)?.clone();

        Ok(Recognition {
            label,
            index,
            probabilities,
        })
    }

    async fn capture_for_training_inner(&self) -> Result<CaptureReceipt, FlowError> {
        let label = lock(&self.display).training_label.trim().to_string();
        if label.is_empty() {
            return Err(FlowError::MissingLabel);
        }
        self.codec.encode(&label).map_err(FlowError::LabelEncoding)?;

        let image = self.acquire("capture").await?;

        self.enter("capture", Phase::Buffering);
        let mut buffer = lock(&self.buffer);
        let seq = buffer.append(image, label.clone());
        Ok(CaptureReceipt {
            label,
            seq,
            buffered: buffer.len(),
        })
    }

    async fn train_inner(&self) -> Result<TrainingLog, FlowError> {
        if !self.is_ready() {
            return Err(FlowError::ModelNotReady);
        }
        let examples = lock(&self.buffer).contents();
        let Some(last_seq) = examples.last().map(|e| e.seq()) else {
            return Err(FlowError::EmptyBuffer);
        };
        let Some((_busy, cancel)) = BusyGuard::acquire(&self.active_run) else {
            return Err(FlowError::Busy);
        };

        self.enter("train", Phase::Training);
        let mut slot = self.classifier.clone().lock_owned().await;
        let trainer = self.trainer.clone();
        let log = tokio::task::spawn_blocking(move || match slot.as_mut() {
            Some(classifier) => trainer
                .train(classifier, &examples, &cancel)
                .map_err(FlowError::from),
            None => Err(FlowError::ModelNotReady),
        })
        .await
        .map_err(|e| FlowError::Task(e.to_string()))??;

        if self.clear_after_train {
            let removed = lock(&self.buffer).clear_through(last_seq);
            tracing::debug!("学習に使用した {} 件のサンプルを破棄しました", removed);
        }
        Ok(log)
    }
}
