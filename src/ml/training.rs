//! モデル学習
//!
//! バッファの全サンプルを1バッチにまとめ、Adam + カテゴリカル交差エントロピーで
//! 固定エポック数だけ学習します。学習は複製したモデルに対して行い、全エポックが
//! 完了した時点で重みを差し替えるため、失敗・キャンセル時に重みは変化しません。

use std::sync::atomic::{AtomicBool, Ordering};

use burn::{
    optim::{AdamConfig, GradientsParams, Optimizer},
    tensor::{activation::log_softmax, backend::Backend, ElementConversion, Tensor},
};
use serde::Serialize;
use thiserror::Error;

use crate::ml::backend::TrainingBackend;
use crate::ml::label_codec::{CodecError, LabelCodec};
use crate::ml::ml_model::{batch_tensor, Classifier, ClassifierError};
use crate::types::{EncodedImage, OneHot, TrainingExample};

/// 既定のエポック数
pub const DEFAULT_EPOCHS: usize = 10;

/// 1エポック分の学習記録
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct EpochRecord {
    pub epoch: usize,
    pub loss: f64,
    pub accuracy: f64,
}

/// エポック順の学習記録
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TrainingLog {
    pub epochs: Vec<EpochRecord>,
}

impl TrainingLog {
    pub fn last(&self) -> Option<&EpochRecord> {
        self.epochs.last()
    }

    pub fn len(&self) -> usize {
        self.epochs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.epochs.is_empty()
    }
}

pub struct FitOptions<'a> {
    pub epochs: usize,
    /// エポック間で確認するキャンセルフラグ
    pub cancel: Option<&'a AtomicBool>,
}

impl Default for FitOptions<'_> {
    fn default() -> Self {
        Self {
            epochs: DEFAULT_EPOCHS,
            cancel: None,
        }
    }
}

/// one-hot 教師に対するカテゴリカル交差エントロピー（バッチ平均）
fn categorical_cross_entropy<B: Backend>(logits: Tensor<B, 2>, targets: Tensor<B, 2>) -> Tensor<B, 1> {
    (targets * log_softmax(logits, 1)).sum_dim(1).mean().neg()
}

fn accuracy<B: Backend>(logits: Tensor<B, 2>, targets: Tensor<B, 2>) -> f64 {
    let [batch_size, _] = logits.dims();
    let correct = logits
        .argmax(1)
        .equal(targets.argmax(1))
        .int()
        .sum()
        .into_scalar()
        .elem::<f64>();
    correct / batch_size as f64
}

impl Classifier {
    /// 重みをその場で学習
    pub fn fit(
        &mut self,
        batch: &[EncodedImage],
        targets: &[OneHot],
        options: &FitOptions<'_>,
    ) -> Result<TrainingLog, ClassifierError> {
        self.fit_with_observer(batch, targets, options, |_| {})
    }

    /// エポックごとに `on_epoch` を呼び出しながら学習
    pub fn fit_with_observer<F>(
        &mut self,
        batch: &[EncodedImage],
        targets: &[OneHot],
        options: &FitOptions<'_>,
        mut on_epoch: F,
    ) -> Result<TrainingLog, ClassifierError>
    where
        F: FnMut(&EpochRecord),
    {
        if batch.len() != targets.len() {
            return Err(ClassifierError::TargetCountMismatch {
                images: batch.len(),
                targets: targets.len(),
            });
        }
        let num_classes = self.config.num_classes;
        if let Some(bad) = targets.iter().find(|t| t.len() != num_classes) {
            return Err(ClassifierError::TargetWidthMismatch {
                expected: num_classes,
                actual: bad.len(),
            });
        }

        let images = batch_tensor::<TrainingBackend>(batch, self.config.input_shape(), &self.device)?;
        let flat_targets: Vec<f32> = targets.iter().flat_map(|t| t.as_slice().iter().copied()).collect();
        let targets = Tensor::<TrainingBackend, 1>::from_floats(flat_targets.as_slice(), &self.device)
            .reshape([batch.len(), num_classes]);

        let mut model = self.model.clone();
        let mut optim = AdamConfig::new().init();
        let mut log = TrainingLog::default();

        for epoch in 0..options.epochs {
            if options.cancel.is_some_and(|c| c.load(Ordering::Relaxed)) {
                tracing::info!("学習がキャンセルされました ({} エポック完了)", epoch);
                return Err(ClassifierError::Cancelled {
                    completed_epochs: epoch,
                });
            }

            let logits = model.forward(images.clone());
            let loss = categorical_cross_entropy(logits.clone(), targets.clone());
            let loss_value = loss.clone().into_scalar().elem::<f64>();
            let accuracy = accuracy(logits, targets.clone());

            let grads = GradientsParams::from_grads(loss.backward(), &model);
            model = optim.step(self.learning_rate, model, grads);

            let record = EpochRecord {
                epoch,
                loss: loss_value,
                accuracy,
            };
            tracing::info!("Epoch {}: loss = {:.6}, accuracy = {:.3}", epoch, loss_value, accuracy);
            if !loss_value.is_finite() {
                tracing::warn!("Epoch {}: 損失が有限値ではありません ({})", epoch, loss_value);
            }
            on_epoch(&record);
            log.epochs.push(record);
        }

        self.model = model;
        Ok(log)
    }
}

#[derive(Debug, Error)]
pub enum TrainError {
    #[error("no training data available")]
    EmptyBuffer,
    #[error("training example #{seq}: {source}")]
    Label { seq: u64, source: CodecError },
    #[error(transparent)]
    Classifier(#[from] ClassifierError),
}

/// バッファ内容から教師データを組み立てて学習を実行
#[derive(Debug, Clone)]
pub struct Trainer {
    codec: LabelCodec,
    epochs: usize,
}

impl Trainer {
    pub fn new(codec: LabelCodec, epochs: usize) -> Self {
        Self { codec, epochs }
    }

    /// 全サンプルのラベルを先に変換してから学習する（途中失敗で部分学習はしない）
    pub fn train(
        &self,
        classifier: &mut Classifier,
        examples: &[TrainingExample],
        cancel: &AtomicBool,
    ) -> Result<TrainingLog, TrainError> {
        if examples.is_empty() {
            return Err(TrainError::EmptyBuffer);
        }

        let targets = examples
            .iter()
            .map(|e| {
                self.codec
                    .one_hot(e.label())
                    .map_err(|source| TrainError::Label { seq: e.seq(), source })
            })
            .collect::<Result<Vec<_>, _>>()?;
        let images: Vec<EncodedImage> = examples.iter().map(|e| e.image().clone()).collect();

        tracing::info!(
            "学習を開始します: {} サンプル, {} エポック, 学習率 {}",
            examples.len(),
            self.epochs,
            classifier.learning_rate
        );

        let options = FitOptions {
            epochs: self.epochs,
            cancel: Some(cancel),
        };
        Ok(classifier.fit(&images, &targets, &options)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ml::dataset::TrainingBuffer;
    use crate::ml::ml_model::ModelConfig;
    use crate::types::LabelIndex;

    const SIZE: usize = 6;

    fn small_classifier() -> Classifier {
        Classifier::new(ModelConfig::new(10).with_image_size(SIZE), 1e-3)
    }

    fn colored(rgb: [f32; 3]) -> EncodedImage {
        let data = (0..SIZE * SIZE).flat_map(|_| rgb).collect();
        EncodedImage::from_hwc(data, SIZE, SIZE).unwrap()
    }

    #[test]
    fn test_fit_reports_every_epoch_in_order() {
        let mut classifier = small_classifier();
        let images = vec![colored([1.0, 0.0, 0.0]), colored([0.0, 0.0, 1.0])];
        let targets = vec![
            OneHot::new(LabelIndex(0), 10).unwrap(),
            OneHot::new(LabelIndex(1), 10).unwrap(),
        ];

        let mut seen = Vec::new();
        let log = classifier
            .fit_with_observer(&images, &targets, &FitOptions { epochs: 4, cancel: None }, |r| {
                seen.push(r.epoch)
            })
            .unwrap();

        assert_eq!(seen, [0, 1, 2, 3]);
        assert_eq!(log.len(), 4);
        assert!(log.epochs.iter().all(|r| r.loss.is_finite()));
        assert!(log.epochs.iter().all(|r| (0.0..=1.0).contains(&r.accuracy)));
    }

    #[test]
    fn test_fit_changes_weights() {
        let mut classifier = small_classifier();
        let before = classifier.weights();
        let images = vec![colored([1.0, 0.0, 0.0])];
        let targets = vec![OneHot::new(LabelIndex(3), 10).unwrap()];
        classifier
            .fit(&images, &targets, &FitOptions { epochs: 2, cancel: None })
            .unwrap();
        assert_ne!(before, classifier.weights());
    }

    #[test]
    fn test_fit_rejects_mismatched_targets() {
        let mut classifier = small_classifier();
        let images = vec![colored([1.0, 0.0, 0.0])];
        let result = classifier.fit(&images, &[], &FitOptions::default());
        assert!(matches!(result, Err(ClassifierError::TargetCountMismatch { .. })));

        let narrow = vec![OneHot::new(LabelIndex(0), 3).unwrap()];
        let result = classifier.fit(&images, &narrow, &FitOptions::default());
        assert!(matches!(result, Err(ClassifierError::TargetWidthMismatch { .. })));
    }

    #[test]
    fn test_non_finite_loss_is_logged_not_raised() {
        let mut classifier = small_classifier();
        let mut data = vec![0.5; SIZE * SIZE * 3];
        data[0] = f32::NAN;
        data[1] = f32::INFINITY;
        let images = vec![EncodedImage::from_hwc(data, SIZE, SIZE).unwrap()];
        let targets = vec![OneHot::new(LabelIndex(4), 10).unwrap()];

        let log = classifier
            .fit(&images, &targets, &FitOptions { epochs: 2, cancel: None })
            .unwrap();

        assert_eq!(log.len(), 2);
        assert!(log.epochs.iter().all(|r| !r.loss.is_finite()));
        // 学習結果はそのまま反映される
        assert!(classifier.weights().iter().any(|w| w.is_nan()));
    }

    #[test]
    fn test_cancelled_fit_keeps_weights() {
        let mut classifier = small_classifier();
        let before = classifier.weights();
        let cancel = AtomicBool::new(true);
        let images = vec![colored([0.0, 1.0, 0.0])];
        let targets = vec![OneHot::new(LabelIndex(2), 10).unwrap()];

        let result = classifier.fit(&images, &targets, &FitOptions { epochs: 3, cancel: Some(&cancel) });
        assert!(matches!(result, Err(ClassifierError::Cancelled { completed_epochs: 0 })));
        assert_eq!(before, classifier.weights());
    }

    #[test]
    fn test_train_empty_buffer_leaves_weights() {
        let trainer = Trainer::new(LabelCodec::default(), DEFAULT_EPOCHS);
        let mut classifier = small_classifier();
        let before = classifier.weights();

        let buffer = TrainingBuffer::new();
        let result = trainer.train(&mut classifier, &buffer.contents(), &AtomicBool::new(false));

        assert!(matches!(result, Err(TrainError::EmptyBuffer)));
        assert_eq!(before, classifier.weights());
    }

    #[test]
    fn test_train_with_invalid_label_is_atomic() {
        let trainer = Trainer::new(LabelCodec::default(), DEFAULT_EPOCHS);
        let mut classifier = small_classifier();
        let before = classifier.weights();

        let mut buffer = TrainingBuffer::new();
        buffer.append(colored([1.0, 0.0, 0.0]), "A");
        buffer.append(colored([0.0, 1.0, 0.0]), "not-a-letter");
        buffer.append(colored([0.0, 0.0, 1.0]), "B");

        let result = trainer.train(&mut classifier, &buffer.contents(), &AtomicBool::new(false));

        match result {
            Err(TrainError::Label { seq, source }) => {
                assert_eq!(seq, 1);
                assert_eq!(source, CodecError::UnknownLabel("not-a-letter".to_string()));
            }
            other => panic!("unexpected result: {:?}", other),
        }
        assert_eq!(before, classifier.weights());
    }

    #[test]
    fn test_train_runs_configured_epochs() {
        let trainer = Trainer::new(LabelCodec::default(), 3);
        let mut classifier = small_classifier();

        let mut buffer = TrainingBuffer::new();
        buffer.append(colored([1.0, 0.0, 0.0]), "a");
        buffer.append(colored([0.0, 0.0, 1.0]), "B");

        let log = trainer
            .train(&mut classifier, &buffer.contents(), &AtomicBool::new(false))
            .unwrap();
        assert_eq!(log.len(), 3);
    }
}
