//! 分類器モデルの定義
//!
//! 入力画像を平坦化して全結合3層で分類する小さなネットワークと、
//! その重みを所有するハンドル [`Classifier`] を提供します。

use burn::{
    config::Config,
    module::{AutodiffModule, Module},
    nn::{Linear, LinearConfig, Relu},
    tensor::{activation::softmax, backend::Backend, Tensor},
};
use thiserror::Error;

use crate::ml::backend::{default_device, Device, InferenceBackend, TrainingBackend};
use crate::ml::encoder::IMAGE_SIZE;
use crate::types::{EncodedImage, Probabilities};

/// 既定のクラス数
pub const NUM_CLASSES: usize = 10;

/// 隠れ層のユニット数
pub const HIDDEN_UNITS: [usize; 2] = [128, 64];

#[derive(Debug, Error)]
pub enum ClassifierError {
    #[error("batch is empty")]
    EmptyBatch,
    #[error("input shape {actual:?} does not match model input {expected:?}")]
    ShapeMismatch {
        expected: [usize; 4],
        actual: [usize; 4],
    },
    #[error("{images} images were given with {targets} targets")]
    TargetCountMismatch { images: usize, targets: usize },
    #[error("target has {actual} classes, model has {expected}")]
    TargetWidthMismatch { expected: usize, actual: usize },
    #[error("training was cancelled after {completed_epochs} epochs")]
    Cancelled { completed_epochs: usize },
    #[error("tensor data error: {0}")]
    Data(String),
}

/// モデル設定
#[derive(Config, Debug)]
pub struct ModelConfig {
    /// 分類クラス数
    pub num_classes: usize,
    /// 入力画像サイズ（正方形）
    #[config(default = 224)]
    pub image_size: usize,
}

impl ModelConfig {
    /// モデルを初期化
    pub fn init<B: Backend>(&self, device: &B::Device) -> SignClassifierNet<B> {
        let d = self.input_features();
        let [h1, h2] = HIDDEN_UNITS;

        tracing::debug!(
            "[Model] 入力: {}x{}x{} -> Flatten {} -> FC {} -> FC {} -> FC {}",
            self.image_size,
            self.image_size,
            EncodedImage::CHANNELS,
            d,
            h1,
            h2,
            self.num_classes
        );

        SignClassifierNet {
            fc1: LinearConfig::new(d, h1).init(device),
            fc2: LinearConfig::new(h1, h2).init(device),
            fc3: LinearConfig::new(h2, self.num_classes).init(device),
            activation: Relu::new(),
        }
    }

    /// Flatten後の特徴次元
    pub fn input_features(&self) -> usize {
        self.image_size * self.image_size * EncodedImage::CHANNELS
    }

    pub fn input_shape(&self) -> [usize; 4] {
        [1, self.image_size, self.image_size, EncodedImage::CHANNELS]
    }
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self::new(NUM_CLASSES).with_image_size(IMAGE_SIZE)
    }
}

/// 手話文字分類用の全結合ネットワーク
///
/// # アーキテクチャ
/// - Flatten: [batch, H, W, 3] -> [batch, H*W*3]
/// - FC: d -> 128 + ReLU
/// - FC: 128 -> 64 + ReLU
/// - FC: 64 -> num_classes
/// - Softmax (推論時)
#[derive(Module, Debug)]
pub struct SignClassifierNet<B: Backend> {
    fc1: Linear<B>,
    fc2: Linear<B>,
    fc3: Linear<B>,
    activation: Relu,
}

impl<B: Backend> SignClassifierNet<B> {
    /// 順伝播
    ///
    /// # 引数
    /// - `images`: バッチ画像 [batch_size, H, W, 3]
    ///
    /// # 戻り値
    /// - クラスごとのロジット [batch_size, num_classes]
    pub fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        let [batch_size, h, w, c] = images.dims();
        let x = images.reshape([batch_size, h * w * c]);

        let x = self.fc1.forward(x);
        let x = self.activation.forward(x);

        let x = self.fc2.forward(x);
        let x = self.activation.forward(x);

        self.fc3.forward(x)
    }

    /// 全パラメータを層順に平坦化して取得
    pub fn flat_parameters(&self) -> Vec<f32> {
        let mut out = Vec::with_capacity(self.num_params());
        for layer in [&self.fc1, &self.fc2, &self.fc3] {
            out.extend(layer.weight.val().into_data().iter::<f32>());
            if let Some(bias) = &layer.bias {
                out.extend(bias.val().into_data().iter::<f32>());
            }
        }
        out
    }
}

/// 画像をバッチテンソル [n, H, W, 3] に連結
pub(crate) fn batch_tensor<B: Backend>(
    images: &[EncodedImage],
    expected: [usize; 4],
    device: &B::Device,
) -> Result<Tensor<B, 4>, ClassifierError> {
    if images.is_empty() {
        return Err(ClassifierError::EmptyBatch);
    }
    let mut pixels = Vec::with_capacity(images.len() * expected[1..].iter().product::<usize>());
    for image in images {
        if image.shape() != expected {
            return Err(ClassifierError::ShapeMismatch {
                expected,
                actual: image.shape(),
            });
        }
        pixels.extend_from_slice(image.as_slice());
    }
    Ok(Tensor::<B, 1>::from_floats(pixels.as_slice(), device).reshape([
        images.len(),
        expected[1],
        expected[2],
        expected[3],
    ]))
}

/// 構築・コンパイル済みの分類器
///
/// 重みは `fit` でのみ更新されます。バージョン管理はなく、
/// 学習が完了すると直前の重みは失われます。
#[derive(Debug, Clone)]
pub struct Classifier {
    pub(crate) model: SignClassifierNet<TrainingBackend>,
    pub(crate) config: ModelConfig,
    pub(crate) learning_rate: f64,
    pub(crate) device: Device,
}

impl Classifier {
    /// ネットワークを構築し、オプティマイザ(Adam)の学習率を設定
    pub fn new(config: ModelConfig, learning_rate: f64) -> Self {
        let device = default_device();
        let model = config.init::<TrainingBackend>(&device);
        tracing::info!(
            "分類器を初期化しました: {} クラス, 入力 {}x{}x{}, パラメータ数 {}",
            config.num_classes,
            config.image_size,
            config.image_size,
            EncodedImage::CHANNELS,
            model.num_params()
        );
        Self {
            model,
            config,
            learning_rate,
            device,
        }
    }

    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    pub fn num_classes(&self) -> usize {
        self.config.num_classes
    }

    /// 各入力に対する確率分布を返す
    pub fn predict(&self, batch: &[EncodedImage]) -> Result<Vec<Probabilities>, ClassifierError> {
        let model: SignClassifierNet<InferenceBackend> = self.model.valid();
        let input = batch_tensor::<InferenceBackend>(batch, self.config.input_shape(), &self.device)?;

        let probs = softmax(model.forward(input), 1);
        let values: Vec<f32> = probs.into_data().iter::<f32>().collect();

        let num_classes = self.config.num_classes;
        if values.len() != batch.len() * num_classes {
            return Err(ClassifierError::Data(format!(
                "expected {} outputs, got {}",
                batch.len() * num_classes,
                values.len()
            )));
        }
        Ok(values
            .chunks(num_classes)
            .map(|row| Probabilities(row.to_vec()))
            .collect())
    }

    /// 現在の重みのスナップショット
    pub fn weights(&self) -> Vec<f32> {
        self.model.flat_parameters()
    }
}
