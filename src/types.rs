use serde::{Deserialize, Serialize};
use std::fmt;

/// 語彙に含まれるクラスラベル（例: "A"）
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Label(String);

impl Label {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// 語彙内のクラスインデックス [0, 語彙サイズ)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct LabelIndex(pub usize);

impl fmt::Display for LabelIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// カメラから取得した生の画像バイト列（JPEG/PNGなど）
#[derive(Debug, Clone)]
pub struct ImageHandle {
    pub bytes: Vec<u8>,
}

impl ImageHandle {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }
}

/// 分類器入力用に正規化された画像
///
/// 形状は (1, height, width, 3)。先頭はバッチ次元で、データは
/// HWC 順（行優先、チャネルがインターリーブ）で平坦化されています。
#[derive(Debug, Clone, PartialEq)]
pub struct EncodedImage {
    data: Vec<f32>,
    height: usize,
    width: usize,
}

impl EncodedImage {
    /// チャネル数（RGB固定）
    pub const CHANNELS: usize = 3;

    /// 平坦化済みデータから作成。長さが形状と一致しない場合は `None`
    pub fn from_hwc(data: Vec<f32>, height: usize, width: usize) -> Option<Self> {
        if data.len() != height * width * Self::CHANNELS {
            return None;
        }
        Some(Self { data, height, width })
    }

    /// バッチ次元込みの形状 [1, H, W, C]
    pub fn shape(&self) -> [usize; 4] {
        [1, self.height, self.width, Self::CHANNELS]
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }
}

/// 1入力に対するクラスごとの確率分布
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Probabilities(pub Vec<f32>);

impl Probabilities {
    /// 最大確率のインデックス（argmax）。NaNは無視します
    pub fn argmax(&self) -> Option<LabelIndex> {
        self.0
            .iter()
            .enumerate()
            .filter(|(_, p)| !p.is_nan())
            .max_by(|(_, a), (_, b)| a.total_cmp(b))
            .map(|(i, _)| LabelIndex(i))
    }

    pub fn get(&self, index: LabelIndex) -> Option<f32> {
        self.0.get(index.0).copied()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// one-hot 教師ベクトル
#[derive(Debug, Clone, PartialEq)]
pub struct OneHot(Vec<f32>);

impl OneHot {
    pub fn new(index: LabelIndex, num_classes: usize) -> Option<Self> {
        if index.0 >= num_classes {
            return None;
        }
        let mut values = vec![0.0; num_classes];
        values[index.0] = 1.0;
        Some(Self(values))
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// 学習用に蓄積されたサンプル。追加後は不変
#[derive(Debug, Clone)]
pub struct TrainingExample {
    pub(crate) seq: u64,
    image: EncodedImage,
    label: String,
}

impl TrainingExample {
    pub(crate) fn new(seq: u64, image: EncodedImage, label: String) -> Self {
        Self { seq, image, label }
    }

    pub fn image(&self) -> &EncodedImage {
        &self.image
    }

    /// ユーザーが入力したままのラベル（語彙との照合は学習時）
    pub fn label(&self) -> &str {
        &self.label
    }

    /// バッファへの追加順を表す通し番号
    pub fn seq(&self) -> u64 {
        self.seq
    }
}

/// 画面表示用の状態
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DisplayState {
    /// 直近の認識結果
    pub recognized_text: String,
    /// 学習用に入力中のラベル
    pub training_label: String,
}
