//! ラベルとクラスインデックスの相互変換

use thiserror::Error;

use crate::types::{Label, LabelIndex, OneHot};

/// 既定の語彙（10クラス）
pub const DEFAULT_LABELS: [&str; 10] = ["A", "B", "C", "D", "E", "F", "G", "H", "I", "J"];

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    #[error("label '{0}' is not in the vocabulary")]
    UnknownLabel(String),
    #[error("class index {index} is out of range (vocabulary size {len})")]
    IndexOutOfRange { index: usize, len: usize },
    #[error("vocabulary must not be empty")]
    EmptyVocabulary,
    #[error("vocabulary contains a blank label")]
    BlankLabel,
    #[error("vocabulary contains '{0}' more than once")]
    DuplicateLabel(String),
}

/// 固定語彙の双方向マッピング
///
/// `encode` は大文字小文字を区別しません。語彙外のラベルや範囲外の
/// インデックスは必ずエラーになります。
#[derive(Debug, Clone)]
pub struct LabelCodec {
    labels: Vec<Label>,
}

impl LabelCodec {
    pub fn new<I, S>(labels: I) -> Result<Self, CodecError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut seen: Vec<String> = Vec::new();
        let mut out = Vec::new();
        for name in labels {
            let name: String = name.into();
            let trimmed = name.trim();
            if trimmed.is_empty() {
                return Err(CodecError::BlankLabel);
            }
            let folded = trimmed.to_lowercase();
            if seen.contains(&folded) {
                return Err(CodecError::DuplicateLabel(trimmed.to_string()));
            }
            seen.push(folded);
            out.push(Label::new(trimmed));
        }
        if out.is_empty() {
            return Err(CodecError::EmptyVocabulary);
        }
        Ok(Self { labels: out })
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn labels(&self) -> &[Label] {
        &self.labels
    }

    pub fn encode(&self, label: &str) -> Result<LabelIndex, CodecError> {
        let folded = label.trim().to_lowercase();
        self.labels
            .iter()
            .position(|l| l.as_str().to_lowercase() == folded)
            .map(LabelIndex)
            .ok_or_else(|| CodecError::UnknownLabel(label.to_string()))
    }

    pub fn decode(&self, index: LabelIndex) -> Result<&Label, CodecError> {
        self.labels.get(index.0).ok_or(CodecError::IndexOutOfRange {
            index: index.0,
            len: self.labels.len(),
        })
    }

    /// ラベルを one-hot ベクトルに変換
    pub fn one_hot(&self, label: &str) -> Result<OneHot, CodecError> {
        let index = self.encode(label)?;
        OneHot::new(index, self.len()).ok_or(CodecError::IndexOutOfRange {
            index: index.0,
            len: self.len(),
        })
    }
}

impl Default for LabelCodec {
    fn default() -> Self {
        Self {
            labels: DEFAULT_LABELS.iter().map(|l| Label::new(*l)).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip_every_label() {
        let codec = LabelCodec::default();
        for label in codec.labels() {
            let index = codec.encode(label.as_str()).unwrap();
            assert_eq!(codec.decode(index).unwrap(), label);
        }
    }

    #[test]
    fn test_encode_is_case_insensitive() {
        let codec = LabelCodec::default();
        assert_eq!(codec.encode("c").unwrap(), LabelIndex(2));
        assert_eq!(codec.encode(" J ").unwrap(), LabelIndex(9));
    }

    #[test]
    fn test_unknown_label_fails() {
        let codec = LabelCodec::default();
        assert_eq!(
            codec.encode("Z"),
            Err(CodecError::UnknownLabel("Z".to_string()))
        );
        assert!(codec.encode("").is_err());
    }

    #[test]
    fn test_decode_out_of_range_fails() {
        let codec = LabelCodec::default();
        assert_eq!(
            codec.decode(LabelIndex(10)),
            Err(CodecError::IndexOutOfRange { index: 10, len: 10 })
        );
    }

    #[test]
    fn test_invalid_vocabularies() {
        assert_eq!(
            LabelCodec::new(Vec::<String>::new()).unwrap_err(),
            CodecError::EmptyVocabulary
        );
        assert_eq!(LabelCodec::new(["A", " "]).unwrap_err(), CodecError::BlankLabel);
        assert_eq!(
            LabelCodec::new(["A", "b", "a"]).unwrap_err(),
            CodecError::DuplicateLabel("a".to_string())
        );
    }

    #[test]
    fn test_one_hot_from_label() {
        let codec = LabelCodec::new(["yes", "no", "maybe"]).unwrap();
        assert_eq!(codec.one_hot("NO").unwrap().as_slice(), &[0.0, 1.0, 0.0]);
        assert!(codec.one_hot("never").is_err());
    }
}
