pub mod backend;
pub mod dataset;
pub mod encoder;
pub mod label_codec;
pub mod ml_model;
pub mod training;

pub use dataset::TrainingBuffer;
pub use encoder::{DecodeError, ImageEncoder, Normalization, IMAGE_SIZE};
pub use label_codec::{CodecError, LabelCodec, DEFAULT_LABELS};
pub use ml_model::{Classifier, ClassifierError, ModelConfig, SignClassifierNet, HIDDEN_UNITS, NUM_CLASSES};
pub use training::{EpochRecord, FitOptions, TrainError, Trainer, TrainingLog, DEFAULT_EPOCHS};
