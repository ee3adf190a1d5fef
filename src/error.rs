use burn::{config::ConfigError, record::RecorderError, tensor::DataError};

/// Errors raised while preparing data, training or running a saved model.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("found {images} images but {labels} labels")]
    CountMismatch { images: usize, labels: usize },

    #[error("label {label} is outside of the {num_classes} known classes")]
    LabelOutOfRange { label: usize, num_classes: usize },

    #[error("pixel value {value} is outside of [0, 255]")]
    PixelOutOfRange { value: f32 },

    #[error("cannot evaluate a model on an empty dataset")]
    EmptyDataset,

    #[error("sample {index} does not exist, the dataset holds {len} items")]
    SampleOutOfRange { index: usize, len: usize },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("invalid configuration: {0:?}")]
    Config(ConfigError),

    #[error("model record error: {0:?}")]
    Record(RecorderError),

    #[error("unable to read tensor data: {0:?}")]
    TensorData(DataError),

    #[error(transparent)]
    Image(#[from] image::ImageError),
}

impl From<ConfigError> for Error {
    fn from(err: ConfigError) -> Self {
        Self::Config(err)
    }
}

impl From<RecorderError> for Error {
    fn from(err: RecorderError) -> Self {
        Self::Record(err)
    }
}

impl From<DataError> for Error {
    fn from(err: DataError) -> Self {
        Self::TensorData(err)
    }
}

pub type Result<T> = core::result::Result<T, Error>;
