//! Host-side preparation of raw MNIST items.
//!
//! Images arrive as 28x28 intensities in `[0, 255]` and labels as class ids.
//! Everything here works on plain vectors so that the batcher only has to
//! hand the results to the tensor constructors.

use serde::{Deserialize, Serialize};

use crate::{
    error::{Error, Result},
    model::Architecture,
};

/// Side length of an MNIST image.
pub const IMAGE_SIZE: usize = 28;
/// Number of pixels in a flattened MNIST image.
pub const IMAGE_PIXELS: usize = IMAGE_SIZE * IMAGE_SIZE;
/// Number of digit classes.
pub const NUM_CLASSES: usize = 10;
/// Largest raw pixel intensity.
pub const PIXEL_MAX: f32 = 255.0;

/// A raw grayscale image, row major.
pub type Image = [[f32; IMAGE_SIZE]; IMAGE_SIZE];

/// Shape in which images are handed to a model.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum InputLayout {
    /// `[batch, 784]`, for fully connected networks.
    Flat,
    /// `[batch, 1, 28, 28]`, channel first, for convolutional networks.
    Channels,
}

impl InputLayout {
    pub fn for_architecture(architecture: Architecture) -> Self {
        match architecture {
            Architecture::Mlp => Self::Flat,
            Architecture::LeNet => Self::Channels,
        }
    }

    /// Tensor dimensions for a batch of `batch_size` images.
    pub fn dims(&self, batch_size: usize) -> Vec<usize> {
        match self {
            Self::Flat => vec![batch_size, IMAGE_PIXELS],
            Self::Channels => vec![batch_size, 1, IMAGE_SIZE, IMAGE_SIZE],
        }
    }

    pub fn rank(&self) -> usize {
        match self {
            Self::Flat => 2,
            Self::Channels => 4,
        }
    }
}

/// Normalized pixels and encoded labels of a batch, ready for tensor creation.
#[derive(Clone, Debug, PartialEq)]
pub struct PreparedBatch {
    /// Pixels in `[0, 1]`, row major over `image_dims`.
    pub images: Vec<f32>,
    pub image_dims: Vec<usize>,
    /// One-hot rows, `[batch, NUM_CLASSES]` row major.
    pub one_hot: Vec<f32>,
    pub targets: Vec<i64>,
}

impl PreparedBatch {
    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }
}

/// Rescales raw intensities from `[0, 255]` to `[0, 1]`.
pub fn normalize<I>(pixels: I) -> Result<Vec<f32>>
where
    I: IntoIterator<Item = f32>,
{
    pixels
        .into_iter()
        .map(|value| {
            if (0.0..=PIXEL_MAX).contains(&value) {
                Ok(value / PIXEL_MAX)
            } else {
                Err(Error::PixelOutOfRange { value })
            }
        })
        .collect()
}

/// Encodes `label` as a vector of `num_classes` zeros with a single one.
pub fn one_hot(label: usize, num_classes: usize) -> Result<Vec<f32>> {
    if label >= num_classes {
        return Err(Error::LabelOutOfRange { label, num_classes });
    }

    let mut encoded = vec![0.0; num_classes];
    encoded[label] = 1.0;
    Ok(encoded)
}

/// One-hot encodes every label into a `[labels.len(), num_classes]` matrix.
pub fn one_hot_matrix(labels: &[u8], num_classes: usize) -> Result<Vec<f32>> {
    let mut matrix = Vec::with_capacity(labels.len() * num_classes);
    for &label in labels {
        matrix.extend(one_hot(label as usize, num_classes)?);
    }
    Ok(matrix)
}

/// Fails unless every image has exactly one label.
pub fn check_counts(images: usize, labels: usize) -> Result<()> {
    if images != labels {
        return Err(Error::CountMismatch { images, labels });
    }
    Ok(())
}

/// Normalizes `images`, lays them out for `layout` and encodes `labels`.
pub fn prepare(images: &[Image], labels: &[u8], layout: InputLayout) -> Result<PreparedBatch> {
    check_counts(images.len(), labels.len())?;

    let pixels = images
        .iter()
        .flat_map(|image| image.iter().flatten().copied());

    // A single channel means both layouts share the same row-major buffer.
    Ok(PreparedBatch {
        images: normalize(pixels)?,
        image_dims: layout.dims(images.len()),
        one_hot: one_hot_matrix(labels, NUM_CLASSES)?,
        targets: labels.iter().map(|&label| label as i64).collect(),
    })
}
