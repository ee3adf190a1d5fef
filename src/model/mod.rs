mod lenet;
mod mlp;

pub use lenet::*;
pub use mlp::*;

use burn::{
    prelude::*,
    tensor::activation::log_softmax,
    train::ClassificationOutput,
};
use serde::{Deserialize, Serialize};

/// The two networks taught in the lessons.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
pub enum Architecture {
    /// Fully connected 784-200-100-10 network.
    Mlp,
    /// Two convolution and average pooling stages followed by three dense layers.
    #[value(name = "lenet")]
    LeNet,
}

impl Architecture {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Mlp => "mlp",
            Self::LeNet => "lenet",
        }
    }
}

/// Categorical cross-entropy between raw logits and one-hot targets,
/// averaged over the batch.
pub fn categorical_cross_entropy<B: Backend>(
    logits: Tensor<B, 2>,
    one_hot: Tensor<B, 2>,
) -> Tensor<B, 1> {
    (log_softmax(logits, 1) * one_hot)
        .sum_dim(1)
        .mean()
        .neg()
}

pub(crate) fn classification_output<B: Backend>(
    logits: Tensor<B, 2>,
    one_hot: Tensor<B, 2>,
    targets: Tensor<B, 1, Int>,
) -> ClassificationOutput<B> {
    let loss = categorical_cross_entropy(logits.clone(), one_hot);

    ClassificationOutput::new(loss, logits, targets)
}
