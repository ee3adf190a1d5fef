//! Two small MNIST classifiers, a multi-layer perceptron and a LeNet style
//! convolutional network, trained with burn.
//!
//! The pipeline is the same for both: load the fixed train/test split,
//! normalize pixels to `[0, 1]` and one-hot encode the labels while batching,
//! assemble the network, fit it with RMSprop and categorical cross-entropy,
//! then report the test loss and accuracy.

#![recursion_limit = "256"]

pub mod cli;
pub mod data;
pub mod inference;
pub mod model;
pub mod preprocess;
pub mod show;
pub mod training;

mod error;

pub use error::{Error, Result};
