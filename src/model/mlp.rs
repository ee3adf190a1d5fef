use burn::{
    nn::{Linear, LinearConfig, Relu},
    prelude::*,
    tensor::{activation::softmax, backend::AutodiffBackend},
    train::{ClassificationOutput, TrainOutput, TrainStep, ValidStep},
};

use super::classification_output;
use crate::data::MnistBatch;

/// Multi-layer perceptron over flattened images.
#[derive(Module, Debug)]
pub struct Mlp<B: Backend> {
    hidden: Vec<Linear<B>>,
    output: Linear<B>,
    activation: Relu,
}

#[derive(Config, Debug)]
pub struct MlpConfig {
    #[config(default = 784)]
    pub input_size: usize,
    #[config(default = "vec![200, 100]")]
    pub hidden_sizes: Vec<usize>,
    #[config(default = 10)]
    pub num_classes: usize,
}

impl MlpConfig {
    /// Returns the initialized model.
    pub fn init<B: Backend>(&self, device: &B::Device) -> Mlp<B> {
        let mut hidden = Vec::with_capacity(self.hidden_sizes.len());
        let mut d_input = self.input_size;

        for &d_output in &self.hidden_sizes {
            hidden.push(LinearConfig::new(d_input, d_output).init(device));
            d_input = d_output;
        }

        Mlp {
            hidden,
            output: LinearConfig::new(d_input, self.num_classes).init(device),
            activation: Relu::new(),
        }
    }
}

impl<B: Backend> Mlp<B> {
    /// # Shapes
    ///   - Images [batch_size, input_size]
    ///   - Output [batch_size, num_classes]
    pub fn forward(&self, images: Tensor<B, 2>) -> Tensor<B, 2> {
        let mut x = images;

        for linear in self.hidden.iter() {
            x = linear.forward(x);
            x = self.activation.forward(x);
        }

        self.output.forward(x)
    }

    /// Class probabilities, the softmax of [`Mlp::forward`].
    pub fn forward_probabilities(&self, images: Tensor<B, 2>) -> Tensor<B, 2> {
        softmax(self.forward(images), 1)
    }

    pub fn forward_classification(&self, batch: MnistBatch<B, 2>) -> ClassificationOutput<B> {
        let logits = self.forward(batch.images);

        classification_output(logits, batch.one_hot, batch.targets)
    }
}

impl<B: AutodiffBackend> TrainStep<MnistBatch<B, 2>, ClassificationOutput<B>> for Mlp<B> {
    fn step(&self, batch: MnistBatch<B, 2>) -> TrainOutput<ClassificationOutput<B>> {
        let item = self.forward_classification(batch);

        TrainOutput::new(self, item.loss.backward(), item)
    }
}

impl<B: Backend> ValidStep<MnistBatch<B, 2>, ClassificationOutput<B>> for Mlp<B> {
    fn step(&self, batch: MnistBatch<B, 2>) -> ClassificationOutput<B> {
        self.forward_classification(batch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    type TestBackend = NdArray;

    #[test]
    fn default_stack_is_784_200_100_10() {
        let config = MlpConfig::new();

        assert_eq!(config.input_size, 784);
        assert_eq!(config.hidden_sizes, vec![200, 100]);
        assert_eq!(config.num_classes, 10);

        let model = config.init::<TestBackend>(&Default::default());
        // weights and biases of three dense layers
        let expected = 784 * 200 + 200 + 200 * 100 + 100 + 100 * 10 + 10;
        assert_eq!(model.num_params(), expected);
    }

    #[test]
    fn forward_yields_one_logit_per_class() {
        let device = Default::default();
        let model = MlpConfig::new().init::<TestBackend>(&device);
        let images = Tensor::<TestBackend, 2>::ones([5, 784], &device);

        assert_eq!(model.forward(images.clone()).dims(), [5, 10]);

        let sums = model
            .forward_probabilities(images)
            .sum_dim(1)
            .into_data()
            .to_vec::<f32>()
            .unwrap();
        assert!(sums.iter().all(|sum| (sum - 1.0).abs() < 1e-5));
    }

    #[test]
    fn hidden_widths_are_configurable() {
        let device = Default::default();
        let model = MlpConfig::new()
            .with_hidden_sizes(vec![32])
            .init::<TestBackend>(&device);
        let images = Tensor::<TestBackend, 2>::zeros([2, 784], &device);

        assert_eq!(model.forward(images).dims(), [2, 10]);
    }
}
