use burn::{
    nn::{
        conv::{Conv2d, Conv2dConfig},
        pool::{AvgPool2d, AvgPool2dConfig},
        Linear, LinearConfig, Relu,
    },
    prelude::*,
    tensor::{activation::softmax, backend::AutodiffBackend},
    train::{ClassificationOutput, TrainOutput, TrainStep, ValidStep},
};

use super::classification_output;
use crate::data::MnistBatch;

/// LeNet style convolutional network.
///
/// Each convolution uses valid padding and is followed by a non-overlapping
/// average pooling, the pooled feature maps are then flattened into a stack
/// of dense layers.
#[derive(Module, Debug)]
pub struct LeNet<B: Backend> {
    convs: Vec<Conv2d<B>>,
    pool: AvgPool2d,
    dense: Vec<Linear<B>>,
    output: Linear<B>,
    activation: Relu,
}

#[derive(Config, Debug)]
pub struct LeNetConfig {
    #[config(default = 1)]
    pub channels: usize,
    #[config(default = 28)]
    pub image_size: usize,
    #[config(default = "vec![6, 16]")]
    pub filters: Vec<usize>,
    #[config(default = 3)]
    pub kernel_size: usize,
    #[config(default = 2)]
    pub pool_size: usize,
    #[config(default = "vec![120, 84]")]
    pub dense_sizes: Vec<usize>,
    #[config(default = 10)]
    pub num_classes: usize,
}

impl LeNetConfig {
    /// Side length of the feature maps left after every convolution and pooling stage.
    pub fn feature_map_size(&self) -> usize {
        self.filters.iter().fold(self.image_size, |size, _| {
            (size + 1).saturating_sub(self.kernel_size) / self.pool_size
        })
    }

    /// Width of the vector produced by flattening the last feature maps.
    pub fn flattened_size(&self) -> usize {
        let channels = self.filters.last().copied().unwrap_or(self.channels);
        let side = self.feature_map_size();

        channels * side * side
    }

    /// Returns the initialized model.
    pub fn init<B: Backend>(&self, device: &B::Device) -> LeNet<B> {
        let mut convs = Vec::with_capacity(self.filters.len());
        let mut channels_in = self.channels;

        for &channels_out in &self.filters {
            let conv = Conv2dConfig::new(
                [channels_in, channels_out],
                [self.kernel_size, self.kernel_size],
            )
            .init(device);
            convs.push(conv);
            channels_in = channels_out;
        }

        let mut dense = Vec::with_capacity(self.dense_sizes.len());
        let mut d_input = self.flattened_size();

        for &d_output in &self.dense_sizes {
            dense.push(LinearConfig::new(d_input, d_output).init(device));
            d_input = d_output;
        }

        LeNet {
            convs,
            pool: AvgPool2dConfig::new([self.pool_size, self.pool_size])
                .with_strides([self.pool_size, self.pool_size])
                .init(),
            dense,
            output: LinearConfig::new(d_input, self.num_classes).init(device),
            activation: Relu::new(),
        }
    }
}

impl<B: Backend> LeNet<B> {
    /// # Shapes
    ///   - Images [batch_size, channels, height, width]
    ///   - Output [batch_size, num_classes]
    pub fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        let mut x = images;

        for conv in self.convs.iter() {
            x = conv.forward(x);
            x = self.activation.forward(x);
            x = self.pool.forward(x);
        }

        let [batch_size, channels, height, width] = x.dims();
        let mut x = x.reshape([batch_size, channels * height * width]);

        for linear in self.dense.iter() {
            x = linear.forward(x);
            x = self.activation.forward(x);
        }

        self.output.forward(x)
    }

    /// Class probabilities, the softmax of [`LeNet::forward`].
    pub fn forward_probabilities(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        softmax(self.forward(images), 1)
    }

    pub fn forward_classification(&self, batch: MnistBatch<B, 4>) -> ClassificationOutput<B> {
        let logits = self.forward(batch.images);

        classification_output(logits, batch.one_hot, batch.targets)
    }
}

impl<B: AutodiffBackend> TrainStep<MnistBatch<B, 4>, ClassificationOutput<B>> for LeNet<B> {
    fn step(&self, batch: MnistBatch<B, 4>) -> TrainOutput<ClassificationOutput<B>> {
        let item = self.forward_classification(batch);

        TrainOutput::new(self, item.loss.backward(), item)
    }
}

impl<B: Backend> ValidStep<MnistBatch<B, 4>, ClassificationOutput<B>> for LeNet<B> {
    fn step(&self, batch: MnistBatch<B, 4>) -> ClassificationOutput<B> {
        self.forward_classification(batch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    type TestBackend = NdArray;

    #[test]
    fn default_feature_maps_flatten_to_400() {
        let config = LeNetConfig::new();

        // 28 -conv-> 26 -pool-> 13 -conv-> 11 -pool-> 5
        assert_eq!(config.feature_map_size(), 5);
        assert_eq!(config.flattened_size(), 16 * 5 * 5);
    }

    #[test]
    fn default_model_has_lenet_parameter_count() {
        let model = LeNetConfig::new().init::<TestBackend>(&Default::default());

        let convs = (6 * 3 * 3 + 6) + (16 * 6 * 3 * 3 + 16);
        let dense = (400 * 120 + 120) + (120 * 84 + 84) + (84 * 10 + 10);
        assert_eq!(model.num_params(), convs + dense);
    }

    #[test]
    fn forward_yields_probabilities_per_class() {
        let device = Default::default();
        let model = LeNetConfig::new().init::<TestBackend>(&device);
        let images = Tensor::<TestBackend, 4>::ones([3, 1, 28, 28], &device);

        assert_eq!(model.forward(images.clone()).dims(), [3, 10]);

        let sums = model
            .forward_probabilities(images)
            .sum_dim(1)
            .into_data()
            .to_vec::<f32>()
            .unwrap();
        assert!(sums.iter().all(|sum| (sum - 1.0).abs() < 1e-5));
    }

    #[test]
    fn single_stage_network_adapts_its_dense_input() {
        let device = Default::default();
        let config = LeNetConfig::new().with_filters(vec![4]);
        let model = config.init::<TestBackend>(&device);

        assert_eq!(config.flattened_size(), 4 * 13 * 13);

        let images = Tensor::<TestBackend, 4>::zeros([2, 1, 28, 28], &device);
        assert_eq!(model.forward(images).dims(), [2, 10]);
    }
}
