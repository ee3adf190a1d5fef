use std::{fmt, sync::Arc};

use burn::{
    data::{
        dataloader::batcher::Batcher,
        dataset::{
            vision::{MnistDataset, MnistItem},
            Dataset,
        },
    },
    prelude::*,
};

use crate::preprocess::{self, Image, InputLayout, IMAGE_SIZE, NUM_CLASSES};

#[derive(Clone, Debug)]
pub struct MnistBatch<B: Backend, const D: usize> {
    pub images: Tensor<B, D>,
    pub one_hot: Tensor<B, 2>,
    pub targets: Tensor<B, 1, Int>,
}

/// Turns MNIST items into normalized tensors of rank `D`.
///
/// The rank is tied to the layout by the constructors, `flat` for rank 2 and
/// `channels` for rank 4.
#[derive(Clone, Copy, Debug)]
pub struct MnistBatcher<const D: usize> {
    layout: InputLayout,
}

impl MnistBatcher<2> {
    pub fn flat() -> Self {
        Self {
            layout: InputLayout::Flat,
        }
    }
}

impl MnistBatcher<4> {
    pub fn channels() -> Self {
        Self {
            layout: InputLayout::Channels,
        }
    }
}

impl<const D: usize> MnistBatcher<D> {
    pub fn layout(&self) -> InputLayout {
        self.layout
    }
}

impl<B: Backend, const D: usize> Batcher<B, MnistItem, MnistBatch<B, D>> for MnistBatcher<D> {
    fn batch(&self, items: Vec<MnistItem>, device: &B::Device) -> MnistBatch<B, D> {
        let (images, labels): (Vec<Image>, Vec<u8>) = items
            .into_iter()
            .map(|item| (item.image, item.label))
            .unzip();
        let batch_size = labels.len();

        let prepared = match preprocess::prepare(&images, &labels, self.layout) {
            Ok(prepared) => prepared,
            Err(err) => panic!("Invalid MNIST item: {err}"),
        };

        let images = Tensor::<B, D>::from_data(
            TensorData::new(prepared.images, prepared.image_dims).convert::<B::FloatElem>(),
            device,
        );
        let one_hot = Tensor::<B, 2>::from_data(
            TensorData::new(prepared.one_hot, [batch_size, NUM_CLASSES])
                .convert::<B::FloatElem>(),
            device,
        );
        let targets = Tensor::<B, 1, Int>::from_data(
            TensorData::new(prepared.targets, [batch_size]).convert::<B::IntElem>(),
            device,
        );

        MnistBatch {
            images,
            one_hot,
            targets,
        }
    }
}

/// The fixed train/test partition of MNIST.
pub struct MnistSplit<D = MnistDataset> {
    pub train: D,
    /// Shared because it feeds both per-epoch validation and the final evaluation.
    pub test: Arc<D>,
}

impl MnistSplit {
    /// Downloads the dataset on first use.
    pub fn load() -> crate::Result<Self> {
        Self::new(MnistDataset::train(), MnistDataset::test())
    }
}

impl<D: Dataset<MnistItem>> MnistSplit<D> {
    /// Pairs two partitions, failing when either one has images without labels.
    pub fn new(train: D, test: D) -> crate::Result<Self> {
        for partition in [&train, &test] {
            let (images, labels) = item_counts(partition);
            preprocess::check_counts(images, labels)?;
        }

        Ok(Self {
            train,
            test: Arc::new(test),
        })
    }

    pub fn summary(&self) -> SplitSummary {
        SplitSummary {
            train: self.train.len(),
            test: self.test.len(),
        }
    }
}

/// Number of images a dataset reports and number of labelled items it
/// actually yields.
pub fn item_counts<D: Dataset<MnistItem> + ?Sized>(dataset: &D) -> (usize, usize) {
    let images = dataset.len();
    let labels = (0..images)
        .filter(|&index| dataset.get(index).is_some())
        .count();

    (images, labels)
}

/// Sample counts of both partitions, printed like numpy shapes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SplitSummary {
    pub train: usize,
    pub test: usize,
}

impl fmt::Display for SplitSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "({}, {IMAGE_SIZE}, {IMAGE_SIZE}) ({}, {IMAGE_SIZE}, {IMAGE_SIZE})",
            self.train, self.test
        )
    }
}

/// Fetches one item or reports the dataset size.
pub fn sample<D: Dataset<MnistItem> + ?Sized>(
    dataset: &D,
    index: usize,
) -> crate::Result<MnistItem> {
    dataset.get(index).ok_or(crate::Error::SampleOutOfRange {
        index,
        len: dataset.len(),
    })
}
