use burn::{
    data::{dataloader::batcher::Batcher, dataset::vision::MnistItem},
    prelude::*,
    record::CompactRecorder,
};

use crate::{
    data::{MnistBatch, MnistBatcher},
    error::Result,
    model::Architecture,
    training::TrainingConfig,
};

/// Outcome of running a trained model on one image.
#[derive(Clone, Debug, PartialEq)]
pub struct Prediction {
    pub label: usize,
    pub predicted: usize,
    pub probabilities: Vec<f32>,
}

impl Prediction {
    /// Builds a prediction from the class probabilities, picking the most likely class.
    pub fn from_probabilities(label: usize, probabilities: Vec<f32>) -> Self {
        let predicted = probabilities
            .iter()
            .enumerate()
            .fold((0, f32::NEG_INFINITY), |best, (class, &p)| {
                if p > best.1 {
                    (class, p)
                } else {
                    best
                }
            })
            .0;

        Self {
            label,
            predicted,
            probabilities,
        }
    }

    pub fn is_correct(&self) -> bool {
        self.label == self.predicted
    }

    /// Probability assigned to the predicted class.
    pub fn confidence(&self) -> f32 {
        self.probabilities
            .get(self.predicted)
            .copied()
            .unwrap_or_default()
    }
}

/// Loads the model trained into `artifact_dir` and classifies `item`.
pub fn infer<B: Backend>(artifact_dir: &str, device: B::Device, item: MnistItem) -> Result<Prediction> {
    let config = TrainingConfig::load(format!("{artifact_dir}/config.json"))?;
    let recorder = CompactRecorder::new();
    let model_path = format!("{artifact_dir}/model");
    let label = item.label as usize;

    let probabilities = match config.architecture {
        Architecture::Mlp => {
            let model = config
                .mlp
                .init::<B>(&device)
                .load_file(model_path, &recorder, &device)?;
            let batch: MnistBatch<B, 2> = MnistBatcher::flat().batch(vec![item], &device);
            model.forward_probabilities(batch.images)
        }
        Architecture::LeNet => {
            let model = config
                .lenet
                .init::<B>(&device)
                .load_file(model_path, &recorder, &device)?;
            let batch: MnistBatch<B, 4> = MnistBatcher::channels().batch(vec![item], &device);
            model.forward_probabilities(batch.images)
        }
    };

    let probabilities = probabilities
        .into_data()
        .convert::<f32>()
        .to_vec::<f32>()?;
    Ok(Prediction::from_probabilities(label, probabilities))
}
