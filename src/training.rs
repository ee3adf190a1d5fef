use std::{
    fmt::Display,
    fs, io,
    path::Path,
    time::Instant,
};

use burn::{
    data::{
        dataloader::{batcher::Batcher, DataLoaderBuilder},
        dataset::{vision::MnistItem, Dataset},
    },
    module::AutodiffModule,
    optim::RmsPropConfig,
    prelude::*,
    record::CompactRecorder,
    tensor::{backend::AutodiffBackend, ElementConversion},
    train::{
        metric::{AccuracyMetric, LossMetric},
        renderer::{MetricState, MetricsRenderer, TrainingProgress},
        ClassificationOutput, LearnerBuilder, TrainStep, ValidStep,
    },
};

// `Result` stays unimported: the `Config` derive expands to code naming the
// two-parameter `Result`.
use crate::{
    data::{self, MnistBatch, MnistBatcher, MnistSplit},
    error::Error,
    model::{Architecture, LeNetConfig, MlpConfig},
};

#[derive(Config)]
pub struct TrainingConfig {
    pub architecture: Architecture,
    #[config(default = "RmsPropConfig::new().with_alpha(0.9).with_epsilon(1e-7)")]
    pub optimizer: RmsPropConfig,
    #[config(default = "MlpConfig::new()")]
    pub mlp: MlpConfig,
    #[config(default = "LeNetConfig::new()")]
    pub lenet: LeNetConfig,
    #[config(default = 5)]
    pub num_epochs: usize,
    #[config(default = 128)]
    pub batch_size: usize,
    #[config(default = 4)]
    pub num_workers: usize,
    #[config(default = 42)]
    pub seed: u64,
    #[config(default = 1.0e-3)]
    pub learning_rate: f64,
}

/// How the learner reports progress while fitting.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Progress {
    /// The interactive terminal dashboard.
    #[default]
    Dashboard,
    /// Plain records in the experiment log, for non-interactive runs.
    Log,
}

struct LogRenderer;

impl MetricsRenderer for LogRenderer {
    fn update_train(&mut self, _state: MetricState) {}

    fn update_valid(&mut self, _state: MetricState) {}

    fn render_train(&mut self, item: TrainingProgress) {
        log::debug!(
            "train epoch {}/{} iteration {}",
            item.epoch,
            item.epoch_total,
            item.iteration
        );
    }

    fn render_valid(&mut self, item: TrainingProgress) {
        log::debug!(
            "valid epoch {}/{} iteration {}",
            item.epoch,
            item.epoch_total,
            item.iteration
        );
    }
}

/// Loss and accuracy of a model over a whole dataset.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Evaluation {
    pub loss: f64,
    pub accuracy: f64,
    pub samples: usize,
}

/// Running totals weighted by batch size, so a short last batch counts for
/// exactly its own samples.
#[derive(Clone, Copy, Debug, Default)]
pub struct Score {
    loss_sum: f64,
    correct: usize,
    samples: usize,
}

impl Score {
    /// Adds one batch whose mean loss is `batch_loss`.
    pub fn record(&mut self, batch_loss: f64, correct: usize, samples: usize) {
        self.loss_sum += batch_loss * samples as f64;
        self.correct += correct;
        self.samples += samples;
    }

    pub fn finish(self) -> crate::Result<Evaluation> {
        if self.samples == 0 {
            return Err(Error::EmptyDataset);
        }

        let samples = self.samples as f64;
        Ok(Evaluation {
            loss: self.loss_sum / samples,
            accuracy: self.correct as f64 / samples,
            samples: self.samples,
        })
    }
}

/// Everything a training run writes into its artifact directory.
const ARTIFACTS: [&str; 6] = [
    "config.json",
    "model.mpk",
    "experiment.log",
    "checkpoint",
    "train",
    "valid",
];

/// Creates `artifact_dir` and clears the artifacts of a previous run, leaving
/// any other file in place.
fn create_artifact_dir(artifact_dir: &str) -> crate::Result<()> {
    let dir = Path::new(artifact_dir);
    fs::create_dir_all(dir)?;

    for name in ARTIFACTS {
        let path = dir.join(name);
        let removed = if path.is_dir() {
            fs::remove_dir_all(&path)
        } else {
            fs::remove_file(&path)
        };

        match removed {
            Err(err) if err.kind() != io::ErrorKind::NotFound => return Err(err.into()),
            _ => {}
        }
    }

    Ok(())
}

/// Trains the configured network on MNIST and reports its test loss and accuracy.
///
/// The configuration and the trained model are written to `artifact_dir`.
pub fn train<B: AutodiffBackend>(
    artifact_dir: &str,
    config: TrainingConfig,
    progress: Progress,
    device: B::Device,
) -> crate::Result<Evaluation> {
    let split = MnistSplit::load()?;

    train_split::<B, _>(artifact_dir, config, split, progress, device)
}

/// Same as [`train`], on an already loaded train/test split.
pub fn train_split<B, S>(
    artifact_dir: &str,
    config: TrainingConfig,
    split: MnistSplit<S>,
    progress: Progress,
    device: B::Device,
) -> crate::Result<Evaluation>
where
    B: AutodiffBackend,
    S: Dataset<MnistItem> + 'static,
{
    create_artifact_dir(artifact_dir)?;
    config.save(format!("{artifact_dir}/config.json"))?;

    B::seed(config.seed);

    let summary = split.summary();
    println!("{summary}");
    println!("{} train samples", summary.train);
    println!("{} test samples", summary.test);

    log::info!(
        "Training {} for {} epochs with batch size {}",
        config.architecture.name(),
        config.num_epochs,
        config.batch_size
    );

    let evaluation = match config.architecture {
        Architecture::Mlp => {
            let model = config.mlp.init::<B>(&device);
            let batcher = MnistBatcher::flat();
            fit(artifact_dir, &config, model, batcher, split, progress, &device)?
        }
        Architecture::LeNet => {
            let model = config.lenet.init::<B>(&device);
            let batcher = MnistBatcher::channels();
            fit(artifact_dir, &config, model, batcher, split, progress, &device)?
        }
    };

    println!("Test loss: {}", evaluation.loss);
    println!("Test accuracy: {}", evaluation.accuracy);

    Ok(evaluation)
}

fn fit<B, M, S, const D: usize>(
    artifact_dir: &str,
    config: &TrainingConfig,
    model: M,
    batcher: MnistBatcher<D>,
    split: MnistSplit<S>,
    progress: Progress,
    device: &B::Device,
) -> crate::Result<Evaluation>
where
    B: AutodiffBackend,
    M: AutodiffModule<B> + TrainStep<MnistBatch<B, D>, ClassificationOutput<B>> + Display + 'static,
    M::InnerModule:
        ValidStep<MnistBatch<B::InnerBackend, D>, ClassificationOutput<B::InnerBackend>>,
    S: Dataset<MnistItem> + 'static,
{
    let dataloader_train = DataLoaderBuilder::new(batcher)
        .batch_size(config.batch_size)
        .shuffle(config.seed)
        .num_workers(config.num_workers)
        .build(split.train);

    // The test partition doubles as the validation set, as in the lessons.
    let dataloader_test = DataLoaderBuilder::new(batcher)
        .batch_size(config.batch_size)
        .num_workers(config.num_workers)
        .build(split.test.clone());

    let mut builder = LearnerBuilder::new(artifact_dir)
        .metric_train_numeric(AccuracyMetric::new())
        .metric_valid_numeric(AccuracyMetric::new())
        .metric_train_numeric(LossMetric::new())
        .metric_valid_numeric(LossMetric::new())
        .devices(vec![device.clone()])
        .num_epochs(config.num_epochs)
        .summary();

    if progress == Progress::Log {
        builder = builder.renderer(LogRenderer);
    }

    let learner = builder.build(model, config.optimizer.init(), config.learning_rate);

    let now = Instant::now();
    let model_trained = learner.fit(dataloader_train, dataloader_test);
    let elapsed = now.elapsed().as_secs();
    log::info!("Training completed in {}m{}s", elapsed / 60, elapsed % 60);

    let model_valid = model_trained.valid();
    model_trained.save_file(format!("{artifact_dir}/model"), &CompactRecorder::new())?;

    evaluate::<B::InnerBackend, _, _, D>(
        &model_valid,
        split.test.as_ref(),
        batcher,
        config.batch_size,
        device,
    )
}

/// Runs `model` over every item of `dataset`, in order, `batch_size` items at a time.
pub fn evaluate<B, M, S, const D: usize>(
    model: &M,
    dataset: &S,
    batcher: MnistBatcher<D>,
    batch_size: usize,
    device: &B::Device,
) -> crate::Result<Evaluation>
where
    B: Backend,
    M: ValidStep<MnistBatch<B, D>, ClassificationOutput<B>>,
    S: Dataset<MnistItem> + ?Sized,
{
    let batch_size = batch_size.max(1);
    let len = dataset.len();
    let mut score = Score::default();

    for start in (0..len).step_by(batch_size) {
        let items = (start..len.min(start + batch_size))
            .map(|index| data::sample(dataset, index))
            .collect::<crate::Result<Vec<_>>>()?;
        let samples = items.len();

        let batch: MnistBatch<B, D> = batcher.batch(items, device);
        let output = ValidStep::step(model, batch);

        let loss = output.loss.into_scalar().elem::<f64>();
        let correct = output
            .output
            .argmax(1)
            .squeeze::<1>(1)
            .equal(output.targets)
            .int()
            .sum()
            .into_scalar()
            .elem::<i64>();

        score.record(loss, correct as usize, samples);
    }

    let evaluation = score.finish()?;
    log::info!(
        "Evaluated {} samples: loss {:.4}, accuracy {:.4}",
        evaluation.samples,
        evaluation.loss,
        evaluation.accuracy
    );

    Ok(evaluation)
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::{
        backend::{Autodiff, NdArray},
        data::dataset::InMemDataset,
    };
    use std::path::PathBuf;

    use crate::preprocess::IMAGE_SIZE;

    type TestBackend = NdArray;

    fn item(label: u8) -> MnistItem {
        MnistItem {
            image: [[label as f32 * 20.0; IMAGE_SIZE]; IMAGE_SIZE],
            label,
        }
    }

    #[test]
    fn defaults_match_the_lessons() {
        let config = TrainingConfig::new(Architecture::Mlp);

        assert_eq!(config.batch_size, 128);
        assert_eq!(config.num_epochs, 5);
        assert_eq!(config.learning_rate, 1.0e-3);
        assert_eq!(config.lenet.filters, vec![6, 16]);
        assert_eq!(config.mlp.hidden_sizes, vec![200, 100]);
    }

    #[test]
    fn config_survives_a_json_round_trip() {
        let dir = std::env::temp_dir().join(format!("mnist-lessons-config-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("config.json");

        let config = TrainingConfig::new(Architecture::LeNet)
            .with_num_epochs(2)
            .with_batch_size(32);
        config.save(&path).unwrap();

        let loaded = TrainingConfig::load(&path).unwrap();
        assert_eq!(loaded.architecture, Architecture::LeNet);
        assert_eq!(loaded.num_epochs, 2);
        assert_eq!(loaded.batch_size, 32);

        std::fs::remove_dir_all(dir).ok();
    }

    #[test]
    fn score_weights_batches_by_size() {
        let mut score = Score::default();
        score.record(1.0, 3, 4);
        score.record(4.0, 0, 1);

        let evaluation = score.finish().unwrap();

        assert_eq!(evaluation.samples, 5);
        assert!((evaluation.loss - 8.0 / 5.0).abs() < 1e-12);
        assert!((evaluation.accuracy - 0.6).abs() < 1e-12);
    }

    #[test]
    fn empty_score_is_an_error() {
        assert!(matches!(Score::default().finish(), Err(Error::EmptyDataset)));
    }

    #[test]
    fn evaluate_visits_every_sample() {
        let device = Default::default();
        let model = MlpConfig::new()
            .with_hidden_sizes(vec![16])
            .init::<TestBackend>(&device);
        let dataset = InMemDataset::new((0..10).map(|i| item(i % 10)).collect());

        let evaluation = evaluate(&model, &dataset, MnistBatcher::flat(), 4, &device).unwrap();

        assert_eq!(evaluation.samples, 10);
        assert!(evaluation.loss.is_finite() && evaluation.loss > 0.0);
        assert!((0.0..=1.0).contains(&evaluation.accuracy));
    }

    #[test]
    fn evaluate_runs_the_convolutional_model() {
        let device = Default::default();
        let model = LeNetConfig::new().init::<TestBackend>(&device);
        let dataset = InMemDataset::new(vec![item(1), item(2), item(3)]);

        let evaluation = evaluate(&model, &dataset, MnistBatcher::channels(), 2, &device).unwrap();

        assert_eq!(evaluation.samples, 3);
    }

    #[test]
    fn evaluate_rejects_an_empty_dataset() {
        let device = Default::default();
        let model = MlpConfig::new().init::<TestBackend>(&device);
        let dataset = InMemDataset::<MnistItem>::new(Vec::new());

        assert!(matches!(
            evaluate(&model, &dataset, MnistBatcher::flat(), 8, &device),
            Err(Error::EmptyDataset)
        ));
    }

    fn scratch_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("mnist-lessons-{name}-{}", std::process::id()));
        std::fs::remove_dir_all(&dir).ok();
        dir
    }

    /// Reports one item more than it holds.
    struct ShortDataset(Vec<MnistItem>);

    impl Dataset<MnistItem> for ShortDataset {
        fn get(&self, index: usize) -> Option<MnistItem> {
            self.0.get(index).cloned()
        }

        fn len(&self) -> usize {
            self.0.len() + 1
        }
    }

    #[test]
    fn evaluate_reports_items_the_dataset_cannot_produce() {
        let device = Default::default();
        let model = MlpConfig::new()
            .with_hidden_sizes(vec![8])
            .init::<TestBackend>(&device);
        let dataset = ShortDataset(vec![item(1), item(2)]);

        assert!(matches!(
            evaluate(&model, &dataset, MnistBatcher::flat(), 8, &device),
            Err(Error::SampleOutOfRange { index: 2, len: 3 })
        ));
    }

    #[test]
    fn artifact_dir_keeps_unrelated_files() {
        let dir = scratch_dir("artifacts");
        std::fs::create_dir_all(dir.join("train/epoch-1")).unwrap();
        std::fs::write(dir.join("notes.txt"), "keep me").unwrap();
        std::fs::write(dir.join("config.json"), "{}").unwrap();
        std::fs::write(dir.join("model.mpk"), [0u8; 4]).unwrap();

        create_artifact_dir(dir.to_str().unwrap()).unwrap();

        assert_eq!(std::fs::read_to_string(dir.join("notes.txt")).unwrap(), "keep me");
        assert!(!dir.join("config.json").exists());
        assert!(!dir.join("model.mpk").exists());
        assert!(!dir.join("train").exists());

        std::fs::remove_dir_all(dir).ok();
    }

    #[test]
    fn artifact_dir_is_created_when_missing() {
        let dir = scratch_dir("fresh").join("nested");

        create_artifact_dir(dir.to_str().unwrap()).unwrap();

        assert!(dir.is_dir());
        std::fs::remove_dir_all(dir.parent().unwrap()).ok();
    }

    fn small_split() -> MnistSplit<InMemDataset<MnistItem>> {
        let train = InMemDataset::new((0..12).map(|i| item(i % 10)).collect());
        let test = InMemDataset::new((0..5).map(item).collect());

        MnistSplit::new(train, test).unwrap()
    }

    // Both architectures share one test so a single learner runs at a time.
    #[test]
    fn one_epoch_trains_saves_and_evaluates_both_networks() {
        for architecture in [Architecture::Mlp, Architecture::LeNet] {
            let dir = scratch_dir(architecture.name());
            let artifact_dir = dir.to_str().unwrap();
            let config = TrainingConfig::new(architecture)
                .with_mlp(MlpConfig::new().with_hidden_sizes(vec![16]))
                .with_num_epochs(1)
                .with_batch_size(4)
                .with_num_workers(1);

            let evaluation = train_split::<Autodiff<TestBackend>, _>(
                artifact_dir,
                config,
                small_split(),
                Progress::Log,
                Default::default(),
            )
            .unwrap();

            assert_eq!(evaluation.samples, 5);
            assert!(evaluation.loss.is_finite());
            assert!(dir.join("model.mpk").is_file());

            let saved = TrainingConfig::load(dir.join("config.json")).unwrap();
            assert_eq!(saved.architecture, architecture);
            assert_eq!(saved.num_epochs, 1);

            std::fs::remove_dir_all(dir).ok();
        }
    }
}
