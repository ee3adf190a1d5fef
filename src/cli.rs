use burn::{
    backend::Autodiff,
    data::dataset::{vision::MnistDataset, Dataset},
    tensor::backend::Backend,
};
use clap::{builder::RangedU64ValueParser, Args, Parser, Subcommand};

use crate::{
    data::{self, MnistSplit},
    error::Result,
    inference,
    model::Architecture,
    show,
    training::{self, Progress, TrainingConfig},
};

/// MNIST digit classification with a multi-layer perceptron or a LeNet style network.
#[derive(Parser, Debug)]
#[command(version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Train a network and report its test loss and accuracy.
    Train(TrainArgs),
    /// Classify one test image with a trained network.
    Infer(InferArgs),
    /// Print the dataset shapes and draw one test image.
    Show(ShowArgs),
}

#[derive(Args, Debug)]
pub struct TrainArgs {
    #[arg(short, long, value_enum, default_value_t = Architecture::Mlp)]
    pub arch: Architecture,
    /// Defaults to `mnist-lessons/<arch>` in the temporary directory.
    #[arg(long)]
    pub artifact_dir: Option<String>,
    #[arg(short, long, default_value_t = 5, value_parser = at_least_one())]
    pub num_epochs: usize,
    #[arg(short, long, default_value_t = 128, value_parser = at_least_one())]
    pub batch_size: usize,
    #[arg(short, long, default_value_t = 1.0e-3)]
    pub learning_rate: f64,
    #[arg(long, default_value_t = 4)]
    pub num_workers: usize,
    #[arg(long, default_value_t = 42)]
    pub seed: u64,
    /// Log progress instead of drawing the terminal dashboard.
    #[arg(long)]
    pub plain: bool,
}

#[derive(Args, Debug)]
pub struct InferArgs {
    #[arg(short, long, value_enum, default_value_t = Architecture::Mlp)]
    pub arch: Architecture,
    #[arg(long)]
    pub artifact_dir: Option<String>,
    /// Index of the image in the test partition.
    #[arg(short, long, default_value_t = 0)]
    pub index: usize,
    /// Also write the image as a PNG to this path.
    #[arg(long)]
    pub image: Option<String>,
}

#[derive(Args, Debug)]
pub struct ShowArgs {
    #[arg(short, long, default_value_t = 0)]
    pub index: usize,
    #[arg(long)]
    pub image: Option<String>,
}

const IMAGE_SCALE: u32 = 8;

fn at_least_one() -> RangedU64ValueParser<usize> {
    RangedU64ValueParser::new().range(1..)
}

pub fn default_artifact_dir(arch: Architecture) -> String {
    std::env::temp_dir()
        .join("mnist-lessons")
        .join(arch.name())
        .to_string_lossy()
        .into_owned()
}

impl TrainArgs {
    pub fn config(&self) -> TrainingConfig {
        TrainingConfig::new(self.arch)
            .with_num_epochs(self.num_epochs)
            .with_batch_size(self.batch_size)
            .with_learning_rate(self.learning_rate)
            .with_num_workers(self.num_workers)
            .with_seed(self.seed)
    }

    pub fn progress(&self) -> Progress {
        if self.plain {
            Progress::Log
        } else {
            Progress::Dashboard
        }
    }
}

impl Cli {
    pub fn run<B: Backend>(self, device: B::Device) -> Result<()> {
        match self.command {
            Commands::Train(args) => {
                let artifact_dir = args
                    .artifact_dir
                    .clone()
                    .unwrap_or_else(|| default_artifact_dir(args.arch));
                training::train::<Autodiff<B>>(
                    &artifact_dir,
                    args.config(),
                    args.progress(),
                    device,
                )?;
            }
            Commands::Infer(args) => {
                let artifact_dir = args
                    .artifact_dir
                    .unwrap_or_else(|| default_artifact_dir(args.arch));
                let item = data::sample(&MnistDataset::test(), args.index)?;

                println!("{}", show::ascii_digit(&item.image));
                if let Some(path) = &args.image {
                    show::save_as_img(&item.image, IMAGE_SCALE, path)?;
                }

                let prediction = inference::infer::<B>(&artifact_dir, device, item)?;
                println!("{}", show::format_probabilities(&prediction.probabilities));
                println!(
                    "Predicted {} ({:.3}) Expected {}",
                    prediction.predicted,
                    prediction.confidence(),
                    prediction.label
                );
            }
            Commands::Show(args) => {
                let split = MnistSplit::load()?;
                let summary = split.summary();
                println!("{summary}");

                let item = data::sample(split.test.as_ref(), args.index)?;
                println!("Test image {} of {}, label {}", args.index, split.test.len(), item.label);
                println!("{}", show::ascii_digit(&item.image));

                if let Some(path) = &args.image {
                    show::save_as_img(&item.image, IMAGE_SCALE, path)?;
                    println!("Saved image {} to {path}", args.index);
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn train_flags_override_the_defaults() {
        let cli = Cli::parse_from([
            "mnist-lessons",
            "train",
            "--arch",
            "lenet",
            "--num-epochs",
            "2",
            "--batch-size",
            "64",
        ]);

        let Commands::Train(args) = cli.command else {
            panic!("expected the train command");
        };
        let config = args.config();

        assert_eq!(config.architecture, Architecture::LeNet);
        assert_eq!(config.num_epochs, 2);
        assert_eq!(config.batch_size, 64);
        assert_eq!(config.learning_rate, 1.0e-3);
        assert_eq!(config.seed, 42);
    }

    #[test]
    fn infer_defaults_to_the_first_test_image() {
        let cli = Cli::parse_from(["mnist-lessons", "infer"]);

        let Commands::Infer(args) = cli.command else {
            panic!("expected the infer command");
        };
        assert_eq!(args.arch, Architecture::Mlp);
        assert_eq!(args.index, 0);
        assert!(args.artifact_dir.is_none());
    }

    #[test]
    fn artifact_dir_is_named_after_the_architecture() {
        assert!(default_artifact_dir(Architecture::LeNet).ends_with("lenet"));
    }

    #[test]
    fn zero_sized_runs_are_rejected() {
        for flag in ["--num-epochs", "--batch-size"] {
            let parsed = Cli::try_parse_from(["mnist-lessons", "train", flag, "0"]);

            assert!(parsed.is_err(), "{flag} 0 was accepted");
        }
    }

    #[test]
    fn plain_switches_to_logged_progress() {
        let cli = Cli::parse_from(["mnist-lessons", "train", "--plain"]);

        let Commands::Train(args) = cli.command else {
            panic!("expected the train command");
        };
        assert_eq!(args.progress(), Progress::Log);
    }
}
