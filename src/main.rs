use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::info;

use ferrite_finetune::checkpoint::{CheckpointTag, DirCheckpointStore};
use ferrite_finetune::config::RunConfig;
use ferrite_finetune::data::{AugmentationPolicy, BatchSource, ImageFolder};
use ferrite_finetune::logging::init_logging;
use ferrite_finetune::metrics::evaluate;
use ferrite_finetune::model::{ModelManifest, StagedClassifier};
use ferrite_finetune::serve::{serve, Predictor};
use ferrite_finetune::train::{LogObserver, Orchestrator};

/// ferrite-finetune: fine-tune a staged backbone into an image classifier.
#[derive(Parser)]
#[command(name = "ferrite-finetune", version, about)]
struct Cli {
    /// Log at debug level (overridden by RUST_LOG).
    #[arg(short, long, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Fine-tune a model on an image folder.
    Train {
        /// Path to the run config TOML file.
        #[arg(long, default_value = "configs/balanced.toml")]
        config: PathBuf,
        /// Override the output directory.
        #[arg(long)]
        output: Option<PathBuf>,
        /// Override the epoch budget.
        #[arg(long)]
        epochs: Option<usize>,
    },
    /// Score a saved checkpoint on a labeled image folder.
    Evaluate {
        /// Directory holding model.json and the checkpoints.
        #[arg(long)]
        model_dir: PathBuf,
        /// Folder with one subdirectory per class.
        #[arg(long)]
        data: PathBuf,
        #[arg(long, default_value = "best")]
        checkpoint: CheckpointTag,
    },
    /// Serve predictions over HTTP.
    Serve {
        #[arg(long)]
        model_dir: PathBuf,
        #[arg(long, default_value = "127.0.0.1:8000")]
        addr: String,
        #[arg(long, default_value = "best")]
        checkpoint: CheckpointTag,
        /// Class that wins an exact probability tie. Defaults to the last class.
        #[arg(long)]
        tie_class: Option<String>,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose)?;

    match cli.command {
        Command::Train { config, output, epochs } => train(&config, output, epochs),
        Command::Evaluate { model_dir, data, checkpoint } => evaluate_checkpoint(&model_dir, &data, checkpoint),
        Command::Serve { model_dir, addr, checkpoint, tie_class } => {
            let predictor = Predictor::load(&model_dir, checkpoint, tie_class.as_deref())
                .with_context(|| format!("loading model from {}", model_dir.display()))?;
            serve(predictor, &addr)?;
            Ok(())
        }
    }
}

fn build_model(config: &RunConfig) -> anyhow::Result<StagedClassifier> {
    if let Some(path) = &config.model.pretrained {
        return StagedClassifier::load_json(path)
            .with_context(|| format!("loading pretrained model {}", path.display()));
    }
    match &config.model.architecture {
        Some(spec) => {
            let mut rng = StdRng::seed_from_u64(config.training.seed);
            Ok(StagedClassifier::from_spec(spec, &mut rng)?)
        }
        None => bail!("[model] needs either `pretrained` or `architecture`"),
    }
}

fn train(config_path: &Path, output: Option<PathBuf>, epochs: Option<usize>) -> anyhow::Result<()> {
    let mut config = RunConfig::load(config_path)?;
    if let Some(dir) = output {
        config.output.dir = dir;
    }
    if let Some(n) = epochs {
        config.training.epochs = n;
    }
    config.validate()?;

    let train_folder = ImageFolder::open(&config.data.train_path())?;
    let classes = train_folder.classes().clone();
    let val_folder = ImageFolder::open_with_classes(&config.data.val_path(), &classes)?;
    let counts = train_folder.class_counts();

    let model = build_model(&config)?;
    let preprocessing = config.data.preprocessing.clone();
    if model.input_size != preprocessing.input_len() {
        bail!(
            "model expects {} inputs but preprocessing produces {} ({}x{}x3)",
            model.input_size,
            preprocessing.input_len(),
            preprocessing.width,
            preprocessing.height
        );
    }

    let store = DirCheckpointStore::create(&config.output.dir)?;
    let mut orchestrator = Orchestrator::new(config.training.clone(), model, classes.clone(), &counts, store)?;
    info!(
        parameters = orchestrator.model().parameter_count(),
        trainable_stages = config.training.trainable_stages,
        classes = ?classes.names(),
        "model ready"
    );

    // Written before the first epoch so `best` is loadable as soon as it exists.
    let manifest = ModelManifest {
        architecture: orchestrator.model().architecture(),
        classes: classes.clone(),
        preprocessing: preprocessing.clone(),
        description: config.model.description.clone(),
    };
    orchestrator.store().save_manifest(&manifest)?;

    let batch_size = config.training.batch_size;
    let mut train_split = train_folder.into_split(
        preprocessing.clone(),
        config.data.augmentation,
        batch_size,
        Some(config.training.seed),
    )?;
    let mut val_split = val_folder.into_split(preprocessing, AugmentationPolicy::None, batch_size, None)?;

    let mut observer = LogObserver::new(classes);
    let summary = orchestrator.run(&mut train_split, &mut val_split, &mut observer)?;

    println!(
        "Finished after {} epochs ({:?}). Best validation accuracy {:.4}{}.",
        summary.epochs_completed,
        summary.stop_reason,
        summary.best_validation_accuracy,
        summary.best_epoch.map(|e| format!(" at epoch {}", e)).unwrap_or_default(),
    );
    println!("Checkpoints written to {}", config.output.dir.display());
    Ok(())
}

fn evaluate_checkpoint(model_dir: &Path, data: &Path, checkpoint: CheckpointTag) -> anyhow::Result<()> {
    let predictor = Predictor::load(model_dir, checkpoint, None)
        .with_context(|| format!("loading model from {}", model_dir.display()))?;
    let classes = predictor.classes();
    let folder = ImageFolder::open_with_classes(data, classes)?;
    let mut split = folder.into_split(
        predictor.manifest().preprocessing.clone(),
        AugmentationPolicy::None,
        64,
        None,
    )?;

    let mut predictions = Vec::with_capacity(split.len());
    for batch in split.epoch() {
        for input in batch.inputs() {
            predictions.push(predictor.predict_class(input)?);
        }
    }

    let report = evaluate(&predictions, split.labels(), classes)?;
    println!("{}", report);

    let paths = split.paths();
    let mut mismatches = report.mismatches().peekable();
    if mismatches.peek().is_some() {
        println!("Misclassified:");
    }
    for m in mismatches {
        println!("  {} (actual: {}, predicted: {})", paths[m.index].display(), m.actual, m.predicted);
    }
    Ok(())
}
