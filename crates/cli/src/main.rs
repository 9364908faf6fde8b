//! PixClass CLI - pixel classification of TIFF images

mod objects;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use pixclass_algorithms::classification::{
    KNearestParams, LogisticParams, ModelConfig, RandomTreesParams,
};
use pixclass_algorithms::persist::{DirectoryModelStore, ModelStore};
use pixclass_algorithms::training::BoundaryStrategy;
use pixclass_algorithms::{ClassifiedRegion, OutputType};
use pixclass_core::io::{read_tiff_image, write_classification_tiff, write_probability_tiff};
use pixclass_core::{
    ImageServer, InMemoryImage, ObjectHierarchy, ObjectKind, PathClass, RegionRequest, Resolution,
};
use pixclass_engine::{ObjectParams, PixelClassifierSession, SessionConfig, SizeUnits};

// ─── CLI structure ──────────────────────────────────────────────────────

#[derive(Parser)]
#[command(name = "pixclass")]
#[command(author, version, about = "Pixel classification of multi-channel images", long_about = None)]
struct Cli {
    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Where trained classifiers are stored
#[derive(clap::Args)]
struct ModelLocation {
    /// Directory of saved classifiers
    #[arg(long, default_value = "classifiers")]
    model_dir: PathBuf,
    /// Classifier name
    #[arg(short, long)]
    name: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Show image dimensions, channels and available resolutions
    Info {
        /// Input TIFF image
        input: PathBuf,
    },
    /// Train a classifier from annotations and save it
    Train {
        /// Input TIFF image
        input: PathBuf,
        /// JSON file of class-labeled annotations
        annotations: PathBuf,
        #[command(flatten)]
        location: ModelLocation,
        /// Index into the default resolutions (0 = full resolution)
        #[arg(short, long, default_value = "0")]
        resolution_level: usize,
        /// Model type
        #[arg(short, long, value_enum, default_value = "rtrees")]
        classifier: ClassifierKind,
        /// Boundary handling: skip, derived, or class:<name>
        #[arg(short, long, default_value = "skip")]
        boundary: String,
        /// Boundary thickness in working-resolution pixels
        #[arg(short, long, default_value = "0")]
        thickness: f64,
        /// Write per-class probabilities instead of class indices
        #[arg(long)]
        probability: bool,
        /// Optional session configuration (JSON); flags override it
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Classify a whole image with a saved classifier
    Classify {
        /// Input TIFF image
        input: PathBuf,
        #[command(flatten)]
        location: ModelLocation,
        /// Output TIFF
        output: PathBuf,
    },
    /// Create objects from a saved classifier's output
    Objects {
        /// Input TIFF image
        input: PathBuf,
        #[command(flatten)]
        location: ModelLocation,
        /// Output JSON file
        output: PathBuf,
        /// Minimum object size (full-resolution px², or µm² with --microns)
        #[arg(long, default_value = "0")]
        min_size: f64,
        /// Holes smaller than this are filled
        #[arg(long, default_value = "0")]
        min_hole_size: f64,
        /// Sizes are in µm²
        #[arg(long)]
        microns: bool,
        /// One object per connected region
        #[arg(long)]
        split: bool,
        /// Create detections instead of annotations
        #[arg(long)]
        detections: bool,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum ClassifierKind {
    Rtrees,
    Knn,
    Logistic,
    Ml,
}

impl ClassifierKind {
    fn model(self) -> ModelConfig {
        match self {
            ClassifierKind::Rtrees => ModelConfig::RandomTrees(RandomTreesParams::default()),
            ClassifierKind::Knn => ModelConfig::KNearest(KNearestParams::default()),
            ClassifierKind::Logistic => ModelConfig::LogisticRegression(LogisticParams::default()),
            ClassifierKind::Ml => ModelConfig::MaximumLikelihood,
        }
    }
}

// ─── Helpers ────────────────────────────────────────────────────────────

fn setup_logging(verbose: bool) -> Result<()> {
    let level = if verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber).context("Setting default subscriber failed")
}

fn spinner(msg: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.green} {msg}") {
        pb.set_style(style);
    }
    pb.set_message(msg.to_string());
    pb.enable_steady_tick(std::time::Duration::from_millis(100));
    pb
}

fn read_image(path: &Path) -> Result<Arc<InMemoryImage>> {
    let pb = spinner("Reading image...");
    let image = read_tiff_image(path).with_context(|| format!("Failed to read {}", path.display()))?;
    pb.finish_and_clear();
    info!("Input: {} x {}, {} channel(s)", image.width(), image.height(), image.n_channels());
    Ok(Arc::new(image))
}

fn parse_boundary(s: &str, thickness: f64) -> Result<BoundaryStrategy> {
    let strategy = match s.to_lowercase().as_str() {
        "skip" => BoundaryStrategy::Skip { thickness },
        "derived" => BoundaryStrategy::Derived { thickness },
        _ => match s.strip_prefix("class:") {
            Some(name) if !name.is_empty() => BoundaryStrategy::ClassifyAs {
                class: PathClass::new(name),
                thickness,
            },
            _ => anyhow::bail!("Unknown boundary: {}. Use skip, derived, or class:<name>.", s),
        },
    };
    strategy.validate().context("Invalid boundary")?;
    Ok(strategy)
}

fn resolution_level(image: &dyn ImageServer, level: usize) -> Result<Resolution> {
    let resolutions = Resolution::defaults(image.pixel_calibration(), None);
    let n = resolutions.len();
    resolutions
        .into_iter()
        .nth(level)
        .with_context(|| format!("Resolution level {} out of range (0..{})", level, n))
}

/// Session over `image` with the named classifier loaded.
fn open_session(image: Arc<InMemoryImage>, location: &ModelLocation) -> Result<PixelClassifierSession> {
    let config = SessionConfig::for_image(image.as_ref());
    let mut session = PixelClassifierSession::new(image, ObjectHierarchy::new(), config)?;
    let store = DirectoryModelStore::new(&location.model_dir);
    session
        .load_classifier(&store, &location.name)
        .with_context(|| format!("Failed to load classifier '{}'", location.name))?;
    Ok(session)
}

fn done(name: &str, path: &Path, elapsed: std::time::Duration) {
    println!("{} saved to: {}", name, path.display());
    println!("  Processing time: {:.2?}", elapsed);
}

// ─── Main ───────────────────────────────────────────────────────────────

fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_logging(cli.verbose)?;

    match cli.command {
        Commands::Info { input } => {
            let image = read_image(&input)?;
            let calibration = image.pixel_calibration();
            println!("File: {}", input.display());
            println!("Dimensions: {} x {}", image.width(), image.height());
            println!("Planes: z = {}, t = {}", image.n_z(), image.n_t());
            println!("Channels:");
            for name in image.channel_names() {
                println!("  {}", name);
            }
            match calibration.averaged_pixel_size_microns() {
                Some(size) => println!("Pixel size: {:.4} µm", size),
                None => println!("Pixel size: unknown"),
            }
            println!("\nResolutions:");
            for (i, res) in Resolution::defaults(calibration, None).iter().enumerate() {
                println!("  [{}] {}", i, res);
            }
        }

        Commands::Train {
            input,
            annotations,
            location,
            resolution_level: level,
            classifier,
            boundary,
            thickness,
            probability,
            config,
        } => {
            let image = read_image(&input)?;
            let mut hierarchy = ObjectHierarchy::new();
            let n = hierarchy.add_objects(objects::read_objects(&annotations)?).len();
            info!("Annotations: {}", n);

            let mut session_config = match &config {
                Some(path) => SessionConfig::load(path)
                    .with_context(|| format!("Failed to read config {}", path.display()))?,
                None => SessionConfig::for_image(image.as_ref()),
            };
            session_config.resolution = resolution_level(image.as_ref(), level)?;
            session_config.model = classifier.model();
            session_config.boundary = parse_boundary(&boundary, thickness)?;
            if probability {
                session_config.output = OutputType::Probability;
            }

            let mut session = PixelClassifierSession::new(image, hierarchy, session_config)?;
            let pb = spinner("Training...");
            let start = Instant::now();
            let report = session.train().context("Training failed")?;
            let elapsed = start.elapsed();
            pb.finish_and_clear();

            println!("{}", report);
            let store = DirectoryModelStore::new(&location.model_dir);
            session.save_classifier(&store, Some(&location.name))?;
            let path = location.model_dir.join(format!("{}.json", location.name));
            done("Classifier", &path, elapsed);
            let saved = store.list()?;
            info!("Classifiers in {}: {}", location.model_dir.display(), saved.join(", "));
        }

        Commands::Classify {
            input,
            location,
            output,
        } => {
            let image = read_image(&input)?;
            let region = RegionRequest::new(0, 0, image.width(), image.height());
            let mut session = open_session(image, &location)?;

            let pb = spinner("Classifying...");
            let start = Instant::now();
            let result = session.classify(&region).context("Classification failed")?;
            let elapsed = start.elapsed();
            pb.finish_and_clear();

            let pb = spinner("Writing output...");
            match &result {
                ClassifiedRegion::Classification(raster) => write_classification_tiff(raster, &output),
                ClassifiedRegion::Probability(bands) => write_probability_tiff(bands, &output),
            }
            .context("Failed to write output")?;
            pb.finish_and_clear();

            if let Some(classifier) = session.classifier() {
                let channels = &classifier.metadata().channels;
                let counts = result.to_classification()?.class_counts(channels.len());
                for (i, (class, count)) in channels.iter().zip(counts).enumerate() {
                    println!("  {} = {} ({} px)", i, class, count);
                }
            }
            done("Classification", &output, elapsed);
        }

        Commands::Objects {
            input,
            location,
            output,
            min_size,
            min_hole_size,
            microns,
            split,
            detections,
        } => {
            let image = read_image(&input)?;
            let mut session = open_session(image, &location)?;
            let params = ObjectParams {
                kind: if detections {
                    ObjectKind::Detection
                } else {
                    ObjectKind::Annotation
                },
                min_size,
                min_hole_size,
                units: if microns { SizeUnits::Microns } else { SizeUnits::Pixels },
                split,
                simplify: None,
            };

            let pb = spinner("Creating objects...");
            let start = Instant::now();
            let ids = session
                .extract_objects(None, 0, 0, &params)
                .context("Object creation failed")?;
            let elapsed = start.elapsed();
            pb.finish_and_clear();

            let hierarchy = session.hierarchy();
            objects::write_objects(&output, ids.iter().filter_map(|&id| hierarchy.get(id)))?;
            println!("Objects: {}", ids.len());
            done("Objects", &output, elapsed);
        }
    }

    Ok(())
}
