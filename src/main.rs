// Offline companion to the `server` binary: builds demo models, inspects
// model files and runs the classify + Grad-CAM pipeline on a single image.
//
//   cargo run -- init-model --out model/classifier.json
//   cargo run -- inspect --model model/classifier.json
//   cargo run -- explain --model model/classifier.json --image cell.jpg --out cell_heatmap.jpg

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::error;
use tracing_subscriber::EnvFilter;

use sickle_cam::config::ModelConfig;
use sickle_cam::explain::target::{resolve_target_layer, DEFAULT_CANDIDATE_LAYERS};
use sickle_cam::network::mobilenet::mobilenet_like;
use sickle_cam::{Explainer, Network, Result};

#[derive(Parser)]
#[command(name = "sickle-cam")]
#[command(version = "0.1.0")]
#[command(about = "Sickle-cell classifier with Grad-CAM explanations", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a randomly initialized MobileNet-shaped classifier
    InitModel {
        /// Output JSON path
        #[arg(short, long)]
        out: PathBuf,
        /// Square input resolution
        #[arg(long, default_value = "224")]
        input_size: usize,
        /// RNG seed for reproducible weights
        #[arg(long, default_value = "42")]
        seed: u64,
    },
    /// Print the layer table and the resolved Grad-CAM layer
    Inspect {
        #[arg(short, long)]
        model: PathBuf,
        /// Explicit target layer instead of candidate probing
        #[arg(long)]
        target_layer: Option<String>,
    },
    /// Classify one image and write its heatmap overlay
    Explain {
        #[arg(short, long)]
        model: PathBuf,
        #[arg(short, long)]
        image: PathBuf,
        /// Output JPEG path for the overlay
        #[arg(short, long)]
        out: PathBuf,
        #[arg(long)]
        target_layer: Option<String>,
    },
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("warn,sickle_cam=info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> ExitCode {
    init_logging();
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::InitModel { out, input_size, seed } => init_model(out, input_size, seed),
        Commands::Inspect { model, target_layer } => inspect(model, target_layer),
        Commands::Explain { model, image, out, target_layer } => explain(model, image, out, target_layer),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(kind = ?e.kind(), "{}", e);
            ExitCode::FAILURE
        }
    }
}

fn init_model(out: PathBuf, input_size: usize, seed: u64) -> Result<()> {
    let network = mobilenet_like(input_size, &mut StdRng::seed_from_u64(seed));
    network.validate()?;
    if let Some(parent) = out.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    network.save_json(&out)?;
    println!("Wrote {} ({} layers, input {}x{}x3) to {}",
        network.name, network.layers.len(), input_size, input_size, out.display());
    Ok(())
}

fn inspect(model: PathBuf, target_layer: Option<String>) -> Result<()> {
    let network = Network::load_json(&model)?;
    let shapes = network.output_shapes()?;

    println!("{}  input {:?}", network.name, network.input_shape);
    for (i, (layer, shape)) in network.layers.iter().zip(&shapes).enumerate() {
        println!("{:>3}  {:<28} {:<18} {:?}", i, layer.name, layer.type_name(), shape);
    }

    let target = resolve_target_layer(&network, target_layer.as_deref(), &DEFAULT_CANDIDATE_LAYERS)?;
    println!("Grad-CAM layer: {} (index {}, shape {:?})", target.name, target.index, target.shape);
    Ok(())
}

fn explain(model: PathBuf, image: PathBuf, out: PathBuf, target_layer: Option<String>) -> Result<()> {
    let network = Network::load_json(&model)?;
    let config = ModelConfig {
        path: model,
        input_size: network.input_shape[0] as u32,
        target_layer,
        candidate_layers: DEFAULT_CANDIDATE_LAYERS.iter().map(|s| s.to_string()).collect(),
    };
    let explainer = Explainer::from_network(network, &config)?;

    let bytes = std::fs::read(&image)?;
    let analysis = explainer.analyze(&bytes)?;
    std::fs::write(&out, analysis.overlay_jpeg()?)?;

    let report = serde_json::json!({
        "label": analysis.prediction.label,
        "confidence": analysis.prediction.rounded_confidence(),
        "layer": explainer.target().name,
        "heatmap_file": out.display().to_string(),
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
