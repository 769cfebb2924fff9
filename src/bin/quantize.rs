use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use filament_quantizer::{
    Algorithm, FilamentInventory, ImageData, MatchMethod, QuantizationService, QuantizeOptions,
    QuantizeRequest, RegionAssignment, ServiceConfig, find_best_filament_match,
};
use serde::Serialize;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Reduce images to a few color regions and match them to printer filaments.
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// One or more input image paths
    #[arg(required = true)]
    inputs: Vec<PathBuf>,

    /// Maximum number of palette colors
    #[arg(short = 'k', long, default_value_t = 8)]
    max_colors: usize,

    /// Clustering algorithm: "kmeans" or "median-cut"
    #[arg(short, long, default_value = "kmeans")]
    algorithm: Algorithm,

    /// ΔE below which palette colors are merged (0 disables merging)
    #[arg(short, long, default_value_t = 8.0)]
    merge_threshold: f64,

    /// Seed for k-means++ initialisation
    #[arg(long)]
    seed: Option<u64>,

    /// Filament inventory JSON file (defaults to the bundled inventory)
    #[arg(short, long)]
    inventory: Option<PathBuf>,

    /// Also report the single best filament per region using this metric
    /// ("lab-delta-e", "rgb-distance" or "hue-match")
    #[arg(long)]
    match_method: Option<MatchMethod>,

    /// Directory to write region overlay PNGs into
    #[arg(short = 'd', long)]
    region_map_dir: Option<PathBuf>,

    /// Per-image timeout in seconds
    #[arg(long, default_value_t = 30)]
    timeout_secs: u64,

    /// Only print pixel statistics, skip quantization
    #[arg(long)]
    analyze: bool,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct BestMatch {
    region_id: String,
    filament_id: String,
    distance: f64,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Report {
    input: String,
    original_color_count: usize,
    final_color_count: usize,
    regions: Vec<filament_quantizer::Region>,
    filaments: Vec<RegionAssignment>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    best_matches: Vec<BestMatch>,
}

fn load_image(path: &PathBuf) -> Result<ImageData> {
    let bytes = fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    ImageData::decode(&bytes).with_context(|| format!("decoding {}", path.display()))
}

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "filament_quantizer=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let args = Args::parse();

    let service =
        QuantizationService::new(ServiceConfig::with_timeout(Duration::from_secs(args.timeout_secs)));

    if args.analyze {
        for input in &args.inputs {
            let analysis = service
                .analyze_image(load_image(input)?)
                .with_context(|| format!("analyzing {}", input.display()))?;
            println!("{}", serde_json::to_string_pretty(&analysis)?);
        }
        return Ok(());
    }

    let inventory = match &args.inventory {
        Some(path) => {
            let json = fs::read_to_string(path)
                .with_context(|| format!("reading inventory {}", path.display()))?;
            FilamentInventory::from_json(&json)?
        }
        None => FilamentInventory::builtin()?,
    };

    let options = QuantizeOptions {
        max_colors: args.max_colors,
        algorithm: args.algorithm,
        merge_threshold: args.merge_threshold,
        seed: args.seed,
    };

    // Queue everything up front; the service answers in submission order.
    let mut pending = Vec::with_capacity(args.inputs.len());
    for input in &args.inputs {
        let request = QuantizeRequest::new(load_image(input)?, options);
        pending.push((input, service.submit_quantize(request)?));
    }

    if service.is_degraded() {
        tracing::warn!("Worker threads unavailable, results are coarse approximations");
    }

    for (input, job) in pending {
        let result = job
            .wait()
            .with_context(|| format!("quantizing {}", input.display()))?;

        if let Some(dir) = &args.region_map_dir {
            fs::create_dir_all(dir)?;
            let stem = input.file_stem().unwrap_or_default().to_string_lossy();
            let out_path = dir.join(format!("{stem}_regions.png"));
            let img = result
                .region_map
                .to_image()
                .context("region map does not match image dimensions")?;
            img.save(&out_path)
                .with_context(|| format!("writing {}", out_path.display()))?;
            tracing::info!(path = %out_path.display(), "Saved region map");
        }

        let filaments = inventory.auto_map_regions(&result.regions)?;

        let mut best_matches = Vec::new();
        if let Some(method) = args.match_method {
            for region in &result.regions {
                let target = region.avg_color.parse()?;
                if let Some(m) = find_best_filament_match(target, inventory.filaments(), method)? {
                    best_matches.push(BestMatch {
                        region_id: region.id.clone(),
                        filament_id: m.filament.id.clone(),
                        distance: m.distance,
                    });
                }
            }
        }

        let report = Report {
            input: input.display().to_string(),
            original_color_count: result.original_color_count,
            final_color_count: result.final_color_count,
            regions: result.regions,
            filaments,
            best_matches,
        };
        println!("{}", serde_json::to_string_pretty(&report)?);
    }

    Ok(())
}
