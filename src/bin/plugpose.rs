//! plugpose CLI: ellipse fitting, PnP, stereo depth and triangulation for the plug fiducials.
use anyhow::Context;
use clap::{Args, Parser, Subcommand, ValueEnum};
use plugpose::config::PipelineConfig;
use plugpose::detection::load_detections;
use plugpose::fiducial::{FiducialAssigner, NamedFiducialSet, Side};
use plugpose::fit::EllipseFitter;
use plugpose::model::ReferenceObjectModel;
use plugpose::pipeline::{SideInput, StereoPipeline};
use plugpose::stereo::reconstruct::{disparity_to_png, merge_by_class, ClassCenter};
use plugpose::stereo::{triangulate_named, CalibrationBundle, CalibrationDescription};
use serde::Serialize;
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "plugpose")]
#[command(about = "Pose of a charging plug from fiducial detections in a stereo pair")]
#[command(version)]
struct Cli {
    /// Pipeline configuration (JSON). Built-in defaults when omitted.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build a calibration bundle from a rig description.
    Calib {
        /// Rig description (JSON with width, height, fov, baseline, intrinsics).
        #[arg(long)]
        description: PathBuf,
        #[arg(long)]
        out: PathBuf,
    },

    /// Fit ellipses inside detector boxes and assign them to pins.
    Fit(FitArgs),

    /// Solve the plug pose from one side's fitted ellipses.
    Pose {
        #[arg(long)]
        ellipses: PathBuf,
        #[arg(long)]
        bundle: PathBuf,
        /// Reference model (JSON). The built-in layout is used when omitted.
        #[arg(long)]
        model: Option<PathBuf>,
        #[arg(long)]
        out: Option<PathBuf>,
    },

    /// Dense disparity and depth of a stereo pair.
    Depth {
        #[arg(long)]
        left: PathBuf,
        #[arg(long)]
        right: PathBuf,
        #[arg(long)]
        bundle: PathBuf,
        /// Normalized 8-bit disparity image.
        #[arg(long)]
        disparity_png: PathBuf,
    },

    /// Triangulate pins fitted on both sides.
    Triangulate {
        #[arg(long)]
        left: PathBuf,
        #[arg(long)]
        right: PathBuf,
        #[arg(long)]
        bundle: PathBuf,
        /// Also write the class-matched centers.
        #[arg(long)]
        merged: Option<PathBuf>,
        #[arg(long)]
        out: Option<PathBuf>,
    },

    /// Full stereo frame: fit both sides, PnP on each, triangulate.
    Run(RunArgs),
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum SideArg {
    Left,
    Right,
}

impl From<SideArg> for Side {
    fn from(s: SideArg) -> Self {
        match s {
            SideArg::Left => Side::Left,
            SideArg::Right => Side::Right,
        }
    }
}

#[derive(Debug, Clone, Args)]
struct FitArgs {
    #[arg(long)]
    image: PathBuf,
    /// Detector output (JSON list of {bbox, confidence, class}).
    #[arg(long)]
    detections: PathBuf,
    #[arg(long, value_enum, default_value_t = SideArg::Left)]
    side: SideArg,
    #[arg(long)]
    out: PathBuf,
    /// Write the image with fitted outlines drawn on it.
    #[arg(long)]
    overlay: Option<PathBuf>,
}

#[derive(Debug, Clone, Args)]
struct RunArgs {
    #[arg(long)]
    left: PathBuf,
    #[arg(long)]
    right: PathBuf,
    #[arg(long)]
    left_detections: PathBuf,
    #[arg(long)]
    right_detections: PathBuf,
    #[arg(long)]
    bundle: PathBuf,
    #[arg(long)]
    model: Option<PathBuf>,
    #[arg(long)]
    out: Option<PathBuf>,
}

fn write_json<T: Serialize>(value: &T, out: Option<&Path>) -> anyhow::Result<()> {
    let text = serde_json::to_string_pretty(value)?;
    match out {
        Some(path) => {
            std::fs::write(path, text).with_context(|| format!("writing {}", path.display()))?;
            log::info!("wrote {}", path.display());
        }
        None => println!("{text}"),
    }
    Ok(())
}

fn load_gray(path: &Path) -> anyhow::Result<image::GrayImage> {
    Ok(image::open(path)
        .with_context(|| format!("opening {}", path.display()))?
        .to_luma8())
}

fn run_fit(config: &PipelineConfig, args: &FitArgs) -> anyhow::Result<()> {
    let img = image::open(&args.image).with_context(|| format!("opening {}", args.image.display()))?;
    let gray = img.to_luma8();
    let detections = load_detections(&args.detections)?;
    let assigner = FiducialAssigner::new(EllipseFitter::new(config.fitter.clone()));

    let mut set = assigner.assign(args.side.into(), &detections, &gray);
    set.image = Some(args.image.display().to_string());
    set.to_json_file(&args.out)?;
    log::info!("wrote {}", args.out.display());

    if let Some(path) = &args.overlay {
        let mut canvas = img.to_rgb8();
        set.draw_overlay(&mut canvas);
        canvas.save(path)?;
    }
    Ok(())
}

fn run_triangulate(
    left: &Path,
    right: &Path,
    bundle: &Path,
    merged: Option<&Path>,
    out: Option<&Path>,
) -> anyhow::Result<()> {
    let left = NamedFiducialSet::from_json_file(left)?;
    let right = NamedFiducialSet::from_json_file(right)?;
    let bundle = CalibrationBundle::from_json_file(bundle)?;

    if let Some(path) = merged {
        let centers = |set: &NamedFiducialSet| -> Vec<ClassCenter> {
            set.points
                .iter()
                .map(|(pin, r)| ClassCenter {
                    class: pin.class_id(),
                    center: r.center(),
                })
                .collect()
        };
        write_json(&merge_by_class(&centers(&left), &centers(&right)), Some(path))?;
    }
    write_json(&triangulate_named(&left, &right, &bundle.q), out)
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();
    let config = PipelineConfig::load_or_default(cli.config.as_deref())?;

    match cli.command {
        Commands::Calib { description, out } => {
            let desc = CalibrationDescription::from_json_file(&description)?;
            let bundle = CalibrationBundle::from_description(&desc)?;
            bundle.to_json_file(&out)?;
            log::info!("wrote {}", out.display());
        }
        Commands::Fit(args) => run_fit(&config, &args)?,
        Commands::Pose {
            ellipses,
            bundle,
            model,
            out,
        } => {
            let set = NamedFiducialSet::from_json_file(&ellipses)?;
            let bundle = CalibrationBundle::from_json_file(&bundle)?;
            let model = ReferenceObjectModel::load_or_fallback(model.as_deref())?;
            let (w, h) = bundle.image_size.unwrap_or_default();
            let pipeline = StereoPipeline::new(config, bundle, model);
            let pose = pipeline
                .solve_side(&set, w, h)
                .context("no pose could be solved")?;
            write_json(&pose.report(), out.as_deref())?;
        }
        Commands::Depth {
            left,
            right,
            bundle,
            disparity_png,
        } => {
            let bundle = CalibrationBundle::from_json_file(&bundle)?;
            let pipeline = StereoPipeline::new(config, bundle, ReferenceObjectModel::fallback());
            let depth = pipeline.reconstruct_depth(&load_gray(&left)?, &load_gray(&right)?)?;
            disparity_to_png(&depth.disparity).save(&disparity_png)?;
            let mut valid: Vec<f32> = depth.depth.iter().copied().filter(|z| z.is_finite()).collect();
            valid.sort_by(f32::total_cmp);
            let median = valid.get(valid.len() / 2);
            log::info!(
                "wrote {}, {:.1}% valid, median depth {:?}",
                disparity_png.display(),
                100.0 * depth.valid_fraction(),
                median
            );
        }
        Commands::Triangulate {
            left,
            right,
            bundle,
            merged,
            out,
        } => run_triangulate(&left, &right, &bundle, merged.as_deref(), out.as_deref())?,
        Commands::Run(args) => {
            let bundle = CalibrationBundle::from_json_file(&args.bundle)?;
            let model = ReferenceObjectModel::load_or_fallback(args.model.as_deref())?;
            let pipeline = StereoPipeline::new(config, bundle, model);
            let (left, right) = (load_gray(&args.left)?, load_gray(&args.right)?);
            let (left_det, right_det) = (
                load_detections(&args.left_detections)?,
                load_detections(&args.right_detections)?,
            );
            let mut report = pipeline.process_frame(
                SideInput {
                    image: &left,
                    detections: &left_det,
                },
                SideInput {
                    image: &right,
                    detections: &right_det,
                },
            );
            report.left.image = Some(args.left.display().to_string());
            report.right.image = Some(args.right.display().to_string());
            write_json(&report, args.out.as_deref())?;
        }
    }
    Ok(())
}
