use std::path::{Path, PathBuf};

use anyhow::Context as _;
use clap::{Args, Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;

use oitkit::{
    DeviceCaps, FrameReport, FrameTarget, MemoryMetrics, OitMethod, OitRenderer, OitSettings,
    QuadScene, Resolution,
};

#[derive(Parser, Debug)]
#[command(name = "oitkit", version)]
struct Cli {
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Render a scene with one method and write a PNG.
    Render(RenderArgs),
    /// Render a scene with every method and report the error against the exact composite.
    Compare(CompareArgs),
    /// Print per-pixel depth complexity statistics and optionally write the heat map.
    Complexity(ComplexityArgs),
}

#[derive(Args, Debug)]
struct SceneArgs {
    /// Quad scene JSON. Without it, the three-quads demo scene is used.
    #[arg(long)]
    scene: Option<PathBuf>,

    /// Generate this many random quads instead of loading a scene.
    #[arg(long, conflicts_with = "scene")]
    random: Option<usize>,

    /// Seed for `--random`.
    #[arg(long, default_value_t = 1)]
    seed: u64,

    #[arg(long, default_value_t = 256)]
    width: u32,

    #[arg(long, default_value_t = 256)]
    height: u32,

    /// Settings JSON; defaults apply to missing fields.
    #[arg(long)]
    settings: Option<PathBuf>,

    /// Warn once live storage exceeds this many bytes.
    #[arg(long)]
    budget_bytes: Option<u64>,

    /// Emulate a device without per-pixel fragment interlock.
    #[arg(long)]
    no_interlock: bool,
}

#[derive(Parser, Debug)]
struct RenderArgs {
    #[command(flatten)]
    scene: SceneArgs,

    /// Overrides the method from `--settings`.
    #[arg(long, value_enum)]
    method: Option<MethodChoice>,

    /// Output PNG path.
    #[arg(long)]
    out: PathBuf,

    /// Write the frame report as JSON.
    #[arg(long)]
    report: Option<PathBuf>,
}

#[derive(Parser, Debug)]
struct CompareArgs {
    #[command(flatten)]
    scene: SceneArgs,

    /// Print the results as JSON instead of a table.
    #[arg(long)]
    json: bool,
}

#[derive(Parser, Debug)]
struct ComplexityArgs {
    #[command(flatten)]
    scene: SceneArgs,

    /// Output PNG path for the heat map.
    #[arg(long)]
    out: Option<PathBuf>,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum MethodChoice {
    KBuffer,
    LinkedList,
    Mlab,
    MlabBucket,
    Hybrid,
    Moments,
    Wboit,
    DepthPeeling,
    DepthComplexity,
}

impl From<MethodChoice> for OitMethod {
    fn from(choice: MethodChoice) -> Self {
        match choice {
            MethodChoice::KBuffer => OitMethod::KBuffer,
            MethodChoice::LinkedList => OitMethod::LinkedList,
            MethodChoice::Mlab => OitMethod::Mlab,
            MethodChoice::MlabBucket => OitMethod::MlabBucket,
            MethodChoice::Hybrid => OitMethod::Hybrid,
            MethodChoice::Moments => OitMethod::Moments,
            MethodChoice::Wboit => OitMethod::Wboit,
            MethodChoice::DepthPeeling => OitMethod::DepthPeeling,
            MethodChoice::DepthComplexity => OitMethod::DepthComplexity,
        }
    }
}

#[derive(Debug, serde::Serialize)]
struct Comparison {
    method: OitMethod,
    exact: bool,
    max_error: f32,
    report: FrameReport,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.cmd {
        Command::Render(args) => cmd_render(args),
        Command::Compare(args) => cmd_compare(args),
        Command::Complexity(args) => cmd_complexity(args),
    }
}

fn load_settings(args: &SceneArgs) -> anyhow::Result<OitSettings> {
    match &args.settings {
        Some(path) => Ok(OitSettings::from_json_path(path)?),
        None => Ok(OitSettings::default()),
    }
}

fn load_scene(args: &SceneArgs, settings: &OitSettings) -> anyhow::Result<QuadScene> {
    if let Some(path) = &args.scene {
        return Ok(QuadScene::from_json_path(path)?);
    }
    let resolution = Resolution::new(args.width, args.height)?;
    Ok(match args.random {
        Some(count) => QuadScene::random(resolution, count, settings.depth_range, args.seed)?,
        None => QuadScene::three_quads(args.width, args.height),
    })
}

fn caps(args: &SceneArgs) -> DeviceCaps {
    if args.no_interlock {
        DeviceCaps::host().without_pixel_interlock()
    } else {
        DeviceCaps::host()
    }
}

fn render_once(
    args: &SceneArgs,
    settings: OitSettings,
    scene: &mut QuadScene,
) -> anyhow::Result<(FrameTarget, FrameReport)> {
    let metrics = args
        .budget_bytes
        .map_or_else(MemoryMetrics::new, MemoryMetrics::with_budget);
    let method = settings.method;
    let mut renderer = OitRenderer::with_metrics(caps(args), settings, metrics)
        .with_context(|| format!("create {} renderer", method.name()))?;
    renderer.resolution_changed(scene.width, scene.height)?;
    let mut target = FrameTarget::new(scene.resolution()?);
    let report = renderer
        .render_frame(scene, &mut target)
        .with_context(|| format!("render frame with {}", method.name()))?;
    Ok((target, report))
}

fn ensure_parent(path: &Path) -> anyhow::Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("create output dir '{}'", parent.display()))?;
    }
    Ok(())
}

fn cmd_render(args: RenderArgs) -> anyhow::Result<()> {
    let mut settings = load_settings(&args.scene)?;
    if let Some(method) = args.method {
        settings.method = method.into();
    }
    let mut scene = load_scene(&args.scene, &settings)?;
    let (target, report) = render_once(&args.scene, settings, &mut scene)?;

    ensure_parent(&args.out)?;
    target.save_png(&args.out)?;
    eprintln!("wrote {}", args.out.display());

    if let Some(path) = &args.report {
        ensure_parent(path)?;
        let json = serde_json::to_string_pretty(&report).context("serialize frame report")?;
        std::fs::write(path, json)
            .with_context(|| format!("write report '{}'", path.display()))?;
        eprintln!("wrote {}", path.display());
    }
    Ok(())
}

fn cmd_compare(args: CompareArgs) -> anyhow::Result<()> {
    let base = load_settings(&args.scene)?;
    let mut scene = load_scene(&args.scene, &base)?;
    let reference = scene.reference_image()?;
    let caps = caps(&args.scene);

    let mut results = Vec::new();
    for method in OitMethod::ALL {
        if method == OitMethod::DepthComplexity {
            continue;
        }
        if caps.check(method).is_err() {
            eprintln!("skip {}: needs pixel interlock", method.name());
            continue;
        }
        let settings = OitSettings {
            method,
            ..base.clone()
        };
        let (target, report) = render_once(&args.scene, settings, &mut scene)?;
        results.push(Comparison {
            method,
            exact: method.is_exact(),
            max_error: oitkit::scene::max_abs_diff(&target, &reference)?,
            report,
        });
    }

    if args.json {
        let json = serde_json::to_string_pretty(&results).context("serialize comparison")?;
        println!("{json}");
        return Ok(());
    }
    println!(
        "{:<18} {:>10} {:>10} {:>10} {:>10} {:>10} {:>7}",
        "method", "max_error", "stored", "discarded", "merged", "truncated", "passes"
    );
    for r in &results {
        let b = r.report.backend;
        println!(
            "{:<18} {:>10.5} {:>10} {:>10} {:>10} {:>10} {:>7}",
            r.method.name(),
            r.max_error,
            b.fragments_stored,
            b.fragments_discarded,
            b.fragments_merged,
            b.fragments_truncated,
            b.geometry_passes
        );
    }
    Ok(())
}

fn cmd_complexity(args: ComplexityArgs) -> anyhow::Result<()> {
    let base = load_settings(&args.scene)?;
    let mut scene = load_scene(&args.scene, &base)?;
    let settings = OitSettings {
        method: OitMethod::DepthComplexity,
        ..base
    };
    let (target, report) = render_once(&args.scene, settings, &mut scene)?;
    let stats = report
        .complexity
        .context("depth complexity backend reported no statistics")?;

    println!("max fragments per pixel: {}", stats.max);
    println!("total fragments:         {}", stats.total_fragments);
    println!("touched pixels:          {}", stats.touched_pixels);
    println!("mean per touched pixel:  {:.3}", stats.mean);

    if let Some(out) = &args.out {
        ensure_parent(out)?;
        target.save_png(out)?;
        eprintln!("wrote {}", out.display());
    }
    Ok(())
}
