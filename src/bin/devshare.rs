use std::{
    collections::BTreeMap,
    fs::File,
    io::BufReader,
    path::{Path, PathBuf},
};

use anyhow::Context as _;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "devshare", version)]
struct Cli {
    /// Log filter used when `RUST_LOG` is unset.
    #[arg(long, global = true, default_value = "info")]
    log: String,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run a surface scenario against the headless device and write every painted frame as PNG.
    Paint(PaintArgs),
    /// Render one diagnostic frame as PNG.
    Fallback(FallbackArgs),
}

#[derive(Parser, Debug)]
struct PaintArgs {
    /// Input scenario JSON.
    #[arg(long)]
    scenario: PathBuf,

    /// Directory receiving one PNG per paint step.
    #[arg(long)]
    out_dir: PathBuf,
}

#[derive(Parser, Debug)]
struct FallbackArgs {
    /// Text drawn on the frame.
    #[arg(long, default_value = "Graphics device lost")]
    message: String,

    #[arg(long, default_value_t = 320)]
    width: u32,

    #[arg(long, default_value_t = 240)]
    height: u32,

    /// Font file for the message. Defaults to the system sans-serif face.
    #[arg(long)]
    font: Option<PathBuf>,

    /// Output PNG path.
    #[arg(long)]
    out: PathBuf,
}

#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct Scenario {
    device: devshare::HeadlessDeviceOpts,
    fallback: devshare::FallbackStyle,
    surfaces: Vec<SurfaceEntry>,
    steps: Vec<Step>,
}

#[derive(Debug, serde::Deserialize)]
struct SurfaceEntry {
    #[serde(flatten)]
    opts: devshare::SurfaceOpts,
    #[serde(default = "default_fill")]
    fill: devshare::Rgba8,
}

fn default_fill() -> devshare::Rgba8 {
    devshare::Rgba8::opaque(255, 255, 255)
}

#[derive(Clone, Copy, Debug, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
enum StatusArg {
    Ok,
    Lost,
    NotReset,
}

impl From<StatusArg> for devshare::RawDeviceStatus {
    fn from(s: StatusArg) -> Self {
        match s {
            StatusArg::Ok => Self::Ok,
            StatusArg::Lost => Self::Lost,
            StatusArg::NotReset => Self::NotReset,
        }
    }
}

#[derive(Debug, serde::Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
enum Step {
    Attach { surface: String },
    Detach { surface: String },
    Resize { surface: String, size: devshare::Size },
    Paint { surface: String },
    SetStatus { status: StatusArg },
    FailResets { message: Option<String> },
    FailPresents { message: Option<String> },
}

/// Clears its viewport to one color.
struct Fill {
    color: devshare::Rgba8,
}

impl devshare::SurfaceHooks for Fill {
    fn initialize(&mut self, ctx: &mut devshare::DrawContext<'_>) {
        tracing::debug!(size = %ctx.surface_size(), "surface initialized");
    }

    fn draw(&mut self, ctx: &mut devshare::DrawContext<'_>) {
        match ctx.downcast_device::<devshare::HeadlessDevice>() {
            Some(device) => device.clear(self.color),
            None => tracing::warn!("fill hook needs the headless device"),
        }
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli.log);
    match cli.cmd {
        Command::Paint(args) => cmd_paint(args),
        Command::Fallback(args) => cmd_fallback(args),
    }
}

fn init_tracing(default_filter: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn read_scenario_json(path: &Path) -> anyhow::Result<Scenario> {
    let f = File::open(path).with_context(|| format!("open scenario '{}'", path.display()))?;
    let r = BufReader::new(f);
    let scenario: Scenario = serde_json::from_reader(r).with_context(|| "parse scenario JSON")?;
    Ok(scenario)
}

fn cmd_paint(args: PaintArgs) -> anyhow::Result<()> {
    let scenario = read_scenario_json(&args.scenario)?;

    let probe = devshare::HeadlessProbe::new();
    let registry = devshare::DeviceRegistry::new(devshare::HeadlessDeviceFactory::new(
        scenario.device,
        probe.clone(),
    ));

    let mut surfaces = BTreeMap::new();
    for entry in scenario.surfaces {
        let label = entry.opts.label.clone();
        let fallback = devshare::FallbackRenderer::from_style(scenario.fallback.clone())
            .with_context(|| format!("fallback renderer for '{label}'"))?;
        let surface = devshare::Surface::new(entry.opts, Fill { color: entry.fill })
            .with_fallback(fallback);
        if surfaces.insert(label.clone(), surface).is_some() {
            anyhow::bail!("duplicate surface label '{label}'");
        }
    }

    std::fs::create_dir_all(&args.out_dir)
        .with_context(|| format!("create output dir '{}'", args.out_dir.display()))?;

    for (i, step) in scenario.steps.into_iter().enumerate() {
        tracing::debug!(step = i, ?step, "scenario step");
        match step {
            Step::Attach { surface } => {
                surface_mut(&mut surfaces, &surface)?
                    .attach(&registry)
                    .with_context(|| format!("step {i}: attach '{surface}'"))?;
            }
            Step::Detach { surface } => surface_mut(&mut surfaces, &surface)?.detach(),
            Step::Resize { surface, size } => {
                surface_mut(&mut surfaces, &surface)?
                    .resize(size)
                    .with_context(|| format!("step {i}: resize '{surface}'"))?;
            }
            Step::SetStatus { status } => probe.set_status(status.into()),
            Step::FailResets { message } => probe.fail_resets(message),
            Step::FailPresents { message } => probe.fail_presents(message),
            Step::Paint { surface } => {
                let s = surface_mut(&mut surfaces, &surface)?;
                let frame = match s.paint() {
                    devshare::PaintOutcome::Drawn { present, .. } => {
                        eprintln!("step {i}: '{surface}' drawn ({present:?})");
                        probe.last_frame(s.opts().target).filter(|_| {
                            present == devshare::PresentOutcome::Submitted
                        })
                    }
                    devshare::PaintOutcome::Fallback(fb) => {
                        eprintln!(
                            "step {i}: '{surface}' fallback: {}",
                            fb.message.replace('\n', " ")
                        );
                        Some(fb.frame)
                    }
                };
                if let Some(frame) = frame {
                    let out = args.out_dir.join(format!("{i:03}_{surface}.png"));
                    write_png(&out, &frame)?;
                }
            }
        }
    }

    eprintln!(
        "done: owners={} devices_created={} disposed={}",
        registry.owner_count(),
        probe.created_count(),
        probe.disposed_count()
    );
    Ok(())
}

fn surface_mut<'a>(
    surfaces: &'a mut BTreeMap<String, devshare::Surface<Fill>>,
    label: &str,
) -> anyhow::Result<&'a mut devshare::Surface<Fill>> {
    surfaces
        .get_mut(label)
        .with_context(|| format!("unknown surface '{label}'"))
}

fn cmd_fallback(args: FallbackArgs) -> anyhow::Result<()> {
    let style = devshare::FallbackStyle {
        font_path: args.font,
        ..devshare::FallbackStyle::default()
    };
    let mut renderer = devshare::FallbackRenderer::from_style(style)?;
    let frame = renderer.render(devshare::Size::new(args.width, args.height), &args.message);
    write_png(&args.out, &frame)
}

fn write_png(out: &Path, frame: &devshare::FrameRGBA) -> anyhow::Result<()> {
    if frame.size().is_empty() {
        eprintln!("skipped empty frame {}", out.display());
        return Ok(());
    }
    if let Some(parent) = out.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("create output dir '{}'", parent.display()))?;
    }

    image::save_buffer_with_format(
        out,
        &frame.data,
        frame.width,
        frame.height,
        image::ColorType::Rgba8,
        image::ImageFormat::Png,
    )
    .with_context(|| format!("write png '{}'", out.display()))?;

    eprintln!("wrote {}", out.display());
    Ok(())
}
