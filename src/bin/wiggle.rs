use std::path::PathBuf;

use anyhow::Context as _;
use clap::{Args, Parser, Subcommand};
use wiggle::{
    Background, Bitmap, ConfigUpdate, DisplacementConfig, Engine, EngineOpts, FfmpegSink,
    FfmpegSinkOpts, PngSequenceSink, Rgba8,
};

#[derive(Parser, Debug)]
#[command(name = "wiggle", version)]
struct Cli {
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Render a single frame at a given loop phase as a PNG.
    Frame(FrameArgs),
    /// Export the full loop as a video (requires `ffmpeg` on PATH).
    Video(VideoArgs),
    /// Export the full loop as a zip archive of PNG stills.
    Frames(FramesArgs),
}

#[derive(Args, Debug)]
struct CommonArgs {
    /// Input image (any raster format the `image` crate decodes).
    #[arg(long = "in")]
    in_path: PathBuf,

    /// Optional JSON parameter file; flags below override its values.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Displacement magnitude in pixels (0-12).
    #[arg(long)]
    amount: Option<f64>,

    /// Noise feature size (2-80).
    #[arg(long)]
    size: Option<f64>,

    /// Fractal octave count (1-6).
    #[arg(long)]
    octaves: Option<u32>,

    /// Time-path radius in noise space (0-3).
    #[arg(long)]
    speed: Option<f64>,

    /// Noise-domain offset.
    #[arg(long)]
    seed: Option<f64>,

    /// Edge-mask strength (0-1).
    #[arg(long)]
    edge_strength: Option<f64>,

    /// Alpha-gradient edge threshold (0-1).
    #[arg(long)]
    edge_threshold: Option<f64>,

    /// Loop duration in seconds (2-6).
    #[arg(long = "loop")]
    loop_secs: Option<f64>,

    /// Output frame rate.
    #[arg(long)]
    fps: Option<f64>,

    /// Posterize steps per second (0-24, 0 = off).
    #[arg(long)]
    posterize: Option<f64>,

    /// Background: "transparent" or a hex color like "#1a2b3c".
    #[arg(long)]
    background: Option<String>,
}

#[derive(Args, Debug)]
struct FrameArgs {
    #[command(flatten)]
    common: CommonArgs,

    /// Loop phase in [0, 1).
    #[arg(long, default_value_t = 0.0)]
    phase: f64,

    /// Output PNG path.
    #[arg(long)]
    out: PathBuf,
}

#[derive(Args, Debug)]
struct VideoArgs {
    #[command(flatten)]
    common: CommonArgs,

    /// Output container path (.webm for alpha, .mp4 otherwise).
    #[arg(long)]
    out: PathBuf,
}

#[derive(Args, Debug)]
struct FramesArgs {
    #[command(flatten)]
    common: CommonArgs,

    /// Output zip archive path.
    #[arg(long)]
    out: PathBuf,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    match cli.cmd {
        Command::Frame(args) => cmd_frame(args),
        Command::Video(args) => cmd_video(args),
        Command::Frames(args) => cmd_frames(args),
    }
}

fn cmd_frame(args: FrameArgs) -> anyhow::Result<()> {
    let (engine, _cfg) = build_engine(&args.common)?;
    let frame = engine.render_at(args.phase)?;
    image::save_buffer(
        &args.out,
        &frame.data,
        frame.width,
        frame.height,
        image::ExtendedColorType::Rgba8,
    )
    .with_context(|| format!("failed to write '{}'", args.out.display()))?;
    println!("wrote {}", args.out.display());
    Ok(())
}

fn cmd_video(args: VideoArgs) -> anyhow::Result<()> {
    let (engine, cfg) = build_engine(&args.common)?;
    let mut opts = FfmpegSinkOpts::new(&args.out);
    if let Background::Opaque { color } = cfg.background {
        opts.bg_rgba = [color.r, color.g, color.b, color.a];
    }
    let mut sink = FfmpegSink::new(opts);
    let stats = engine.export_frames(cfg.export_frame_count(), &mut sink)?;
    if stats.alpha_degraded {
        eprintln!("note: alpha-capable encoder unavailable; wrote opaque video");
    }
    println!(
        "wrote {} ({} frames at {} fps)",
        sink.out_path().display(),
        stats.frames_encoded,
        cfg.fps
    );
    Ok(())
}

fn cmd_frames(args: FramesArgs) -> anyhow::Result<()> {
    let (engine, cfg) = build_engine(&args.common)?;
    let file = std::fs::File::create(&args.out)
        .with_context(|| format!("failed to create '{}'", args.out.display()))?;
    let mut sink = PngSequenceSink::new(file);
    let stats = engine.export_frames(cfg.export_frame_count(), &mut sink)?;
    println!(
        "wrote {} ({} stills)",
        args.out.display(),
        stats.frames_encoded
    );
    Ok(())
}

fn build_engine(common: &CommonArgs) -> anyhow::Result<(Engine, DisplacementConfig)> {
    let base = match &common.config {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read '{}'", path.display()))?;
            serde_json::from_str::<DisplacementConfig>(&text)
                .with_context(|| format!("invalid config '{}'", path.display()))?
        }
        None => DisplacementConfig::default(),
    };

    let update = ConfigUpdate {
        amount_px: common.amount,
        size: common.size,
        octaves: common.octaves,
        speed: common.speed,
        seed: common.seed,
        edge_strength: common.edge_strength,
        edge_threshold: common.edge_threshold,
        loop_duration_secs: common.loop_secs,
        fps: common.fps,
        posterize: common.posterize,
        background: common
            .background
            .as_deref()
            .map(parse_background)
            .transpose()?,
    };
    let cfg = update.apply(&base)?;

    let img = image::open(&common.in_path)
        .with_context(|| format!("failed to decode '{}'", common.in_path.display()))?
        .into_rgba8();
    let (w, h) = img.dimensions();
    let bitmap = Bitmap::from_rgba8(w, h, img.into_raw())?;

    // Batch tool: no live preview thread.
    let engine = Engine::with_opts(
        cfg.clone(),
        EngineOpts {
            refresh_hz: 60.0,
            live_preview: false,
        },
    )?;
    engine.load_bitmap(&bitmap)?;
    Ok((engine, cfg))
}

fn parse_background(s: &str) -> anyhow::Result<Background> {
    if s.eq_ignore_ascii_case("transparent") {
        return Ok(Background::Transparent);
    }
    let hex = s.strip_prefix('#').unwrap_or(s);
    if hex.len() != 6 || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
        anyhow::bail!("background must be 'transparent' or a hex color like '#1a2b3c'");
    }
    let channel = |i: usize| u8::from_str_radix(&hex[i..i + 2], 16);
    Ok(Background::Opaque {
        color: Rgba8 {
            r: channel(0)?,
            g: channel(2)?,
            b: channel(4)?,
            a: 255,
        },
    })
}
