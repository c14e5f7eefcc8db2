use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use splat_sort_viewer::camera::{Camera, load_presets};
use splat_sort_viewer::config::RenderConfig;
use splat_sort_viewer::gpu::{GpuContext, OffscreenTarget, ShaderCache, SplatRasterizer};
use splat_sort_viewer::png_writer::{save_png_rgba8, unpremultiply};
use splat_sort_viewer::scene::PackedScene;
use splat_sort_viewer::viewer;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "splat-sort-viewer")]
#[command(about = "Rasterize Gaussian splat scenes in GPU-sorted depth order")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct RenderArgs {
    /// Output width in pixels (defaults to the preset's, else 1280)
    #[arg(long)]
    width: Option<u32>,

    /// Output height in pixels (defaults to the preset's, else 720)
    #[arg(long)]
    height: Option<u32>,

    /// Multiplier applied to every splat's scale
    #[arg(long, default_value = "1.0")]
    scale_modifier: f32,
}

#[derive(Subcommand)]
enum Commands {
    /// Open an interactive window. Scenes can also be dropped onto it.
    View {
        scene: Option<PathBuf>,

        /// cameras.json written alongside the scene
        #[arg(short, long)]
        cameras: Option<PathBuf>,

        #[command(flatten)]
        render: RenderArgs,
    },

    /// Render one frame to a PNG without opening a window
    Render {
        scene: PathBuf,

        #[arg(short, long)]
        cameras: Option<PathBuf>,

        /// Index into the camera presets
        #[arg(long, default_value = "0")]
        camera: usize,

        #[arg(short, long, default_value = "render.png")]
        output: PathBuf,

        #[command(flatten)]
        render: RenderArgs,
    },

    /// Print point count and spherical harmonics degree of a scene
    Info { scene: PathBuf },
}

fn render_config(args: &RenderArgs, preset_size: Option<(u32, u32)>) -> RenderConfig {
    let defaults = RenderConfig::default();
    let (width, height) = preset_size.unwrap_or((defaults.width, defaults.height));
    RenderConfig {
        scale_modifier: args.scale_modifier,
        ..defaults
    }
    .with_size(args.width.unwrap_or(width), args.height.unwrap_or(height))
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::View {
            scene,
            cameras,
            render,
        } => {
            let presets = match cameras {
                Some(path) => load_presets(&path)
                    .with_context(|| format!("failed to read cameras from {}", path.display()))?,
                None => Vec::new(),
            };
            let config = render_config(&render, None);
            viewer::run(scene.as_deref(), presets, config)?;
        }

        Commands::Render {
            scene,
            cameras,
            camera,
            output,
            render,
        } => {
            let packed = PackedScene::load(&scene)
                .with_context(|| format!("failed to load {}", scene.display()))?;
            let presets = match cameras {
                Some(path) => load_presets(&path)
                    .with_context(|| format!("failed to read cameras from {}", path.display()))?,
                None => Vec::new(),
            };
            let (view, preset_size) = match presets.get(camera) {
                Some(preset) => (Camera::from_preset(preset), Some((preset.width, preset.height))),
                None if presets.is_empty() => (Camera::framing(packed.bounds), None),
                None => anyhow::bail!("camera {camera} out of range ({} presets)", presets.len()),
            };
            let config = render_config(&render, preset_size);

            let ctx = GpuContext::headless().context("no GPU available for headless rendering")?;
            let target = OffscreenTarget::new(&ctx, config.width, config.height);
            let mut cache = ShaderCache::new();
            let mut rasterizer =
                SplatRasterizer::new(&ctx, &packed, target.render_target(), &mut cache)?;
            rasterizer.render(&ctx, &view.uniform(&config), target.view())?;

            let mut rgba = target.read_rgba(&ctx)?;
            unpremultiply(&mut rgba);
            save_png_rgba8(&output, config.width, config.height, &rgba)
                .with_context(|| format!("failed to write {}", output.display()))?;
        }

        Commands::Info { scene } => {
            let packed = PackedScene::load(&scene)
                .with_context(|| format!("failed to load {}", scene.display()))?;
            println!("points:    {}", packed.num_points);
            println!("sh degree: {}", packed.sh_degree.get());
            if let Some((lo, hi)) = packed.bounds {
                println!("bounds:    {lo} .. {hi}");
            }
        }
    }
    Ok(())
}
