//! texmap CLI: prepare PBR texture sets for a target engine

use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use std::path::{Path, PathBuf};
use texmap_core::convert::{self, NORMAL_FORMAT_THRESHOLD};
use texmap_core::map_type::swap_normal_suffix;
use texmap_core::{
    base_texture_name, default_config_path, group_textures_by_set, ImageLoader, MapFactory,
    MapType, NormalFormat, PrepareReport, WorkflowConfig, WorkflowPreset,
};
use tracing::{debug, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser)]
#[command(name = "texmap")]
#[command(about = "Resolve, convert and pack PBR texture maps for game engines.")]
#[command(version = concat!("v", env!("CARGO_PKG_VERSION")))]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file (TOML or JSON). Defaults to $TEXMAP_CONFIG or ~/.config/texmap/config.toml
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Disable colored output
    #[arg(long, global = true)]
    no_color: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Prepare texture sets for a workflow (files or folders)
    Prepare(PrepareArgs),
    /// Flip a normal map between OpenGL and DirectX
    Convert {
        /// Normal map to convert
        input: PathBuf,
        /// Target format: OpenGL or DirectX. Default: the opposite of the input
        #[arg(long)]
        to: Option<NormalFormat>,
        /// Output file (default: input name with the format suffix swapped)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Show how files are classified and grouped into texture sets
    Classify {
        /// Texture files or folders
        #[arg(value_name = "PATH", num_args = 1..)]
        inputs: Vec<PathBuf>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// List engine presets
    Presets {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Args, Debug, Default)]
struct PrepareArgs {
    /// Texture files or folders
    #[arg(value_name = "PATH", num_args = 1..)]
    inputs: Vec<PathBuf>,
    /// Output folder (default: next to each set's inputs)
    #[arg(short, long)]
    output: Option<PathBuf>,
    /// Engine preset: standard, unity_urp, unity_hdrp, unreal, gltf, godot, specular_glossiness
    #[arg(long)]
    preset: Option<WorkflowPreset>,
    /// Pack occlusion, roughness and metallic into one ORM map
    #[arg(long)]
    orm: bool,
    /// Build a Unity HDRP mask map
    #[arg(long)]
    mask_map: bool,
    /// Pack smoothness into the metallic alpha (Unity URP)
    #[arg(long)]
    metallic_smoothness: bool,
    /// Pack opacity into the base colour alpha
    #[arg(long)]
    albedo_transparency: bool,
    /// Normal map format: OpenGL or DirectX
    #[arg(long)]
    normal_type: Option<NormalFormat>,
    /// Output file extension (png, jpg, tga, ...)
    #[arg(long)]
    ext: Option<String>,
    /// Limit the longest edge of written maps
    #[arg(long)]
    max_size: Option<u32>,
    /// Convert specular/glossiness sources to metallic/roughness first
    #[arg(long)]
    specgloss: bool,
    /// Black out base colour on metal
    #[arg(long)]
    cleanup_base_color: bool,
    /// Write canonical {base}_{Type} names even when no conversion is needed
    #[arg(long)]
    rename: bool,
    /// Decide everything but write nothing
    #[arg(long)]
    dry_run: bool,
    /// Rewrite outputs that are newer than their sources
    #[arg(long)]
    force: bool,
    /// Only use existing maps; never convert
    #[arg(long)]
    no_convert: bool,
    /// Do not substitute related maps for missing inputs
    #[arg(long)]
    no_input_fallbacks: bool,
    /// Do not write components when a packed map cannot be built
    #[arg(long)]
    no_output_fallbacks: bool,
    /// Treat all inputs as one texture set
    #[arg(long)]
    no_group: bool,
    /// Texture sets processed in parallel
    #[arg(short = 'j', long)]
    workers: Option<usize>,
    /// Output the run report as JSON
    #[arg(long)]
    json: bool,
    /// Write the run report (JSON) to a file
    #[arg(long)]
    report: Option<PathBuf>,
}

#[derive(Debug, Serialize)]
struct ClassifiedSet {
    base_name: String,
    maps: Vec<ClassifiedFile>,
}

#[derive(Debug, Serialize)]
struct ClassifiedFile {
    path: PathBuf,
    map_type: Option<MapType>,
}

#[derive(Debug, Serialize)]
struct PresetInfo {
    name: &'static str,
    description: &'static str,
    config: WorkflowConfig,
}

fn main() {
    if let Err(e) = run() {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn run() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let log_level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_ansi(!cli.no_color)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    match cli.command {
        Commands::Prepare(args) => cmd_prepare(&args, cli.config.as_deref()),
        Commands::Convert { input, to, output } => cmd_convert(&input, to, output.as_deref()),
        Commands::Classify { inputs, json } => cmd_classify(&inputs, json),
        Commands::Presets { json } => cmd_presets(json),
    }
}

/// Config file (explicit or default location), then preset, then flags.
fn build_config(args: &PrepareArgs, config_path: Option<&Path>) -> Result<WorkflowConfig, Box<dyn std::error::Error>> {
    let mut config = match config_path.map(Path::to_path_buf).or_else(default_config_path) {
        Some(path) => {
            debug!("Loading config from {}", path.display());
            WorkflowConfig::load(&path)?
        }
        None => WorkflowConfig::default(),
    };
    if let Some(preset) = args.preset {
        config = preset.apply(config);
    }

    config.orm_map |= args.orm;
    config.mask_map |= args.mask_map;
    config.metallic_smoothness |= args.metallic_smoothness;
    config.albedo_transparency |= args.albedo_transparency;
    config.convert_specgloss_to_pbr |= args.specgloss;
    config.cleanup_base_color |= args.cleanup_base_color;
    config.rename |= args.rename;
    config.dry_run |= args.dry_run;
    config.force |= args.force;
    if args.no_convert {
        config.convert = false;
    }
    if args.no_input_fallbacks {
        config.use_input_fallbacks = false;
    }
    if args.no_output_fallbacks {
        config.use_output_fallbacks = false;
    }
    if args.no_group {
        config.group_by_set = false;
    }
    if let Some(normal_type) = args.normal_type {
        config.normal_type = normal_type;
    }
    if let Some(ext) = &args.ext {
        config.output_extension = ext.trim_start_matches('.').to_lowercase();
    }
    if args.max_size.is_some() {
        config.max_size = args.max_size;
    }
    if let Some(workers) = args.workers {
        config.max_workers = workers;
    }
    config.validate()?;
    Ok(config)
}

fn collect_inputs(inputs: &[PathBuf]) -> Result<Vec<PathBuf>, Box<dyn std::error::Error>> {
    let mut files = Vec::new();
    for input in inputs {
        if !input.exists() {
            return Err(format!("Not found: {}", input.display()).into());
        }
        files.extend(MapFactory::collect_files(input)?);
    }
    if files.is_empty() {
        return Err("No texture files found".into());
    }
    Ok(files)
}

fn cmd_prepare(args: &PrepareArgs, config_path: Option<&Path>) -> Result<(), Box<dyn std::error::Error>> {
    let config = build_config(args, config_path)?;
    let files = collect_inputs(&args.inputs)?;

    let sets = MapFactory::prepare_sets(&files, &config, args.output.as_deref(), None);
    let report = PrepareReport::new(&config, args.output.as_deref(), sets);

    if let Some(path) = &args.report {
        report.write(path)?;
    }

    if args.json {
        println!("{}", report.to_json()?);
    } else {
        for set in &report.sets {
            match &set.error {
                Some(e) => println!("✗ {}: {}", set.base_name, e),
                None => println!("✓ {}: {} map(s)", set.base_name, set.outputs.len()),
            }
            for output in &set.outputs {
                println!("    {}", output.display());
            }
        }
        let suffix = if config.dry_run { " (dry run)" } else { "" };
        println!(
            "Prepared {} map(s) from {} texture set(s){}",
            report.output_count,
            report.sets.len(),
            suffix
        );
    }

    let failed = report.failed_sets().count();
    if failed > 0 {
        return Err(format!("{} texture set(s) failed", failed).into());
    }
    Ok(())
}

/// Output path for a converted normal map: the format suffix swapped, or
/// the canonical suffix appended when the input has none.
fn converted_path(input: &Path, source_type: Option<MapType>, to: NormalFormat) -> PathBuf {
    let stem = input.file_stem().and_then(|s| s.to_str()).unwrap_or("normal");
    let ext = input.extension().and_then(|e| e.to_str()).unwrap_or("png");
    let new_stem = match source_type {
        Some(from @ (MapType::NormalOpenGl | MapType::NormalDirectX)) => {
            swap_normal_suffix(stem, from, to.map_type())
        }
        _ => format!("{}_{}", base_texture_name(input), to.map_type().name()),
    };
    input.with_file_name(format!("{}.{}", new_stem, ext))
}

fn cmd_convert(input: &Path, to: Option<NormalFormat>, output: Option<&Path>) -> Result<(), Box<dyn std::error::Error>> {
    let image = ImageLoader::load(input)?;
    let source_type = MapType::from_path(input);
    let from = match source_type {
        Some(MapType::NormalOpenGl) => NormalFormat::OpenGl,
        Some(MapType::NormalDirectX) => NormalFormat::DirectX,
        _ => convert::detect_normal_format(&image, NORMAL_FORMAT_THRESHOLD)
            .ok_or("Cannot tell whether this is an OpenGL or DirectX normal map; use a _GL or _DX suffix")?,
    };
    let to = to.unwrap_or_else(|| from.opposite());
    if to == from {
        return Err(format!("{} is already a {} normal map", input.display(), to).into());
    }

    let output = match output {
        Some(path) => path.to_path_buf(),
        None => converted_path(input, source_type, to),
    };
    ImageLoader::save(&convert::flip_green(&image), &output)?;
    println!("Converted {} ({}) → {} ({})", input.display(), from, output.display(), to);
    Ok(())
}

fn cmd_classify(inputs: &[PathBuf], json: bool) -> Result<(), Box<dyn std::error::Error>> {
    let files = collect_inputs(inputs)?;
    let sets: Vec<ClassifiedSet> = group_textures_by_set(&files)
        .into_iter()
        .map(|(base_name, paths)| ClassifiedSet {
            base_name,
            maps: paths
                .into_iter()
                .map(|path| ClassifiedFile {
                    map_type: MapType::from_path(&path),
                    path,
                })
                .collect(),
        })
        .collect();

    if json {
        println!("{}", serde_json::to_string_pretty(&sets)?);
        return Ok(());
    }
    for set in &sets {
        println!("{}", set.base_name);
        for file in &set.maps {
            let name = file
                .path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            match file.map_type {
                Some(map_type) => println!("    {:<40} {}", name, map_type),
                None => println!("    {:<40} (unrecognised)", name),
            }
        }
    }
    Ok(())
}

fn cmd_presets(json: bool) -> Result<(), Box<dyn std::error::Error>> {
    if json {
        let presets: Vec<PresetInfo> = WorkflowPreset::ALL
            .iter()
            .map(|p| PresetInfo {
                name: p.name(),
                description: p.description(),
                config: p.config(),
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&presets)?);
        return Ok(());
    }
    for preset in WorkflowPreset::ALL {
        println!("{:<22} {}", preset.name(), preset.description());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GrayImage, Luma, Rgb, RgbImage};

    fn parse_prepare(argv: &[&str]) -> PrepareArgs {
        let mut full = vec!["texmap", "prepare"];
        full.extend_from_slice(argv);
        match Cli::try_parse_from(full).unwrap().command {
            Commands::Prepare(args) => args,
            _ => panic!("expected prepare"),
        }
    }

    #[test]
    fn flags_override_preset() {
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join("texmap.toml");
        std::fs::write(&config_path, "max_size = 2048\nnormal_type = \"OpenGL\"\n").unwrap();

        let args = parse_prepare(&[
            "tex",
            "--preset",
            "unreal",
            "--normal-type",
            "OpenGL",
            "--ext",
            ".TGA",
            "-j",
            "4",
        ]);
        let config = build_config(&args, Some(&config_path)).unwrap();
        assert!(config.orm_map && config.albedo_transparency);
        assert_eq!(config.normal_type, NormalFormat::OpenGl);
        assert_eq!(config.output_extension, "tga");
        assert_eq!(config.max_size, Some(2048));
        assert_eq!(config.max_workers, 4);
    }

    #[test]
    fn invalid_flag_values_are_rejected() {
        assert!(Cli::try_parse_from(["texmap", "prepare", "x", "--preset", "cryengine"]).is_err());
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join("texmap.toml");
        std::fs::write(&config_path, "").unwrap();
        let args = parse_prepare(&["x", "-j", "0"]);
        assert!(build_config(&args, Some(&config_path)).is_err());
    }

    #[test]
    fn prepare_writes_report() {
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join("texmap.toml");
        std::fs::write(&config_path, "").unwrap();
        let textures = dir.path().join("textures");
        std::fs::create_dir_all(&textures).unwrap();
        GrayImage::from_pixel(4, 4, Luma([200]))
            .save(textures.join("Crate_Smoothness.png"))
            .unwrap();
        RgbImage::from_pixel(4, 4, Rgb([90, 60, 30]))
            .save(textures.join("Crate_BaseColor.png"))
            .unwrap();

        let out = dir.path().join("out");
        let report_path = dir.path().join("report.json");
        let args = PrepareArgs {
            inputs: vec![textures.clone()],
            output: Some(out.clone()),
            rename: true,
            report: Some(report_path.clone()),
            ..PrepareArgs::default()
        };
        cmd_prepare(&args, Some(&config_path)).unwrap();

        assert!(out.join("Crate_Base_Color.png").exists());
        assert!(out.join("Crate_Roughness.png").exists());
        let report: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&report_path).unwrap()).unwrap();
        assert_eq!(report["output_count"], 2);
        assert_eq!(report["sets"][0]["base_name"], "Crate");
    }

    #[test]
    fn prepare_fails_on_missing_input() {
        let args = PrepareArgs {
            inputs: vec![PathBuf::from("/definitely/not/here")],
            ..PrepareArgs::default()
        };
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join("texmap.toml");
        std::fs::write(&config_path, "").unwrap();
        assert!(cmd_prepare(&args, Some(&config_path)).is_err());
    }

    #[test]
    fn prepare_fails_when_a_set_fails() {
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join("texmap.toml");
        std::fs::write(&config_path, "").unwrap();
        let input = dir.path().join("Crate_Roughness.png");
        GrayImage::from_pixel(4, 4, Luma([40])).save(&input).unwrap();
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, "").unwrap();

        let args = PrepareArgs {
            inputs: vec![input],
            output: Some(blocker.join("out")),
            ..PrepareArgs::default()
        };
        let err = cmd_prepare(&args, Some(&config_path)).unwrap_err();
        assert_eq!(err.to_string(), "1 texture set(s) failed");
    }

    #[test]
    fn convert_flips_named_normal() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("brick_GL.png");
        RgbImage::from_pixel(4, 4, Rgb([128, 40, 255])).save(&input).unwrap();

        cmd_convert(&input, None, None).unwrap();
        let output = dir.path().join("brick_DX.png");
        let flipped = image::open(&output).unwrap().to_rgb8();
        assert_eq!(flipped.get_pixel(0, 0).0, [128, 215, 255]);

        assert!(cmd_convert(&input, Some(NormalFormat::OpenGl), None).is_err());
    }

    #[test]
    fn converted_path_for_generic_names() {
        assert_eq!(
            converted_path(Path::new("t/wall_Normal.png"), Some(MapType::Normal), NormalFormat::DirectX),
            PathBuf::from("t/wall_Normal_DirectX.png")
        );
        assert_eq!(
            converted_path(Path::new("t/wall_NormalGL.tga"), Some(MapType::NormalOpenGl), NormalFormat::DirectX),
            PathBuf::from("t/wall_NormalDX.tga")
        );
    }

    #[test]
    fn classify_and_presets_run() {
        let dir = tempfile::tempdir().unwrap();
        GrayImage::from_pixel(2, 2, Luma([1])).save(dir.path().join("a_AO.png")).unwrap();
        assert!(cmd_classify(&[dir.path().to_path_buf()], true).is_ok());
        assert!(cmd_classify(&[dir.path().to_path_buf()], false).is_ok());
        assert!(cmd_presets(true).is_ok());
    }
}
