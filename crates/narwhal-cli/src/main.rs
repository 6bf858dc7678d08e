use futures::executor::block_on;
use narwhal::config::ExportConfig;
use narwhal::controller::{DeliveryController, ExportOutcome};
use narwhal::document::VectorDocument;
use narwhal::engine::SvgMarkupEngine;
use narwhal::geometry::UsvgGeometryProbe;
use narwhal::raster::SvgImageLoader;
use narwhal::runtime::{self, EngineSettings};
use narwhal::size::{self, DefaultSize};
use narwhal::slots::{DirectorySaver, TracingStatusSink};
use serde::Serialize;
use std::io::Read;
use std::path::{Path, PathBuf};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug)]
enum CliError {
    Usage(&'static str),
    Io(std::io::Error),
    Config(narwhal::ConfigError),
    Document(narwhal::DocumentError),
    Render(narwhal::RenderError),
    Export(narwhal::ExportError),
    Json(serde_json::Error),
    /// No PNG was written; carries the reason and where the SVG went, if anywhere.
    NoRaster {
        message: String,
        vector: Option<String>,
    },
}

impl std::fmt::Display for CliError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CliError::Usage(msg) => write!(f, "{msg}"),
            CliError::Io(err) => write!(f, "I/O error: {err}"),
            CliError::Config(err) => write!(f, "{err}"),
            CliError::Document(err) => write!(f, "{err}"),
            CliError::Render(err) => write!(f, "{err}"),
            CliError::Export(err) => write!(f, "{err}"),
            CliError::Json(err) => write!(f, "JSON error: {err}"),
            CliError::NoRaster {
                message,
                vector: Some(path),
            } => write!(f, "{message}\nSVG written to {path}"),
            CliError::NoRaster {
                message,
                vector: None,
            } => write!(f, "{message}\nRe-run with --vector-fallback to save the SVG"),
        }
    }
}

impl From<std::io::Error> for CliError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<narwhal::ConfigError> for CliError {
    fn from(value: narwhal::ConfigError) -> Self {
        Self::Config(value)
    }
}

impl From<narwhal::DocumentError> for CliError {
    fn from(value: narwhal::DocumentError) -> Self {
        Self::Document(value)
    }
}

impl From<narwhal::RenderError> for CliError {
    fn from(value: narwhal::RenderError) -> Self {
        Self::Render(value)
    }
}

impl From<narwhal::ExportError> for CliError {
    fn from(value: narwhal::ExportError) -> Self {
        Self::Export(value)
    }
}

impl From<serde_json::Error> for CliError {
    fn from(value: serde_json::Error) -> Self {
        Self::Json(value)
    }
}

#[derive(Debug, Clone, Copy, Default)]
enum Command {
    #[default]
    Export,
    Size,
}

#[derive(Debug, Default)]
struct Args {
    command: Command,
    input: Option<String>,
    title: Option<String>,
    diagram_id: Option<String>,
    out_dir: Option<String>,
    scale: Option<f64>,
    margin: Option<f64>,
    config: Option<String>,
    vector_fallback: bool,
    pretty: bool,
}

#[derive(Serialize)]
struct SizeOut<'a> {
    width: f64,
    height: f64,
    viewport: &'a str,
    fallback: bool,
}

fn usage() -> &'static str {
    "narwhal-cli\n\
\n\
USAGE:\n\
  narwhal-cli [export] [--title <t>] [--id <diagram-id>] [--out-dir <dir>] [--scale <n>] [--margin <n>] [--config <json-path>] [--vector-fallback] [<path>|-]\n\
  narwhal-cli size [--pretty] [<path>|-]\n\
\n\
NOTES:\n\
  - If <path> is omitted or '-', SVG markup is read from stdin.\n\
  - export writes <title>.png into --out-dir (default: next to the input file, or the current directory for stdin).\n\
  - --title defaults to the input file stem; an empty title saves as diagram.png.\n\
  - If every rasterization method fails, --vector-fallback saves <title>.svg instead; the exit code stays non-zero.\n\
  - size prints the resolved export size as JSON.\n\
  - Set RUST_LOG (e.g. RUST_LOG=narwhal=debug) for progress and fallback details.\n\
"
}

fn parse_args(argv: &[String]) -> Result<Args, CliError> {
    let mut args = Args::default();

    let mut it = argv.iter().skip(1).peekable();
    while let Some(a) = it.next() {
        match a.as_str() {
            "--help" | "-h" => return Err(CliError::Usage(usage())),
            "export" => args.command = Command::Export,
            "size" => args.command = Command::Size,
            "--pretty" => args.pretty = true,
            "--vector-fallback" => args.vector_fallback = true,
            "--title" => {
                let Some(title) = it.next() else {
                    return Err(CliError::Usage(usage()));
                };
                args.title = Some(title.clone());
            }
            "--id" => {
                let Some(id) = it.next() else {
                    return Err(CliError::Usage(usage()));
                };
                args.diagram_id = Some(id.clone());
            }
            "--out-dir" => {
                let Some(dir) = it.next() else {
                    return Err(CliError::Usage(usage()));
                };
                args.out_dir = Some(dir.clone());
            }
            "--scale" => {
                let Some(scale) = it.next() else {
                    return Err(CliError::Usage(usage()));
                };
                let scale = scale.parse::<f64>().map_err(|_| CliError::Usage(usage()))?;
                if !(scale.is_finite() && scale > 0.0) {
                    return Err(CliError::Usage(usage()));
                }
                args.scale = Some(scale);
            }
            "--margin" => {
                let Some(margin) = it.next() else {
                    return Err(CliError::Usage(usage()));
                };
                args.margin = Some(margin.parse::<f64>().map_err(|_| CliError::Usage(usage()))?);
            }
            "--config" => {
                let Some(path) = it.next() else {
                    return Err(CliError::Usage(usage()));
                };
                args.config = Some(path.clone());
            }
            "--" => {
                if let Some(rest) = it.next() {
                    if args.input.is_some() {
                        return Err(CliError::Usage(usage()));
                    }
                    args.input = Some(rest.clone());
                }
                if it.next().is_some() {
                    return Err(CliError::Usage(usage()));
                }
            }
            other if other.starts_with('-') && other != "-" => {
                return Err(CliError::Usage(usage()));
            }
            path => {
                if args.input.is_some() {
                    return Err(CliError::Usage(usage()));
                }
                args.input = Some(path.to_string());
            }
        }
    }

    Ok(args)
}

fn read_input(input: Option<&str>) -> Result<String, CliError> {
    match input {
        None | Some("-") => {
            let mut buf = String::new();
            std::io::stdin().read_to_string(&mut buf)?;
            Ok(buf)
        }
        Some(path) => Ok(std::fs::read_to_string(path)?),
    }
}

fn file_input(input: Option<&str>) -> Option<&Path> {
    input.filter(|p| *p != "-").map(Path::new)
}

fn load_config(args: &Args) -> Result<ExportConfig, CliError> {
    let mut config = match args.config.as_deref() {
        Some(path) => ExportConfig::from_json_str(&std::fs::read_to_string(path)?)?,
        None => ExportConfig::default(),
    };
    if let Some(scale) = args.scale {
        config.scale = scale;
    }
    if let Some(margin) = args.margin {
        config.margin = margin;
    }
    config.validate()?;
    Ok(config)
}

fn export(args: &Args, markup: &str) -> Result<(), CliError> {
    let config = load_config(args)?;
    runtime::global().get_or_initialize(EngineSettings::default());

    let input = file_input(args.input.as_deref());
    let out_dir = match (&args.out_dir, input.and_then(Path::parent)) {
        (Some(dir), _) => PathBuf::from(dir),
        (None, Some(parent)) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    let title = args.title.clone().unwrap_or_else(|| {
        input
            .and_then(Path::file_stem)
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_default()
    });
    let diagram_id = args.diagram_id.clone().unwrap_or_else(|| "diagram".to_string());

    let mut controller = DeliveryController::new(
        diagram_id,
        SvgMarkupEngine,
        TracingStatusSink,
        DirectorySaver::new(out_dir),
    )
    .with_title(title)
    .try_with_config(config)?;

    block_on(controller.render(markup))?;
    match block_on(controller.trigger_export()) {
        ExportOutcome::Saved { location, .. } => {
            println!("{location}");
            Ok(())
        }
        ExportOutcome::VectorFallbackOffered { message } if args.vector_fallback => {
            let location = controller.on_secondary_export()?;
            println!("{location}");
            Err(CliError::NoRaster {
                message,
                vector: Some(location),
            })
        }
        ExportOutcome::VectorFallbackOffered { message }
        | ExportOutcome::SaveFailed { message } => Err(CliError::NoRaster {
            message,
            vector: None,
        }),
        ExportOutcome::NothingToExport => Err(CliError::Export(narwhal::ExportError::NoDocument)),
        ExportOutcome::Busy => Err(CliError::Usage("an export is already running")),
    }
}

fn print_size(args: &Args, markup: &str) -> Result<(), CliError> {
    let doc = VectorDocument::parse(markup)?;
    let probe = UsvgGeometryProbe::default().with_fontdb(SvgImageLoader::new().fontdb());
    let resolved = size::resolve(&doc, &probe, DefaultSize::default());
    let out = SizeOut {
        width: resolved.width,
        height: resolved.height,
        viewport: &resolved.viewport,
        fallback: resolved.used_fallback(),
    };
    if args.pretty {
        serde_json::to_writer_pretty(std::io::stdout().lock(), &out)?;
    } else {
        serde_json::to_writer(std::io::stdout().lock(), &out)?;
    }
    println!();
    Ok(())
}

fn run(args: Args) -> Result<(), CliError> {
    tracing::debug!(?args, "narwhal-cli");
    let markup = read_input(args.input.as_deref())?;
    match args.command {
        Command::Export => export(&args, &markup),
        Command::Size => print_size(&args, &markup),
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();
}

fn main() {
    let args = match parse_args(&std::env::args().collect::<Vec<_>>()) {
        Ok(v) => v,
        Err(CliError::Usage(msg)) => {
            eprintln!("{msg}");
            std::process::exit(2);
        }
        Err(err) => {
            eprintln!("{err}");
            std::process::exit(1);
        }
    };

    init_tracing();

    match run(args) {
        Ok(()) => {}
        Err(err @ CliError::NoRaster { .. }) => {
            eprintln!("{err}");
            std::process::exit(3);
        }
        Err(err) => {
            eprintln!("{err}");
            std::process::exit(1);
        }
    }
}
