use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum, ValueHint, builder::BoolishValueParser};

use crate::domain::options::{OutputFormat, PdfStandard};

/// Command-line arguments for the pressroom binary.
#[derive(Debug, Parser)]
#[command(
    name = "pressroom",
    version,
    about = "Photobook render pipeline: previews, proofs and print-ready PDFs"
)]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(long = "config-file", env = "PRESSROOM_CONFIG_FILE", value_name = "PATH")]
    pub config_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Run the HTTP service and the job workers.
    Serve(Box<ServeArgs>),
    /// Render a single page model to an image or PDF file.
    Preview(PreviewArgs),
    /// Compose a print-ready PDF from a project file.
    Compose(ComposeArgs),
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeArgs {
    #[command(flatten)]
    pub overrides: ServeOverrides,
}

#[derive(Debug, Args, Default, Clone)]
pub struct RenderOverrides {
    /// Override the Chromium executable used for rendering.
    #[arg(long = "render-chrome-executable", value_name = "PATH")]
    pub chrome_executable: Option<PathBuf>,

    /// Launch Chromium without its sandbox (containers without user namespaces).
    #[arg(
        long = "render-no-sandbox",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub no_sandbox: Option<bool>,
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeOverrides {
    #[command(flatten)]
    pub render: RenderOverrides,

    /// Override the listener host.
    #[arg(long = "server-host", value_name = "HOST")]
    pub server_host: Option<String>,

    /// Override the listener port.
    #[arg(long = "server-port", value_name = "PORT")]
    pub server_port: Option<u16>,

    /// Override the graceful shutdown timeout.
    #[arg(long = "server-graceful-shutdown-seconds", value_name = "SECONDS")]
    pub server_graceful_shutdown_seconds: Option<u64>,

    /// Override the base log level (trace|debug|info|warn|error).
    #[arg(long = "log-level", value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Toggle JSON logging.
    #[arg(
        long = "log-json",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub log_json: Option<bool>,

    /// Override the blob storage directory.
    #[arg(long = "storage-root", value_name = "PATH")]
    pub storage_root: Option<PathBuf>,

    /// Override the public base URL blobs are served under.
    #[arg(long = "storage-public-base-url", value_name = "URL")]
    pub storage_public_base_url: Option<String>,

    /// Override the project documents directory.
    #[arg(long = "projects-root", value_name = "PATH")]
    pub projects_root: Option<PathBuf>,

    /// Toggle the preview cache.
    #[arg(
        long = "cache-enabled",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub cache_enabled: Option<bool>,

    /// Override the preview worker count.
    #[arg(long = "jobs-preview-concurrency", value_name = "COUNT")]
    pub jobs_preview_concurrency: Option<u32>,

    /// Override the final-render worker count.
    #[arg(long = "jobs-final-concurrency", value_name = "COUNT")]
    pub jobs_final_concurrency: Option<u32>,

    /// Override the production worker count.
    #[arg(long = "jobs-production-concurrency", value_name = "COUNT")]
    pub jobs_production_concurrency: Option<u32>,

    /// Override the 3D texture worker count.
    #[arg(long = "jobs-render-3d-concurrency", value_name = "COUNT")]
    pub jobs_render_3d_concurrency: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum FormatArg {
    Png,
    Jpeg,
    Pdf,
}

impl From<FormatArg> for OutputFormat {
    fn from(value: FormatArg) -> Self {
        match value {
            FormatArg::Png => OutputFormat::Png,
            FormatArg::Jpeg => OutputFormat::Jpeg,
            FormatArg::Pdf => OutputFormat::Pdf,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum StandardArg {
    #[value(name = "x1a")]
    X1a,
    #[value(name = "x3")]
    X3,
    #[value(name = "x4")]
    X4,
}

impl From<StandardArg> for PdfStandard {
    fn from(value: StandardArg) -> Self {
        match value {
            StandardArg::X1a => PdfStandard::PdfX1a,
            StandardArg::X3 => PdfStandard::PdfX3,
            StandardArg::X4 => PdfStandard::PdfX4,
        }
    }
}

#[derive(Debug, Args, Clone)]
pub struct PreviewArgs {
    #[command(flatten)]
    pub render: RenderOverrides,

    /// Page model as JSON.
    #[arg(long, value_name = "FILE", value_hint = ValueHint::FilePath)]
    pub page: PathBuf,

    /// Where to write the rendered output.
    #[arg(long, value_name = "FILE", value_hint = ValueHint::FilePath)]
    pub out: PathBuf,

    #[arg(long, default_value_t = 150)]
    pub dpi: u32,

    #[arg(long, value_enum, default_value_t = FormatArg::Png)]
    pub format: FormatArg,

    /// JPEG quality, 1 to 100.
    #[arg(long, default_value_t = 90)]
    pub quality: u8,
}

#[derive(Debug, Args, Clone)]
pub struct ComposeArgs {
    #[command(flatten)]
    pub render: RenderOverrides,

    /// Override the directory scanned for embeddable fonts.
    #[arg(long = "production-font-dir", value_name = "PATH")]
    pub font_dir: Option<PathBuf>,

    /// Project document as JSON (pages, title and product format).
    #[arg(long, value_name = "FILE", value_hint = ValueHint::FilePath)]
    pub pages: PathBuf,

    /// Where to write the composed PDF.
    #[arg(long, value_name = "FILE", value_hint = ValueHint::FilePath)]
    pub out: PathBuf,

    #[arg(long, default_value_t = 300)]
    pub dpi: u32,

    /// Add bleed of this many millimetres on every side.
    #[arg(long = "bleed-mm", value_name = "MM")]
    pub bleed_mm: Option<f64>,

    #[arg(long = "crop-marks", action = clap::ArgAction::SetTrue)]
    pub crop_marks: bool,

    /// Convert colour to CMYK.
    #[arg(long, action = clap::ArgAction::SetTrue)]
    pub cmyk: bool,

    #[arg(long, value_enum)]
    pub standard: Option<StandardArg>,

    /// Fail instead of warning when the output does not pass its checks.
    #[arg(long, action = clap::ArgAction::SetTrue)]
    pub strict: bool,

    /// Also write a JDF job ticket to this path.
    #[arg(long = "job-ticket", value_name = "FILE", value_hint = ValueHint::FilePath)]
    pub job_ticket: Option<PathBuf>,
}
