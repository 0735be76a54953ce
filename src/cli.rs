use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(
    name = "weldscan",
    version,
    about = "Radiographic weld inspection records and defect reports"
)]
pub struct Cli {
    /// Configuration file. Defaults to ./weldscan.toml when present.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    #[command(subcommand)]
    Owner(OwnerCommand),
    /// Store a radiograph for an owner and run detection on it.
    Upload(UploadArgs),
    /// Replace a radiograph with the operator's version and generate its report.
    Annotate(AnnotateArgs),
    /// Run detection again on an image's current version.
    Redetect(ImageArgs),
    /// Print the model detections recorded for an image.
    Detections(ImageArgs),
    Images(OwnerIdArgs),
    Reports(OwnerIdArgs),
    ExportImage(ExportArgs),
    ExportReport(ExportArgs),
    /// Print the defect catalog.
    Catalog,
    /// Print per-segment defect summaries for a rectangle file without storing anything.
    Summarize(SummarizeArgs),
}

#[derive(Subcommand, Debug)]
pub enum OwnerCommand {
    Create(CreateOwnerArgs),
    List,
    Show(OwnerIdArgs),
    /// Delete an owner with all images and reports.
    Delete(OwnerIdArgs),
}

#[derive(Args, Debug, Clone)]
pub struct CreateOwnerArgs {
    #[arg(long)]
    pub full_name: String,

    #[arg(long, default_value = "")]
    pub status: String,

    #[arg(long, default_value = "")]
    pub email: String,
}

#[derive(Args, Debug, Clone)]
pub struct OwnerIdArgs {
    pub owner_id: i64,
}

#[derive(Args, Debug, Clone)]
pub struct ImageArgs {
    pub owner_id: i64,
    pub filename: String,
}

#[derive(Args, Debug, Clone)]
pub struct UploadArgs {
    pub owner_id: i64,

    #[arg(value_name = "IMAGE")]
    pub image_path: PathBuf,

    #[arg(long, default_value = "image/png")]
    pub content_type: String,
}

#[derive(Args, Debug, Clone)]
pub struct AnnotateArgs {
    pub owner_id: i64,
    pub filename: String,

    #[arg(value_name = "IMAGE")]
    pub image_path: PathBuf,

    /// JSON list of `{x1, className}` rectangles.
    #[arg(long, value_name = "FILE")]
    pub defects: PathBuf,

    #[arg(long, default_value = "image/png")]
    pub content_type: String,
}

#[derive(Args, Debug, Clone)]
pub struct ExportArgs {
    pub owner_id: i64,
    pub filename: String,

    #[arg(short, long, value_name = "PATH")]
    pub out: PathBuf,
}

#[derive(Args, Debug, Clone)]
pub struct SummarizeArgs {
    #[arg(long, value_name = "FILE")]
    pub defects: PathBuf,
}
