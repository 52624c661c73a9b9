use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use pdf_raster::{ConverterConfig, PdfToImageConverter, SourceDocument};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Rasterize the first page of a PDF into a PNG.
#[derive(Parser, Debug)]
#[command(name = "pdf-raster", version)]
struct Args {
    /// PDF file to convert
    input: PathBuf,

    /// Directory the PNG is written to
    #[arg(short, long, default_value = ".")]
    out_dir: PathBuf,

    /// JSON config file (defaults come from the environment)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Print the conversion report as JSON
    #[arg(long)]
    json: bool,

    /// Print the PNG as a `data:` URL instead of writing it to disk
    #[arg(long, conflicts_with = "json")]
    data_url: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "pdf_raster=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    dotenvy::dotenv().ok();
    let args = Args::parse();

    let configured;
    let converter = match &args.config {
        Some(path) => match ConverterConfig::from_json_file(path) {
            Ok(config) => {
                configured = PdfToImageConverter::new(config);
                &configured
            }
            Err(e) => {
                tracing::error!(path = %path.display(), "{}", e);
                return ExitCode::FAILURE;
            }
        },
        None => PdfToImageConverter::shared(),
    };

    let result = converter.convert(SourceDocument::from_path(&args.input)).await;

    if args.data_url {
        return match result.image() {
            Some(image) => {
                println!("{}", image.file.to_data_url());
                converter.blobs().revoke_object_url(&image.image_url);
                ExitCode::SUCCESS
            }
            None => {
                if let Some(error) = result.error() {
                    eprintln!("error: {}", error.message);
                }
                ExitCode::FAILURE
            }
        };
    }

    let mut written = None;
    if let Some(image) = result.image() {
        match image.file.write_to_dir(&args.out_dir).await {
            Ok(path) => written = Some(path),
            Err(e) => {
                tracing::error!(dir = %args.out_dir.display(), "Failed to write image: {}", e);
                return ExitCode::FAILURE;
            }
        }
        // The file is on disk now; the in-memory blob is no longer needed.
        converter.blobs().revoke_object_url(&image.image_url);
    }

    let report = result.into_report();
    if args.json {
        match serde_json::to_string_pretty(&report) {
            Ok(json) => println!("{json}"),
            Err(e) => tracing::error!("Failed to serialize report: {}", e),
        }
    } else if let Some(error) = &report.error {
        eprintln!("error: {error}");
    }

    match written {
        Some(path) => {
            if !args.json {
                println!("{}", path.display());
            }
            ExitCode::SUCCESS
        }
        None => ExitCode::FAILURE,
    }
}
