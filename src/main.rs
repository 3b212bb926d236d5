use clap::{Parser, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};
use thumbdrop::imaging::{ImageCodec, RustCodec};
use thumbdrop::remote::FsRemoteStore;
use thumbdrop::response::{UploadMetadata, UploadResponse};
use thumbdrop::types::{CancelToken, UploadRequest};
use thumbdrop::upload::{UploadError, Uploader};
use thumbdrop::{config, naming, output, placement, telemetry};

#[derive(Parser)]
#[command(name = "thumbdrop")]
#[command(about = "Upload photos into a gallery with size-budgeted thumbnails")]
#[command(long_about = "\
Upload photos into a gallery with size-budgeted thumbnails

Every upload becomes two files on the remote store:

  /{owner}/{folder}/{filename}                    # original, byte-for-byte
  /{owner}/{folder}/thumbnails/tn_{filename}      # thumbnail

Thumbnail modes:
  dimension   resize to --target-width (default 1600), one encode
  size        search quality and width for a file near --target-size bytes

Uploads under 1 MiB reuse the original as the thumbnail.

Run 'thumbdrop gen-config' to generate a documented thumbdrop.toml.")]
#[command(version)]
struct Cli {
    /// Config file (missing file means stock defaults)
    #[arg(long, default_value = "thumbdrop.toml", global = true)]
    config: PathBuf,

    /// Remote store root directory (overrides [remote].root)
    #[arg(long, global = true)]
    remote_root: Option<PathBuf>,

    /// Local scratch directory (overrides [staging].dir)
    #[arg(long, global = true)]
    staging_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Upload one or more images
    Upload(UploadArgs),
    /// Print where an upload would be placed
    Plan {
        #[arg(long)]
        owner: String,
        #[arg(long)]
        folder: String,
        filename: String,
    },
    /// Print an image's dimensions and size
    Probe { file: PathBuf },
    /// Print a stock thumbdrop.toml with all options documented
    GenConfig,
}

#[derive(clap::Args)]
struct UploadArgs {
    #[arg(required = true)]
    files: Vec<PathBuf>,

    #[arg(long)]
    owner: String,

    #[arg(long)]
    folder: String,

    /// Thumbnail mode
    #[arg(long, value_enum, default_value_t = Method::Dimension)]
    method: Method,

    #[arg(long)]
    target_width: Option<u32>,

    #[arg(long)]
    target_height: Option<u32>,

    /// Byte budget for size mode
    #[arg(long)]
    target_size: Option<u64>,

    /// Keep filenames as given, overwriting earlier uploads
    #[arg(long)]
    replace: bool,

    /// Print one JSON response per file instead of progress lines
    #[arg(long)]
    json: bool,
}

#[derive(Clone, Copy, ValueEnum)]
enum Method {
    Size,
    Dimension,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    match cli.command {
        Command::Upload(args) => {
            let mut service_config = config::load_config(&cli.config)?;
            if let Some(root) = cli.remote_root {
                service_config.remote.root = root;
            }
            if let Some(dir) = cli.staging_dir {
                service_config.staging.dir = Some(dir);
            }
            service_config.validate()?;
            telemetry::init_logging(&service_config.logging)?;

            let failed = run_upload(args, service_config)?;
            if failed > 0 {
                std::process::exit(1);
            }
        }
        Command::Plan {
            owner,
            folder,
            filename,
        } => {
            naming::validate_identifier("owner", &owner)?;
            naming::validate_identifier("folder", &folder)?;
            let filename = naming::sanitize_filename(&filename)?;
            output::print_plan(&placement::plan(&owner, &folder, &filename));
        }
        Command::Probe { file } => {
            let bytes = std::fs::read(&file)?;
            let probe = RustCodec::new().probe(&bytes)?;
            output::print_probe(&file.display().to_string(), &probe);
        }
        Command::GenConfig => {
            print!("{}", config::stock_config_toml());
        }
    }

    Ok(())
}

/// Why one file of a batch failed.
#[derive(Debug, thiserror::Error)]
enum FileError {
    #[error("could not read file: {0}")]
    Read(#[from] std::io::Error),
    /// Rejected before the upload started; no progress event was sent.
    #[error("{0}")]
    Request(UploadError),
    #[error("{0}")]
    Upload(UploadError),
}

impl From<UploadError> for FileError {
    fn from(e: UploadError) -> Self {
        FileError::Upload(e)
    }
}

/// Upload every file in `args`. Returns the number of failures.
///
/// Files are read by the batch workers, so only the uploads in flight hold
/// a payload in memory.
fn run_upload(
    args: UploadArgs,
    service_config: config::ServiceConfig,
) -> Result<usize, Box<dyn std::error::Error>> {
    let metadata = UploadMetadata {
        username: Some(args.owner),
        folder: Some(args.folder),
        compression_method: Some(
            match args.method {
                Method::Size => "size",
                Method::Dimension => "dimension",
            }
            .to_string(),
        ),
        target_width: args.target_width,
        target_height: args.target_height,
        target_size: args.target_size,
        replace: args.replace,
    };

    let store = FsRemoteStore::new(&service_config.remote.root);
    let uploader = Uploader::new(RustCodec::new(), store, service_config)?;

    let (tx, rx) = std::sync::mpsc::channel();
    let quiet = args.json;
    let printer = std::thread::spawn(move || {
        for event in rx {
            if quiet {
                continue;
            }
            for line in output::format_upload_event(&event) {
                println!("{}", line);
            }
        }
    });
    let results = uploader.upload_each(
        args.files.clone(),
        |path| prepare(&metadata, &path),
        &CancelToken::new(),
        Some(tx),
    );
    printer
        .join()
        .map_err(|_| "output thread panicked")?;

    let succeeded = results.iter().filter(|r| r.is_ok()).count();
    let failed = results.len() - succeeded;

    for (path, result) in args.files.iter().zip(results) {
        let result = match result {
            Err(FileError::Read(e)) => {
                eprintln!("{}: could not read file: {e}", path.display());
                continue;
            }
            Err(FileError::Request(e)) if !args.json => {
                eprintln!("{}: {e}", path.display());
                continue;
            }
            Err(FileError::Request(e) | FileError::Upload(e)) => Err(e),
            Ok(outcome) => Ok(outcome),
        };
        if args.json {
            let (status, body) = UploadResponse::from_result(&result);
            println!(
                "{}",
                serde_json::json!({ "status": status, "response": body })
            );
        }
    }
    if !args.json {
        println!("{}", output::format_batch_summary(succeeded, failed));
    }
    Ok(failed)
}

fn prepare(metadata: &UploadMetadata, path: &Path) -> Result<UploadRequest, FileError> {
    let filename = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let bytes = std::fs::read(path)?;
    metadata
        .clone()
        .into_request(&filename, bytes)
        .map_err(FileError::Request)
}
