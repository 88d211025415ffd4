use std::path::PathBuf;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use clap::{Args, Parser, Subcommand, ValueEnum};
use serde::Serialize;
use thiserror::Error;

use draftpack_core::{
    health_check, load_config, ApiResponse, DraftDocument, DraftService, FinalizeRequest, TargetOs,
};

pub type Result<T> = std::result::Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("config error: {0}")]
    Config(#[from] draftpack_core::ConfigError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("service error: {0}")]
    Service(#[from] draftpack_core::ServiceError),
    #[error("draft error: {0}")]
    Draft(#[from] draftpack_core::DraftError),
    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("operation failed: {0}")]
    OperationFailed(String),
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Draft materialization control interface", long_about = None)]
pub struct Cli {
    /// Path to the engine configuration
    #[arg(long, default_value = "configs/draftpack.toml")]
    pub config: PathBuf,
    /// Override for paths.data_dir
    #[arg(long)]
    pub data_dir: Option<PathBuf>,
    /// Output format
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Draft document operations
    #[command(subcommand)]
    Draft(DraftCommands),
    /// Finalize task state
    #[command(subcommand)]
    Task(TaskCommands),
    /// Runs a finalize job to completion
    Finalize(FinalizeArgs),
    /// Signed archive URLs
    #[command(subcommand)]
    Sign(SignCommands),
    /// Integrity checks
    #[command(name = "health")]
    #[command(subcommand)]
    Health(HealthCommands),
}

#[derive(Subcommand, Debug)]
pub enum DraftCommands {
    /// Lists stored drafts, most recently modified first
    List(DraftListArgs),
    /// Prints one draft document
    Show(DraftShowArgs),
    /// Imports a draft document from a JSON file
    Import(DraftImportArgs),
}

#[derive(Args, Debug)]
pub struct DraftListArgs {
    /// Maximum rows returned
    #[arg(long, default_value_t = 10)]
    pub limit: usize,
}

#[derive(Args, Debug)]
pub struct DraftShowArgs {
    pub draft_id: String,
}

#[derive(Args, Debug)]
pub struct DraftImportArgs {
    pub draft_id: String,
    /// JSON file holding the draft document
    pub file: PathBuf,
    #[arg(long, default_value_t = 1080)]
    pub canvas_width: u32,
    #[arg(long, default_value_t = 1920)]
    pub canvas_height: u32,
}

#[derive(Subcommand, Debug)]
pub enum TaskCommands {
    /// Shows the task state for a draft
    Show(TaskShowArgs),
}

#[derive(Args, Debug)]
pub struct TaskShowArgs {
    pub draft_id: String,
}

#[derive(Args, Debug)]
pub struct FinalizeArgs {
    pub draft_id: String,
    /// Client operating system (windows, macos, linux)
    #[arg(long)]
    pub os: Option<String>,
    /// Local destination folder; when it exists the draft is copied there
    #[arg(long)]
    pub base_folder: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum SignCommands {
    /// Signed URL for the archive as finalized
    Base(SignBaseArgs),
    /// Signed URL for an archive rewritten for a client layout
    Customized(SignCustomizedArgs),
}

#[derive(Args, Debug)]
pub struct SignBaseArgs {
    pub draft_id: String,
}

#[derive(Args, Debug)]
pub struct SignCustomizedArgs {
    pub draft_id: String,
    #[arg(long)]
    pub os: Option<String>,
    #[arg(long)]
    pub base_folder: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum HealthCommands {
    /// Checks that both stores answer
    Check,
}

pub fn run(cli: Cli) -> Result<()> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    let context = AppContext::new(&cli)?;

    match &cli.command {
        Commands::Draft(DraftCommands::List(args)) => {
            let drafts = context.draft_list(args)?;
            render(&drafts, cli.format)?;
        }
        Commands::Draft(DraftCommands::Show(args)) => {
            let response = context.service.get_draft(&args.draft_id);
            render_response(response, cli.format)?;
        }
        Commands::Draft(DraftCommands::Import(args)) => {
            let response = context.draft_import(args)?;
            render_response(response, cli.format)?;
        }
        Commands::Task(TaskCommands::Show(args)) => {
            let response = context.service.query_task(&args.draft_id);
            render_response(response, cli.format)?;
        }
        Commands::Finalize(args) => {
            let response = runtime.block_on(context.finalize(args))?;
            render_response(response, cli.format)?;
        }
        Commands::Sign(SignCommands::Base(args)) => {
            let response = runtime.block_on(context.service.sign_base(&args.draft_id));
            render_response(response, cli.format)?;
        }
        Commands::Sign(SignCommands::Customized(args)) => {
            let os = parse_os(args.os.as_deref())?;
            let response = runtime.block_on(context.service.sign_customized(
                &args.draft_id,
                os,
                args.base_folder.as_deref(),
            ));
            render_response(response, cli.format)?;
        }
        Commands::Health(HealthCommands::Check) => {
            let response = health_check(context.service.config());
            render_response(response, cli.format)?;
        }
    }

    Ok(())
}

fn parse_os(raw: Option<&str>) -> Result<Option<TargetOs>> {
    match raw {
        None => Ok(None),
        Some(value) => TargetOs::from_str(value)
            .map(Some)
            .map_err(|err| AppError::InvalidArgument(err.to_string())),
    }
}

fn render<T>(value: &T, format: OutputFormat) -> Result<()>
where
    T: Serialize + DisplayFallback,
{
    match format {
        OutputFormat::Text => {
            println!("{}", value.display());
            Ok(())
        }
        OutputFormat::Json => {
            let json = serde_json::to_string_pretty(value)?;
            println!("{json}");
            Ok(())
        }
    }
}

/// Renders the envelope and exits non-zero on domain failure.
fn render_response(response: ApiResponse, format: OutputFormat) -> Result<()> {
    render(&response, format)?;
    if response.success {
        Ok(())
    } else {
        Err(AppError::OperationFailed(
            response.error.unwrap_or_else(|| "unknown".to_string()),
        ))
    }
}

trait DisplayFallback {
    fn display(&self) -> String;
}

impl DisplayFallback for ApiResponse {
    fn display(&self) -> String {
        if self.success {
            match &self.output {
                Some(output) => {
                    serde_json::to_string_pretty(output).unwrap_or_else(|_| "ok".to_string())
                }
                None => "ok".to_string(),
            }
        } else {
            format!("error: {}", self.error.as_deref().unwrap_or("unknown"))
        }
    }
}

#[derive(Debug, Serialize)]
pub struct DraftSummary {
    pub draft_id: String,
    pub canvas_width: u32,
    pub canvas_height: u32,
    pub last_modified: Option<DateTime<Utc>>,
}

impl DisplayFallback for Vec<DraftSummary> {
    fn display(&self) -> String {
        if self.is_empty() {
            return "no drafts stored".to_string();
        }
        let mut out = String::new();
        for draft in self {
            let modified = draft
                .last_modified
                .map(|ts| ts.format("%Y-%m-%d %H:%M:%S").to_string())
                .unwrap_or_else(|| "-".to_string());
            out.push_str(&format!(
                "{}  {}x{}  {}\n",
                draft.draft_id, draft.canvas_width, draft.canvas_height, modified
            ));
        }
        out.trim_end().to_string()
    }
}

struct AppContext {
    service: DraftService,
}

impl AppContext {
    fn new(cli: &Cli) -> Result<Self> {
        let mut config = load_config(&cli.config)?;
        if let Some(data_dir) = &cli.data_dir {
            config.paths.data_dir = data_dir.display().to_string();
        }
        let service = DraftService::open(config)?;
        Ok(Self { service })
    }

    fn draft_list(&self, args: &DraftListArgs) -> Result<Vec<DraftSummary>> {
        let records = self.service.drafts().durable().list(args.limit)?;
        Ok(records
            .into_iter()
            .map(|record| DraftSummary {
                draft_id: record.draft_id,
                canvas_width: record.canvas_width,
                canvas_height: record.canvas_height,
                last_modified: record.last_modified,
            })
            .collect())
    }

    fn draft_import(&self, args: &DraftImportArgs) -> Result<ApiResponse> {
        let raw = std::fs::read_to_string(&args.file)?;
        let document = DraftDocument::deserialize(&raw)?;
        Ok(self.service.put_draft(
            &args.draft_id,
            &document,
            args.canvas_width,
            args.canvas_height,
        ))
    }

    async fn finalize(&self, args: &FinalizeArgs) -> Result<ApiResponse> {
        let mut request = FinalizeRequest::new(args.draft_id.as_str());
        if let Some(os) = parse_os(args.os.as_deref())? {
            request = request.target_os(os);
        }
        if let Some(base) = &args.base_folder {
            request = request.base_folder(base.as_str());
        }
        match self.service.materializer().finalize(&request).await {
            Ok(output) => Ok(ApiResponse::ok(serde_json::json!({
                "draft_id": output.draft_id,
                "archive": output.archive_path.display().to_string(),
                "signed_url": output.signed_url,
                "local_copy": output.local_copy.as_ref().map(|p| p.display().to_string()),
                "fetched": output.fetched,
                "failed": output.failed,
            }))),
            Err(err) => Ok(ApiResponse::failure(err.to_string())),
        }
    }
}
