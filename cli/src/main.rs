mod commands;
mod util;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use coursegate_runtime::config::{DEFAULT_API_URL, DEFAULT_TIMEOUT_SECS};
use coursegate_runtime::telemetry::init_tracing;

use commands::auth::AuthCommands;
use commands::cache::CacheCommands;
use commands::exam::ExamCommands;
use commands::progress::ProgressCommands;
use commands::review::ReviewCommands;
use util::SessionArgs;

#[derive(Parser)]
#[command(name = "coursegate", version, about = "Course progress, unlock gate, assessments and certificates")]
struct Cli {
    /// API base URL
    #[arg(long, env = "COURSEGATE_API_URL", default_value = DEFAULT_API_URL)]
    api_url: String,

    /// Learner id
    #[arg(long, env = "COURSEGATE_USER_ID")]
    user_id: Option<String>,

    /// Course id
    #[arg(long, env = "COURSEGATE_COURSE_ID")]
    course_id: Option<String>,

    /// Per-request timeout in seconds
    #[arg(long, env = "COURSEGATE_TIMEOUT_SECS", default_value_t = DEFAULT_TIMEOUT_SECS)]
    timeout_secs: u64,

    /// Directory for the local progress cache
    #[arg(long, env = "COURSEGATE_CACHE_DIR")]
    cache_dir: Option<PathBuf>,

    /// Emit logs as JSON on stderr
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Course progress
    Progress {
        #[command(subcommand)]
        command: ProgressCommands,
    },
    /// Show the unlock state and allowed actions
    Gate,
    /// Final assessment
    Exam {
        #[command(subcommand)]
        command: ExamCommands,
    },
    /// Course review
    Review {
        #[command(subcommand)]
        command: ReviewCommands,
    },
    /// Request the completion certificate
    Certificate,
    /// Local progress cache
    Cache {
        #[command(subcommand)]
        command: CacheCommands,
    },
    /// Credentials
    Auth {
        #[command(subcommand)]
        command: AuthCommands,
    },
}

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    let args = SessionArgs {
        api_url: cli.api_url,
        user_id: cli.user_id,
        course_id: cli.course_id,
        timeout_secs: cli.timeout_secs,
        cache_dir: cli.cache_dir,
    };

    let code = match cli.command {
        Commands::Progress { command } => commands::progress::run(&args, command).await,
        Commands::Gate => commands::gate::run(&args).await,
        Commands::Exam { command } => commands::exam::run(&args, command).await,
        Commands::Review { command } => commands::review::run(&args, command).await,
        Commands::Certificate => commands::certificate::run(&args).await,
        Commands::Cache { command } => commands::cache::run(&args, command),
        Commands::Auth { command } => commands::auth::run(&args.api_url, command),
    };

    std::process::exit(code);
}
