use clap::{Parser, Subcommand};
use harness::{run_scanner, run_suite, HarnessConfig, Orchestrator, ScannerBuild};
use scanner::config::{default_user_home, DEFAULT_HOST_URL};
use scanner::{Properties, WsCache};
use server::{AnalysisServer, ServerConfig};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::info;

#[derive(Parser)]
#[command(name = "harness")]
#[command(about = "Run the analysis server and scanner, and validate offline cache behaviour")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the analysis server until Ctrl-C
    Serve {
        /// Port to listen on
        #[arg(short, long, default_value = "9000")]
        port: u16,
        /// Server version reported to scanners
        #[arg(long, default_value = "5.6")]
        version: String,
        /// Quality profile backup to restore on startup
        #[arg(long)]
        profile: Option<PathBuf>,
        /// Extra library file to distribute, may be repeated
        #[arg(long)]
        library: Vec<PathBuf>,
    },
    /// Analyze one project
    Analyze {
        /// Project base directory
        #[arg(long, default_value = ".")]
        project_dir: PathBuf,
        /// Scanner property, e.g. -D sonar.analysis.mode=issues
        #[arg(short = 'D', value_name = "KEY=VALUE")]
        define: Vec<String>,
    },
    /// Run the cache fallback contract against an embedded server
    Validate {
        /// Harness configuration file (TOML)
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// Directory holding the sample projects
        #[arg(long)]
        projects_dir: Option<PathBuf>,
        /// Server version to emulate
        #[arg(long)]
        version: Option<String>,
        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },
    /// List or clear the web service cache of one server
    Cache {
        /// Scanner user home
        #[arg(long)]
        user_home: Option<PathBuf>,
        /// Server URL the cache belongs to
        #[arg(long, default_value = DEFAULT_HOST_URL)]
        host_url: String,
        /// Remove every entry
        #[arg(long)]
        clear: bool,
    },
}

#[tokio::main]
async fn main() -> Result<ExitCode, Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Serve {
            port,
            version,
            profile,
            library,
        } => serve(port, version, profile, &library).await,
        Commands::Analyze {
            project_dir,
            define,
        } => analyze(project_dir, &define).await,
        Commands::Validate {
            config,
            projects_dir,
            version,
            json,
        } => validate(config, projects_dir, version, json).await,
        Commands::Cache {
            user_home,
            host_url,
            clear,
        } => cache(user_home, &host_url, clear),
    }
}

async fn serve(
    port: u16,
    version: String,
    profile: Option<PathBuf>,
    libraries: &[PathBuf],
) -> Result<ExitCode, Box<dyn std::error::Error>> {
    let mut server = AnalysisServer::new(ServerConfig::new().with_port(port).with_version(version))?;
    for path in libraries {
        let name = path
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| format!("Invalid library path {}", path.display()))?;
        server.add_library(name, std::fs::read(path)?)?;
    }
    if let Some(path) = profile {
        let backup = serde_json::from_slice(&std::fs::read(&path)?)?;
        let restored = server.restore_profile(backup)?;
        println!("Restored profile {} ({})", restored.name, restored.key);
    }
    server.start()?;
    if let Some(url) = server.base_url() {
        println!("Server {} listening on {}", server.version(), url);
    }

    tokio::signal::ctrl_c().await?;
    info!("Shutting down");
    server.stop();
    Ok(ExitCode::SUCCESS)
}

async fn analyze(
    project_dir: PathBuf,
    define: &[String],
) -> Result<ExitCode, Box<dyn std::error::Error>> {
    let mut overrides = Properties::new();
    for definition in define {
        let (key, value) = Properties::parse_definition(definition)?;
        overrides.set(key, value);
    }
    let project_dir = std::fs::canonicalize(&project_dir)?;
    let build = ScannerBuild::create(project_dir)?.set_properties(&overrides);

    let result = run_scanner(build.properties()).await;
    print!("{}", result.logs());
    if result.is_success() {
        println!("EXECUTION SUCCESS");
        Ok(ExitCode::SUCCESS)
    } else {
        println!("EXECUTION FAILURE");
        Ok(ExitCode::FAILURE)
    }
}

async fn validate(
    config: Option<PathBuf>,
    projects_dir: Option<PathBuf>,
    version: Option<String>,
    json: bool,
) -> Result<ExitCode, Box<dyn std::error::Error>> {
    let mut config = match config {
        Some(path) => HarnessConfig::from_file(&path)?,
        None => HarnessConfig::default(),
    };
    if let Some(dir) = projects_dir {
        config = config.with_projects_dir(dir);
    }
    if let Some(version) = version {
        config.server = config.server.with_version(version);
    }
    config.validate()?;

    let mut orchestrator =
        Orchestrator::start(config.server.clone())?.with_ws_timeout(config.ws_timeout());
    info!("Server running at {}", orchestrator.server_url()?);
    let report = run_suite(&mut orchestrator, &config).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("{}", report);
    }

    Ok(if report.passed() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn cache(
    user_home: Option<PathBuf>,
    host_url: &str,
    clear: bool,
) -> Result<ExitCode, Box<dyn std::error::Error>> {
    let user_home = user_home.unwrap_or_else(default_user_home);
    let cache = WsCache::open(&user_home, host_url)?;

    if clear {
        cache.clear()?;
        println!("Cleared {}", cache.root().display());
        return Ok(ExitCode::SUCCESS);
    }

    let entries = cache.entries()?;
    println!("{} ({} entries)", cache.root().display(), entries.len());
    for entry in entries {
        println!(
            "  {}  {:>8} bytes  {}",
            entry.stored_at.to_rfc3339(),
            entry.size,
            entry.key
        );
    }
    Ok(ExitCode::SUCCESS)
}
