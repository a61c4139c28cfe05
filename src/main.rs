use std::{error::Error, path::PathBuf, process, time::Duration};

use clap::{builder::TypedValueParser, command, Args as ClapArgs, Parser, Subcommand, ValueHint};
use log::{debug, error, info, warn, LevelFilter};
use url::Url;

use meting_dl::{
    capture::{self, CookieFormat, Session},
    config::{Config, Platform},
    cookie::Cookie,
    error::Error as MetingError,
    http,
    planner::{AlbumPlan, KeywordPlan, Planner, Summary},
    progress::Reporter,
    protocol::{self, webdriver::WebDriver},
    writer::LocalStorage,
};

/// Profile to display when not built in release mode.
#[cfg(debug_assertions)]
const BUILD_PROFILE: &str = "debug";
/// Profile to display when not built release mode.
#[cfg(not(debug_assertions))]
const BUILD_PROFILE: &str = "release";

/// Group name for mutually exclusive logging options.
const ARGS_GROUP_LOGGING: &str = "logging";

/// Command line arguments as parsed by `clap`.
#[derive(Clone, Debug, Parser)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Suppresses all output except warnings and errors.
    #[arg(short, long, global = true, default_value_t = false, group = ARGS_GROUP_LOGGING)]
    quiet: bool,

    /// Enable verbose logging
    ///
    /// Specify twice for trace logging.
    #[arg(short, long, global = true, action = clap::ArgAction::Count, group = ARGS_GROUP_LOGGING)]
    verbose: u8,
}

#[derive(Clone, Debug, Subcommand)]
enum Command {
    /// Log in to a music platform and capture its cookies
    Cookie(CookieArgs),

    /// Download tracks found by one or more search keywords
    Keywords(KeywordArgs),

    /// Download albums by id or by search query
    Album(AlbumArgs),
}

#[derive(Clone, Debug, ClapArgs)]
struct CookieArgs {
    /// Platform to log in to
    #[arg(long, value_name = "ID")]
    platform: Platform,

    /// Output format: header or json
    #[arg(long, default_value_t = CookieFormat::Header)]
    format: CookieFormat,

    /// Save cookies to this file instead of printing them
    ///
    /// Ensure that this file is kept secure and not shared publicly, as it
    /// grants access to your account.
    #[arg(long, value_name = "FILE", value_hint = ValueHint::FilePath)]
    output: Option<PathBuf>,

    /// Maximum time to wait for a successful login, in seconds
    #[arg(long, value_name = "SEC", default_value_t = 900)]
    timeout: u64,

    /// Run the browser without a window
    #[arg(long, default_value_t = false)]
    headless: bool,

    /// Address of a running WebDriver server such as chromedriver
    #[arg(long, value_name = "URL", value_hint = ValueHint::Url, env = "METING_WEBDRIVER", default_value = protocol::webdriver::DEFAULT_URL)]
    webdriver: Url,
}

#[derive(Clone, Debug, ClapArgs)]
struct DownloadArgs {
    /// Music platform to download from
    #[arg(long, value_name = "ID")]
    platform: Platform,

    /// Cookie header value for authenticated requests
    #[arg(long, value_name = "VALUE", env = "METING_COOKIE", hide_env_values = true, conflicts_with = "cookie_file")]
    cookie: Option<Cookie>,

    /// Load the cookie from a file
    ///
    /// The file holds either the raw header value or a TOML table with a
    /// `cookie` key.
    #[arg(long, value_name = "FILE", value_hint = ValueHint::FilePath)]
    cookie_file: Option<PathBuf>,

    /// Audio bitrate in kbps
    #[arg(long, value_name = "KBPS", default_value_t = Config::DEFAULT_QUALITY)]
    quality: u32,

    /// Fixed delay after every catalog request and between downloads, in
    /// milliseconds
    #[arg(long, value_name = "MS", default_value_t = 1000)]
    delay: u64,

    /// Output directory for downloaded files
    #[arg(long, value_name = "DIR", value_hint = ValueHint::DirPath, default_value = Config::DEFAULT_OUTPUT_DIR)]
    output: PathBuf,

    /// Overwrite existing files
    #[arg(long, default_value_t = false)]
    overwrite: bool,
}

#[derive(Clone, Debug, ClapArgs)]
struct KeywordArgs {
    /// Search keywords
    #[arg(long, value_name = "WORDS", num_args = 1.., required = true)]
    keywords: Vec<String>,

    /// Keep only tracks performed by this artist alone
    #[arg(long, value_name = "NAME")]
    artist: Option<String>,

    /// Maximum number of tracks per keyword
    #[arg(long, value_name = "N", default_value_t = 30)]
    limit: usize,

    /// Number of results per search page
    #[arg(long, value_name = "N", default_value_t = Config::DEFAULT_PAGE_SIZE, value_parser = clap::value_parser!(u64).range(1..).map(|n| n as usize))]
    page_size: usize,

    #[command(flatten)]
    download: DownloadArgs,
}

#[derive(Clone, Debug, ClapArgs)]
struct AlbumArgs {
    /// Album ids
    #[arg(long, value_name = "ID", num_args = 1..)]
    album_id: Vec<String>,

    /// Album search queries; the first result of each is downloaded
    #[arg(long, value_name = "TEXT", num_args = 1..)]
    album_query: Vec<String>,

    /// Maximum number of tracks per album
    #[arg(long, value_name = "N", default_value_t = 100)]
    limit: usize,

    #[command(flatten)]
    download: DownloadArgs,
}

impl DownloadArgs {
    fn config(&self) -> Result<Config, MetingError> {
        let mut config = Config::new(self.platform);

        config.cookie = match (&self.cookie, &self.cookie_file) {
            (Some(cookie), _) => Some(cookie.clone()),
            (None, Some(file)) => Some(Cookie::from_file(file)?),
            (None, None) => None,
        };
        config.quality = self.quality;
        config.delay = Duration::from_millis(self.delay);
        config.output_dir.clone_from(&self.output);
        config.overwrite = self.overwrite;

        Ok(config)
    }
}

/// Initializes the logger facade.
///
/// The logging level is determined as follows, in order of precedence from
/// highest to lowest:
/// 1. Command line arguments
/// 2. `RUST_LOG` environment variable
/// 3. Hard coded default
///
/// # Panics
///
/// Panics when a logger facade is already initialized.
fn init_logger(config: &Args) {
    let mut logger = env_logger::Builder::from_env(
        // Note: if you change the default logging level here, then you should
        // probably also change the verbosity levels below.
        env_logger::Env::default().filter_or(env_logger::DEFAULT_FILTER_ENV, "info"),
    );

    if config.quiet || config.verbose > 0 {
        let level = match config.verbose {
            0 => {
                // Quiet and verbose are mutually exclusive, and `verbose` is 0
                // by default. So this arm means: quiet mode.
                LevelFilter::Warn
            }
            1 => LevelFilter::Debug,
            _ => LevelFilter::Trace,
        };

        // Filter log messages of external crates.
        logger.filter_module(module_path!(), level);
    }

    logger.init();
}

/// Captures cookies through a browser and prints or saves them.
async fn run_cookie(args: CookieArgs) -> Result<(), Box<dyn Error>> {
    let platform = args.platform.cookie_config();
    info!("opening login page {}", platform.login_url);
    info!("{}", platform.instructions);

    let config = Config::new(args.platform);
    let driver = WebDriver::connect(&config, &args.webdriver, args.headless).await?;
    let mut session = Session::new(&driver, platform, Duration::from_secs(args.timeout));

    let result = tokio::select! {
        // Prioritize shutdown signals.
        biased;

        _ = tokio::signal::ctrl_c() => None,

        result = session.run() => Some(result),
    };

    // The session closes the browser itself unless it was interrupted.
    let Some(cookies) = result else {
        info!("shutting down gracefully");
        capture::Automation::close(&driver).await;
        return Err(MetingError::cancelled("interrupted").into());
    };

    let output = capture::format_cookies(&cookies?, args.format)?;

    match args.output {
        Some(file) => {
            if let Some(parent) = file.parent().filter(|p| !p.as_os_str().is_empty()) {
                tokio::fs::create_dir_all(parent).await?;
            }
            tokio::fs::write(&file, output).await?;
            info!("cookies saved to {}", file.display());
        }
        None => {
            info!("cookies captured");
            println!("{output}");
        }
    }

    Ok(())
}

/// What to download.
enum Mode {
    Keywords(KeywordPlan),
    Albums(AlbumPlan),
}

/// Sets up a planner from `args` and runs `mode` to completion.
async fn run_download(
    args: &DownloadArgs,
    page_size: usize,
    mode: Mode,
    reporter: Reporter,
) -> Result<(), Box<dyn Error>> {
    let mut config = args.config()?;
    config.page_size = page_size;

    if config.cookie.is_none() {
        warn!("no cookie provided, proceeding with anonymous requests");
    }

    tokio::fs::create_dir_all(&config.output_dir).await?;
    info!("output directory: {}", config.output_dir.display());

    let catalog = protocol::catalog(&config)?;
    let transport = http::Client::without_cookies(&config)?;
    let mut planner = Planner::new(
        &config,
        catalog.as_ref(),
        &transport,
        &LocalStorage,
        reporter,
    );

    let work = async {
        match &mode {
            Mode::Keywords(plan) => planner.keywords(plan).await,
            Mode::Albums(plan) => planner.albums(plan).await,
        }
    };

    let summary: Summary = tokio::select! {
        // Prioritize shutdown signals.
        biased;

        _ = tokio::signal::ctrl_c() => {
            info!("shutting down gracefully");
            return Err(MetingError::cancelled("interrupted").into());
        }

        summary = work => summary?,
    };

    info!(
        "finished {}/{} tracks: {} failed, {} skipped",
        summary.completed, summary.total, summary.failed, summary.skipped
    );
    Ok(())
}

/// Main application entry.
///
/// # Errors
///
/// Returns an error when the operator input is invalid, a catalog request
/// fails, the capture does not complete or the user interrupts. Failures of
/// individual tracks are not errors.
async fn run(args: Args) -> Result<(), Box<dyn Error>> {
    let reporter = if args.quiet {
        Reporter::hidden()
    } else {
        Reporter::stderr()
    };

    match args.command {
        Command::Cookie(cookie) => run_cookie(cookie).await,

        Command::Keywords(keywords) => {
            let plan = KeywordPlan {
                keywords: keywords.keywords,
                artist: keywords.artist,
                limit: keywords.limit,
            };
            run_download(
                &keywords.download,
                keywords.page_size,
                Mode::Keywords(plan),
                reporter,
            )
            .await
        }

        Command::Album(album) => {
            let plan = AlbumPlan {
                album_ids: album.album_id,
                album_queries: album.album_query,
                limit: album.limit,
            };
            run_download(
                &album.download,
                Config::DEFAULT_PAGE_SIZE,
                Mode::Albums(plan),
                reporter,
            )
            .await
        }
    }
}

/// Main entry point of the application.
///
/// This function initializes the logger facade, parses the command line
/// arguments, and runs the requested command.
#[tokio::main]
async fn main() {
    // `clap` handles our command line arguments and help text.
    let args = Args::parse();
    init_logger(&args);

    // Dump command line arguments before we do anything more.
    // This aids in debugging of whatever comes next.
    debug!("Command {:#?}", args);

    let cmd = command!();
    let name = cmd.get_name().to_string();
    let version = cmd.get_version().unwrap_or("UNKNOWN").to_string();

    info!("starting {name}/{version}; {BUILD_PROFILE}");

    if let Err(e) = run(args).await {
        error!("{e}");
        process::exit(1);
    }
}
