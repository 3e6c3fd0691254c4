use std::{error::Error, path::PathBuf, process, sync::Arc};

use clap::{command, Parser, ValueHint};
use log::{debug, error, info, warn, LevelFilter};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use dzdl::{
    arl::Arl,
    config::{Config, DownloadSettings},
    downloader::Downloader,
    error::ErrorKind,
    events::{Event, Listener},
    gateway::Gateway,
    http::Client,
    protocol::media::Format,
    signal,
    tagger::NoopTagger,
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
#[derive(Clone, Debug, Default, Hash, PartialEq, Eq, PartialOrd, Ord, Parser)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Deezer links to download
    ///
    /// Track, album, playlist and artist links are supported, as well as
    /// deezer.page.link short links.
    #[arg(required = true, value_hint = ValueHint::Url)]
    links: Vec<String>,

    /// Audio format to download
    ///
    /// One of FLAC, MP3_320, MP3_128, MP4_RA3, MP4_RA2 or MP4_RA1. Spatial
    /// formats only fall back to lower spatial formats.
    #[arg(short, long, default_value_t = String::from("MP3_320"), env = "DZDL_FORMAT")]
    format: String,

    /// Secrets file
    ///
    /// Ensure that the this file is kept secure and not shared publicly, as it
    /// contains sensitive information that can grant access to your Deezer
    /// account.
    #[arg(short, long, value_name = "FILE", value_hint = ValueHint::FilePath, default_value_t = String::from("secrets.toml"))]
    secrets_file: String,

    /// Configuration file with a `[download]` table
    #[arg(short, long, value_name = "FILE", value_hint = ValueHint::FilePath, env = "DZDL_CONFIG")]
    config_file: Option<String>,

    /// Directory to download to
    #[arg(short, long, value_name = "DIR", value_hint = ValueHint::DirPath)]
    output: Option<PathBuf>,

    /// Number of tracks to download at the same time
    #[arg(short = 'j', long)]
    concurrency: Option<usize>,

    /// Fail instead of falling back to lower formats
    #[arg(long, default_value_t = false)]
    no_fallback: bool,

    /// Substitute unavailable tracks by a search match
    #[arg(long, default_value_t = false)]
    fallback_search: bool,

    /// Download over files that already exist
    #[arg(long, default_value_t = false)]
    overwrite: bool,

    /// Suppresses all output except warnings and errors.
    #[arg(short, long, default_value_t = false, group = ARGS_GROUP_LOGGING)]
    quiet: bool,

    /// Enable verbose logging
    ///
    /// Specify twice for trace logging.
    #[arg(short, long, action = clap::ArgAction::Count, group = ARGS_GROUP_LOGGING)]
    verbose: u8,
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
        logger.filter_module("dzdl", level);
    }

    logger.init();
}

/// Loads the `arl` from a file.
///
/// # Errors
///
/// This function returns an error if the file could not be read. This could be
/// due to the file not existing or not having the correct permissions.
fn load_arl(secrets_file: &str) -> dzdl::error::Result<Arl> {
    let arl = Arl::load(secrets_file);

    if let Err(ref e) = arl {
        if e.kind == ErrorKind::NotFound {
            info!("read the documentation on how to set your ARL in {secrets_file}");
        }
    }

    arl
}

/// Builds the configuration from its defaults, the configuration file and
/// the command line, in that order of precedence.
fn configure(args: &Args) -> Result<Config, Box<dyn Error>> {
    let mut config = Config::new()?;
    config.arl = Some(load_arl(&args.secrets_file)?);

    if let Some(ref config_file) = args.config_file {
        config.load(config_file)?;
    }

    config.apply(DownloadSettings {
        location: args.output.clone(),
        max_concurrent: args.concurrency,
        fallback_bitrate: args.no_fallback.then_some(false),
        fallback_search: args.fallback_search.then_some(true),
        overwrite: args.overwrite.then_some(true),
        ..Default::default()
    });

    Ok(config)
}

/// Logs events that are not logged by the engine itself.
fn report(mut events: mpsc::UnboundedReceiver<Event>) {
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            match event {
                Event::Progress { uuid, progress } => debug!("{uuid}: {progress}%"),
                Event::Warning {
                    track,
                    reason,
                    remedy,
                    ..
                } => {
                    warn!(
                        "{} - {}: {reason}, trying {remedy}",
                        track.artist, track.title
                    );
                }
                _ => {}
            }
        }
    });
}

/// Main application flow.
///
/// # Errors
///
/// This function returns an error when the session cannot be set up. Links
/// that cannot be downloaded are logged and skipped.
async fn run(args: Args) -> Result<bool, Box<dyn Error>> {
    let format: Format = args.format.parse()?;
    let config = Arc::new(configure(&args)?);

    let mut gateway = Gateway::new(&config)?;
    gateway.refresh().await?;
    let license = gateway.license();
    if !license.allows(format) {
        warn!("your account may not stream {format}");
    }

    let (tx, rx) = mpsc::unbounded_channel();
    report(rx);
    let listener: Arc<dyn Listener> = Arc::new(tx);

    let transport = Client::without_cookies(&config)?;
    let downloader = Downloader::new(
        transport,
        gateway,
        NoopTagger,
        listener,
        Arc::clone(&config),
        license,
    );

    let shutdown = CancellationToken::new();
    signal::Handler::new()?.cancel_on_signal(shutdown.clone());

    let mut complete = true;
    for link in &args.links {
        if shutdown.is_cancelled() {
            break;
        }

        let objects = match downloader.catalog().link(link).await {
            Ok(link) => downloader.catalog().objects(&link, format).await,
            Err(e) => Err(e),
        };
        let objects = match objects {
            Ok(objects) => objects,
            Err(e) => {
                error!("{link}: {e}");
                complete = false;
                continue;
            }
        };
        if objects.is_empty() {
            warn!("{link}: nothing to download");
        }

        for object in objects {
            if shutdown.is_cancelled() {
                break;
            }

            let object = object.with_cancellation(shutdown.child_token());
            let summary = downloader.download(&object).await?;
            downloader.catalog().forget(&object);

            for record in &summary.errors {
                error!(
                    "{} - {}: {} ({})",
                    record.track.artist, record.track.title, record.message, record.reason
                );
            }
            complete &= summary.is_complete();
        }
    }

    Ok(complete)
}

/// Main entry point of the application.
///
/// This function initializes the logger facade, parses the command line
/// arguments, and downloads every link.
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
    let lang = String::from("en");

    info!("starting {name}/{version}; {BUILD_PROFILE}; {lang}");

    match run(args).await {
        Ok(true) => {}
        Ok(false) => process::exit(2),
        Err(e) => {
            error!("{e}");
            process::exit(1);
        }
    }
}
