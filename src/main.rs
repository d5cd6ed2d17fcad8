//! Basalt server binary: CLI arguments, configuration, logging, and
//! signal wiring around [`basalt::Server`].

use basalt::{Config, Server, VERSION};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{fmt, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args: Vec<String> = std::env::args().collect();
    let cli = parse_args(&args);

    if cli.help {
        print_help();
        return Ok(());
    }
    if cli.version {
        println!("basalt-server {VERSION}");
        return Ok(());
    }

    let mut config = if let Some(ref path) = cli.config {
        match Config::load_from_file(path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("error loading config file: {e}");
                std::process::exit(1);
            }
        }
    } else {
        Config::default()
    };

    // CLI flags override file values.
    if let Some(port) = cli.port {
        config.port = port;
    }
    if let Some(bind) = cli.bind {
        config.bind = bind;
    }
    if let Some(dir) = cli.dir {
        config.dir = dir;
    }
    if let Some(password) = cli.requirepass {
        config.set_require_pass(Some(password));
    }

    init_logging(cli.logfile.as_deref())?;

    info!("basalt {} starting on {}:{}", VERSION, config.bind, config.port);

    let server = Arc::new(Server::new(config));

    spawn_signal_handlers(Arc::clone(&server));

    if let Err(e) = server.run().await {
        error!(error = %e, "server terminated");
        std::process::exit(1);
    }
    Ok(())
}

fn init_logging(logfile: Option<&std::path::Path>) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    match logfile {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)?;
            fmt()
                .with_env_filter(filter)
                .with_target(false)
                .with_ansi(false)
                .with_writer(file)
                .init();
        }
        None => {
            fmt().with_env_filter(filter).with_target(false).init();
        }
    }
    Ok(())
}

/// SIGHUP, SIGINT, SIGQUIT and SIGTERM all initiate graceful shutdown.
fn spawn_signal_handlers(server: Arc<Server>) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        for kind in [
            SignalKind::hangup(),
            SignalKind::interrupt(),
            SignalKind::quit(),
            SignalKind::terminate(),
        ] {
            let server = Arc::clone(&server);
            tokio::spawn(async move {
                let Ok(mut stream) = signal(kind) else {
                    return;
                };
                stream.recv().await;
                info!("received shutdown signal");
                server.shutdown();
            });
        }
    }

    #[cfg(not(unix))]
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("received shutdown signal");
            server.shutdown();
        }
    });
}

struct CliArgs {
    config: Option<PathBuf>,
    port: Option<u16>,
    bind: Option<String>,
    dir: Option<PathBuf>,
    requirepass: Option<String>,
    logfile: Option<PathBuf>,
    help: bool,
    version: bool,
}

fn parse_args(args: &[String]) -> CliArgs {
    let mut cli = CliArgs {
        config: None,
        port: None,
        bind: None,
        dir: None,
        requirepass: None,
        logfile: None,
        help: false,
        version: false,
    };

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--config" | "-c" => {
                i += 1;
                cli.config = args.get(i).map(PathBuf::from);
            }
            "--port" | "-p" => {
                i += 1;
                cli.port = args.get(i).and_then(|s| s.parse().ok());
            }
            "--bind" | "-b" => {
                i += 1;
                cli.bind = args.get(i).cloned();
            }
            "--dir" => {
                i += 1;
                cli.dir = args.get(i).map(PathBuf::from);
            }
            "--requirepass" | "-a" => {
                i += 1;
                cli.requirepass = args.get(i).cloned();
            }
            "--logfile" => {
                i += 1;
                cli.logfile = args.get(i).map(PathBuf::from);
            }
            "--help" | "-h" => cli.help = true,
            "--version" | "-v" => cli.version = true,
            other => {
                eprintln!("unknown option: {other}");
                cli.help = true;
            }
        }
        i += 1;
    }
    cli
}

fn print_help() {
    println!(
        r"basalt-server {VERSION} - a Redis-compatible in-memory key-value server

USAGE:
    basalt-server [OPTIONS]

OPTIONS:
    -c, --config <FILE>      Load configuration from file
    -p, --port <PORT>        Listen port (default: 6379)
    -b, --bind <ADDR>        Listen address (default: 127.0.0.1)
        --dir <DIR>          Working directory for temp files
    -a, --requirepass <PWD>  Require AUTH with this password
        --logfile <FILE>     Append logs to file instead of stdout
    -h, --help               Print this help message
    -v, --version            Print version information

SIGNALS:
    SIGHUP/SIGINT/SIGQUIT/SIGTERM initiate graceful shutdown.
"
    );
}
