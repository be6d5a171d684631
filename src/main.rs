use anyhow::{bail, Result};
use clap::Parser;
use rad_core::config::Config;
use rad_core::types::RadConf;
use rad_engine::Engine;
use rad_frontend::{open_icmp6_socket, Frontend};
use rad_msg::records::RaIfaceRecord;
use rad_msg::{Imsg, ImsgChannel, ImsgType};
use std::os::fd::OwnedFd;
use std::path::{Path, PathBuf};
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

#[derive(Parser)]
#[command(name = "rad", about = "rad - IPv6 router advertisement daemon")]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "/etc/rad.toml")]
    config: PathBuf,

    /// Check the configuration file and exit
    #[arg(short = 'n', long)]
    check: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = Config::from_file(&cli.config)?;
    if cli.check {
        println!("configuration OK");
        return Ok(());
    }

    init_logging(&config.logging);

    // Everything runs on one thread; the services never share state.
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    runtime.block_on(run(cli.config, config))
}

async fn run(path: PathBuf, config: Config) -> Result<()> {
    info!(
        config = %path.display(),
        interfaces = config.interfaces.len(),
        "starting rad"
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut tasks = Vec::new();

    let (mut frontend_chan, frontend_main) = ImsgChannel::pair()?;
    let (frontend_engine, engine_frontend) = ImsgChannel::pair()?;

    let frontend = Frontend::new(frontend_main);
    let rx = shutdown_rx.clone();
    tasks.push(tokio::spawn(async move {
        if let Err(e) = frontend.run(rx).await {
            error!("frontend error: {e}");
        }
    }));

    let engine = Engine::new(engine_frontend);
    let rx = shutdown_rx.clone();
    tasks.push(tokio::spawn(async move {
        if let Err(e) = engine.run(rx).await {
            error!("engine error: {e}");
        }
    }));

    // Wire the frontend to the engine, then hand it the raw socket
    let handoff = Imsg::empty(ImsgType::SocketIpc).with_fd(frontend_engine.into_fd()?);
    frontend_chan.send(handoff).await?;

    let sock = open_icmp6_socket()?;
    let handoff = Imsg::empty(ImsgType::Icmp6Sock).with_fd(OwnedFd::from(sock));
    frontend_chan.send(handoff).await?;

    send_config(&mut frontend_chan, &config.to_rad_conf()).await?;
    frontend_chan.send(Imsg::empty(ImsgType::Startup)).await?;
    wait_startup(&mut frontend_chan).await?;
    info!("rad started");

    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sighup = signal(SignalKind::hangup())?;
    let mut failed = false;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("interrupt received, stopping services...");
                break;
            }
            _ = sigterm.recv() => {
                info!("terminate signal received, stopping services...");
                break;
            }
            _ = sighup.recv() => {
                info!("reloading configuration");
                if reload(&path, &mut frontend_chan).await? {
                    info!("configuration reloaded");
                }
            }
            msg = frontend_chan.recv() => match msg? {
                Some(imsg) => debug!("unexpected imsg {} from frontend", imsg.kind),
                None => {
                    error!("frontend exited");
                    failed = true;
                    break;
                }
            },
        }
    }

    let _ = shutdown_tx.send(true);
    if let Err(e) = frontend_chan.shutdown().await {
        debug!("closing frontend channel: {e}");
    }

    for task in tasks {
        let _ = task.await;
    }

    if failed {
        bail!("rad stopped after a fatal error");
    }
    info!("rad stopped");
    Ok(())
}

/// Stream one configuration transaction to the frontend.
async fn send_config(chan: &mut ImsgChannel, conf: &RadConf) -> Result<()> {
    chan.compose_record(ImsgType::ReconfConf, &conf.options).await?;

    for iface in &conf.interfaces {
        let rec = RaIfaceRecord::new(&iface.name, iface.options)?;
        chan.compose_record(ImsgType::ReconfRaIface, &rec).await?;

        if let Some(ref rule) = iface.autoprefix {
            chan.compose_record(ImsgType::ReconfRaAutoprefix, rule).await?;
        }
        for prefix in &iface.prefixes {
            chan.compose_record(ImsgType::ReconfRaPrefix, prefix).await?;
        }
    }

    chan.send(Imsg::empty(ImsgType::ReconfEnd)).await?;
    debug!("sent configuration for {} interface(s)", conf.interfaces.len());
    Ok(())
}

async fn wait_startup(chan: &mut ImsgChannel) -> Result<()> {
    loop {
        match chan.recv().await? {
            Some(imsg) if imsg.message_type() == Some(ImsgType::StartupDone) => return Ok(()),
            Some(imsg) => debug!("unexpected imsg {} during startup", imsg.kind),
            None => bail!("frontend exited during startup"),
        }
    }
}

/// Re-read the file and send it as a new transaction. A bad file keeps the
/// running configuration and returns `false`.
async fn reload(path: &Path, chan: &mut ImsgChannel) -> Result<bool> {
    let config = match Config::from_file(path) {
        Ok(config) => config,
        Err(e) => {
            warn!("reload failed, keeping current configuration: {e}");
            return Ok(false);
        }
    };
    send_config(chan, &config.to_rad_conf()).await?;
    Ok(true)
}

fn init_logging(config: &rad_core::config::LoggingConfig) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.level));

    match config.format.as_str() {
        "json" => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .json()
                .init();
        }
        _ => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .init();
        }
    }
}
