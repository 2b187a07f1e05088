// LoRa link daemon: runs the gateway or node machine over the UDP bench radio.

mod archive;
mod config;
mod processor;
mod radio;
mod upload;

use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use loralink_core::{GatewayNetworkProtocol, NetworkState, NodeId, NodeNetworkProtocol};
use tracing::{info, warn};

use crate::archive::ArchivingCallbacks;
use crate::config::{Config, Role};
use crate::radio::UdpRadio;
use crate::upload::FileUploadCallbacks;

const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Command line: `[--config PATH] [gateway [ARCHIVE_DIR [COMMAND]] | node [FILE]]`.
#[derive(Debug, Default, PartialEq)]
struct Args {
    version: bool,
    config: Option<PathBuf>,
    role: Option<Role>,
    archive_dir: Option<PathBuf>,
    command: Option<String>,
    upload_file: Option<PathBuf>,
}

fn parse_args<I: IntoIterator<Item = String>>(args: I) -> Result<Args> {
    let mut out = Args::default();
    let mut positional = Vec::new();
    let mut args = args.into_iter();
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--version" | "-V" => out.version = true,
            "--config" => {
                let path = args.next().context("--config needs a path")?;
                out.config = Some(PathBuf::from(path));
            }
            flag if flag.starts_with('-') => bail!("unknown option {}", flag),
            _ => positional.push(arg),
        }
    }

    let mut positional = positional.into_iter();
    if let Some(role) = positional.next() {
        let role: Role = role.parse()?;
        out.role = Some(role);
        match role {
            Role::Gateway => {
                out.archive_dir = positional.next().map(PathBuf::from);
                out.command = positional.next();
            }
            Role::Node => out.upload_file = positional.next().map(PathBuf::from),
        }
    }
    if let Some(extra) = positional.next() {
        bail!("unexpected argument {}", extra);
    }
    Ok(out)
}

impl Args {
    fn apply(self, cfg: &mut Config) {
        if let Some(role) = self.role {
            cfg.role = role;
        }
        if let Some(dir) = self.archive_dir {
            cfg.archive_dir = dir;
        }
        if let Some(command) = self.command {
            cfg.command = Some(command);
        }
        if let Some(file) = self.upload_file {
            cfg.upload_file = Some(file);
        }
    }
}

fn main() -> Result<()> {
    let args = parse_args(std::env::args().skip(1))?;
    if args.version {
        println!("loralink-linux {}", VERSION);
        return Ok(());
    }
    let mut cfg = config::load(args.config.as_deref())?;
    args.apply(&mut cfg);

    let level = cfg
        .log_level
        .parse::<tracing::Level>()
        .unwrap_or(tracing::Level::INFO);
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .init();

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async {
        tokio::select! {
            r = run(cfg) => r,
            r = shutdown_signal() => {
                info!("shutting down");
                r
            }
        }
    })
}

async fn run(cfg: Config) -> Result<()> {
    let group: Ipv4Addr = cfg
        .multicast_group
        .parse()
        .with_context(|| format!("multicast group {:?}", cfg.multicast_group))?;
    let radio = UdpRadio::bind(group, cfg.radio_port)
        .with_context(|| format!("joining {}:{}", group, cfg.radio_port))?;
    let mut interval = tokio::time::interval(Duration::from_millis(cfg.poll_interval_ms.max(1)));

    match cfg.role {
        Role::Gateway => {
            let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
            tokio::spawn(processor::run_processor(cfg.command.clone(), rx));
            let callbacks = ArchivingCallbacks::new(cfg.archive_dir.clone()).with_completed(tx);
            let mut gateway = GatewayNetworkProtocol::new(radio, callbacks, cfg.protocol.clone());
            info!(
                "gateway archiving to {} on {}:{}",
                cfg.archive_dir.display(),
                group,
                cfg.radio_port
            );
            loop {
                interval.tick().await;
                if let Err(e) = gateway.radio_mut().poll() {
                    warn!("radio poll: {}", e);
                }
                gateway.tick();
                while let Some(lora) = gateway.radio_mut().take_incoming() {
                    gateway.push(&lora);
                }
            }
        }
        Role::Node => {
            let file = cfg
                .upload_file
                .clone()
                .context("node role needs a file to upload")?;
            let node_id = match cfg.node_id.as_deref() {
                Some(s) => s.parse::<NodeId>().context("node_id")?,
                None => NodeId::generate(),
            };
            let mut node = NodeNetworkProtocol::new(
                radio,
                FileUploadCallbacks::new(file.clone()),
                node_id,
                cfg.protocol.clone(),
            );
            info!("node {} uploading {}", node_id, file.display());
            loop {
                interval.tick().await;
                if let Err(e) = node.radio_mut().poll() {
                    warn!("radio poll: {}", e);
                }
                node.tick();
                while let Some(lora) = node.radio_mut().take_incoming() {
                    node.push(&lora);
                }
                if node.state() == NetworkState::SendFailure {
                    warn!("upload failed, starting over");
                    node.restart();
                }
            }
        }
    }
}

/// Wait for Ctrl+C or SIGTERM (Unix).
async fn shutdown_signal() -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate())?;
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
    }
    Ok(())
}
