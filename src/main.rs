#![forbid(unsafe_code)]

use std::{net::SocketAddr, sync::Arc};

use clap::Parser;
use eip_sim::{
    plc::{Plc, PlcKind, Route},
    server,
    tag::{TagSpec, TagStore},
};
use tokio::net::TcpListener;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(version, about = "EtherNet/IP PLC simulator serving tag reads")]
struct Cli {
    /// Controller family to impersonate: ControlLogix or Micro800
    #[arg(long)]
    plc: PlcKind,

    /// Backplane route as <port>,<slot> (ControlLogix only)
    #[arg(long)]
    path: Option<Route>,

    /// Tag declaration name:TYPE[dims]; repeatable
    #[arg(long = "tag", required = true)]
    tags: Vec<TagSpec>,

    /// Log protocol traffic, including frame hex dumps
    #[arg(long)]
    debug: bool,

    /// Listen address
    #[arg(long, default_value = "0.0.0.0:44818")]
    listen: SocketAddr,
}

#[tokio::main]
async fn main() {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            // clap renders its own message; the exit code is ours
            let _ = e.print();
            std::process::exit(if e.use_stderr() { 1 } else { 0 });
        }
    };

    init_tracing(cli.debug);

    let mut tags = TagStore::new();
    for spec in &cli.tags {
        if let Err(e) = spec.build().and_then(|tag| tags.insert(tag)) {
            error!(%e, "invalid tag declaration");
            std::process::exit(1);
        }
    }

    let plc = match Plc::new(cli.plc, cli.path, tags) {
        Ok(plc) => plc,
        Err(e) => {
            error!(%e, "invalid configuration");
            std::process::exit(1);
        }
    };

    info!(
        plc = ?plc.kind(),
        tags = plc.tags().len(),
        listen = %cli.listen,
        "starting simulator"
    );

    let listener = match TcpListener::bind(cli.listen).await {
        Ok(listener) => listener,
        Err(e) => {
            error!(%e, addr = %cli.listen, "failed to bind listener");
            std::process::exit(1);
        }
    };

    if let Err(e) = server::run(listener, Arc::new(plc)).await {
        error!(%e, "server exited with error");
        std::process::exit(1);
    }
}

fn init_tracing(debug: bool) {
    let default = if debug { "debug" } else { "info" };
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .init();
}
