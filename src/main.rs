// src/main.rs

//! One multiplexed binary for the broker daemon and its admin surface (spec
//! §6 CLI surface): `service start` runs the process described by a config
//! file; `broker`/`shard`/`localmgmt` send a framed management request to an
//! already-running broker and print its response.

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use futures::{SinkExt, StreamExt};
use shardbroker::config::Config;
use shardbroker::core::protocol::{ManagementClientCodec, ManagementRequest, NodeSpec};
use shardbroker::server;
use tokio::net::TcpStream;
use tokio_util::codec::Framed;
use tracing::error;

#[derive(Parser)]
#[command(name = "shardbroker", version, about = "Sharded-database broker and shard-management CLI")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Manages the broker process itself.
    Service {
        #[command(subcommand)]
        action: ServiceAction,
    },
    /// Admin calls against a normal broker's control port.
    Broker {
        /// host:port of the broker's control listener.
        #[arg(long)]
        addr: String,
        #[command(subcommand)]
        action: BrokerAction,
    },
    /// Admin calls against a shard-management broker.
    Shard {
        #[arg(long)]
        addr: String,
        #[command(subcommand)]
        action: ShardAction,
    },
    /// Admin calls against a local-management broker.
    Localmgmt {
        #[arg(long)]
        addr: String,
        #[command(subcommand)]
        action: LocalMgmtAction,
    },
}

#[derive(Subcommand)]
enum ServiceAction {
    /// Loads the config file and runs every configured broker until shutdown.
    Start {
        #[arg(long, default_value = "config.toml")]
        config: String,
    },
    /// Validates the config file without starting anything.
    Status {
        #[arg(long, default_value = "config.toml")]
        config: String,
    },
}

#[derive(Subcommand)]
enum BrokerAction {
    Ping,
    Changemode {
        mode: i32,
    },
    /// Cancels a running query by worker slot and pid.
    Test {
        slot: i32,
        pid: i32,
    },
}

#[derive(Subcommand)]
enum ShardAction {
    Info {
        dbname: String,
    },
    Init {
        dba_passwd: String,
        global_dbname: String,
        groupid_count: i32,
        /// Repeatable `node_id:local_dbname:host:port` tuples.
        #[arg(long = "node", required = true)]
        nodes: Vec<String>,
    },
    AddNode {
        node_id: i32,
        local_dbname: String,
        host: String,
        port: i32,
    },
    DropNode {
        node_id: i32,
        #[arg(long)]
        drop_all: bool,
    },
    MigrationStart {
        groupid: i32,
        dest_nodeid: i32,
        num_shard_keys: i32,
        timeout_sec: i32,
    },
    MigrationEnd {
        #[arg(long)]
        success: bool,
    },
    DdlStart {
        timeout_sec: i32,
    },
    DdlEnd,
    GcStart,
    GcEnd,
    Rebalance {
        #[arg(long = "src", required = true)]
        src: Vec<i32>,
        #[arg(long = "dest", required = true)]
        dest: Vec<i32>,
        #[arg(long)]
        empty_node: bool,
        #[arg(long)]
        ignore_prev_fail: bool,
    },
    RebalanceJobCount,
    Ping,
}

#[derive(Subcommand)]
enum LocalMgmtAction {
    Launch { process_id: i32, args: Vec<String> },
    GetShardMgmtInfo,
    NumShardVersionInfo,
    ReadRyeFile { path: String },
    UpdateConf { key: String, value: String },
    DeleteConf { key: String },
    GetConf { key: String },
    AclReload,
}

fn parse_node_tuple(raw: &str) -> Result<NodeSpec> {
    let parts: Vec<&str> = raw.split(':').collect();
    if parts.len() != 4 {
        bail!("malformed node tuple '{raw}', expected node_id:local_dbname:host:port");
    }
    Ok(NodeSpec {
        node_id: parts[0].parse().context("node_id")?,
        local_dbname: parts[1].to_string(),
        host: parts[2].to_string(),
        port: parts[3].parse().context("port")?,
    })
}

async fn send_request(addr: &str, request: ManagementRequest) -> Result<()> {
    let stream = TcpStream::connect(addr)
        .await
        .with_context(|| format!("connecting to {addr}"))?;
    let mut framed = Framed::new(stream, ManagementClientCodec::default());

    framed.send(request).await.context("sending request")?;

    match framed.next().await {
        Some(Ok(response)) if response.error_code == 0 => {
            for body in &response.bodies {
                println!("{}", String::from_utf8_lossy(body));
            }
            Ok(())
        }
        Some(Ok(response)) => bail!("broker returned error code {}", response.error_code),
        Some(Err(e)) => Err(e.into()),
        None => bail!("broker closed the connection without a response"),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()))
        .compact()
        .init();

    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        error!("{e:#}");
        std::process::exit(1);
    }
    Ok(())
}

async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Service { action } => match action {
            ServiceAction::Start { config } => {
                let config = Config::from_file(&config)?;
                server::run(config).await
            }
            ServiceAction::Status { config } => {
                Config::from_file(&config)?;
                println!("config is valid");
                Ok(())
            }
        },
        Command::Broker { addr, action } => match action {
            BrokerAction::Ping => send_request(&addr, ManagementRequest::Ping).await,
            BrokerAction::Changemode { mode } => {
                send_request(&addr, ManagementRequest::CasChangeMode { mode }).await
            }
            BrokerAction::Test { slot, pid } => {
                send_request(&addr, ManagementRequest::QueryCancel { slot, pid }).await
            }
        },
        Command::Shard { addr, action } => match action {
            ShardAction::Info { dbname } => {
                send_request(
                    &addr,
                    ManagementRequest::GetShardInfo {
                        dbname,
                        clt_node_ver: 0,
                        clt_groupid_ver: 0,
                        clt_created_at: 0,
                    },
                )
                .await
            }
            ShardAction::Init {
                dba_passwd,
                global_dbname,
                groupid_count,
                nodes,
            } => {
                let init_nodes = nodes
                    .iter()
                    .map(|n| parse_node_tuple(n))
                    .collect::<Result<Vec<_>>>()?;
                send_request(
                    &addr,
                    ManagementRequest::Init {
                        dba_passwd,
                        global_dbname,
                        groupid_count,
                        init_nodes,
                    },
                )
                .await
            }
            ShardAction::AddNode { node_id, local_dbname, host, port } => {
                send_request(
                    &addr,
                    ManagementRequest::AddNode {
                        node: NodeSpec { node_id, local_dbname, host, port },
                    },
                )
                .await
            }
            ShardAction::DropNode { node_id, drop_all } => {
                send_request(&addr, ManagementRequest::DropNode { node_id, drop_all }).await
            }
            ShardAction::MigrationStart { groupid, dest_nodeid, num_shard_keys, timeout_sec } => {
                send_request(
                    &addr,
                    ManagementRequest::MigrationStart { groupid, dest_nodeid, num_shard_keys, timeout_sec },
                )
                .await
            }
            ShardAction::MigrationEnd { success } => {
                send_request(&addr, ManagementRequest::MigrationEnd { success }).await
            }
            ShardAction::DdlStart { timeout_sec } => {
                send_request(&addr, ManagementRequest::DdlStart { timeout_sec }).await
            }
            ShardAction::DdlEnd => send_request(&addr, ManagementRequest::DdlEnd).await,
            ShardAction::GcStart => send_request(&addr, ManagementRequest::GcStart).await,
            ShardAction::GcEnd => send_request(&addr, ManagementRequest::GcEnd).await,
            ShardAction::Rebalance { src, dest, empty_node, ignore_prev_fail } => {
                send_request(
                    &addr,
                    ManagementRequest::RebalanceReq { src, dest, empty_node, ignore_prev_fail },
                )
                .await
            }
            ShardAction::RebalanceJobCount => {
                send_request(&addr, ManagementRequest::RebalanceJobCount).await
            }
            ShardAction::Ping => send_request(&addr, ManagementRequest::PingShardMgmt).await,
        },
        Command::Localmgmt { addr, action } => match action {
            LocalMgmtAction::Launch { process_id, args } => {
                send_request(&addr, ManagementRequest::LaunchProcess { process_id, args }).await
            }
            LocalMgmtAction::GetShardMgmtInfo => {
                send_request(&addr, ManagementRequest::GetShardMgmtInfo).await
            }
            LocalMgmtAction::NumShardVersionInfo => {
                send_request(&addr, ManagementRequest::NumShardVersionInfo).await
            }
            LocalMgmtAction::ReadRyeFile { path } => {
                send_request(&addr, ManagementRequest::ReadRyeFile { path }).await
            }
            LocalMgmtAction::UpdateConf { key, value } => {
                send_request(&addr, ManagementRequest::UpdateConf { key, value }).await
            }
            LocalMgmtAction::DeleteConf { key } => {
                send_request(&addr, ManagementRequest::DeleteConf { key }).await
            }
            LocalMgmtAction::GetConf { key } => {
                send_request(&addr, ManagementRequest::GetConf { key }).await
            }
            LocalMgmtAction::AclReload => {
                send_request(&addr, ManagementRequest::BrAclReload).await
            }
        },
    }
}
