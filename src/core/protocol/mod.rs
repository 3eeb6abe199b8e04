// src/core/protocol/mod.rs

//! Request framer (spec §4.4): decodes the wire format into a reified,
//! tagged-variant `ManagementRequest` — the idiomatic replacement for the
//! source's function-pointer opcode table (spec Design Notes, "Dynamic
//! dispatch of admin handlers").

pub mod codec;
pub mod frame;
pub mod opcode;

pub use codec::{ManagementClientCodec, ManagementCodec};
pub use frame::ManagementResponse;

use crate::core::errors::BrokerError;
use bytes::{Bytes, BytesMut};
use frame::ArgValue;

/// A node tuple as carried by `INIT`/`ADD_NODE` (spec §3, §4.6).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeSpec {
    pub node_id: i32,
    pub local_dbname: String,
    pub host: String,
    pub port: i32,
}

/// The reified management request, one variant per opcode. `handle` (see
/// `core::shard::controller`) branches on this instead of walking a
/// function-pointer table.
#[derive(Debug, Clone)]
pub enum ManagementRequest {
    // --- normal-broker opcodes ---
    CasConnect,
    Ping,
    QueryCancel { slot: i32, pid: i32 },
    CasChangeMode { mode: i32 },

    // --- local-management opcodes ---
    LaunchProcess { process_id: i32, args: Vec<String> },
    GetShardMgmtInfo,
    NumShardVersionInfo,
    ReadRyeFile { path: String },
    WriteRyeConf { contents: String },
    UpdateConf { key: String, value: String },
    DeleteConf { key: String },
    GetConf { key: String },
    BrAclReload,
    SyncShardMgmtInfo { port: i32, node_hosts: Vec<String> },

    // --- shard-management opcodes ---
    GetShardInfo {
        dbname: String,
        clt_node_ver: i64,
        clt_groupid_ver: i64,
        clt_created_at: i64,
    },
    Init {
        dba_passwd: String,
        global_dbname: String,
        groupid_count: i32,
        init_nodes: Vec<NodeSpec>,
    },
    AddNode {
        node: NodeSpec,
    },
    DropNode {
        node_id: i32,
        drop_all: bool,
    },
    MigrationStart {
        groupid: i32,
        dest_nodeid: i32,
        num_shard_keys: i32,
        timeout_sec: i32,
    },
    MigrationEnd {
        success: bool,
    },
    DdlStart {
        timeout_sec: i32,
    },
    DdlEnd,
    GcStart,
    GcEnd,
    RebalanceReq {
        src: Vec<i32>,
        dest: Vec<i32>,
        empty_node: bool,
        ignore_prev_fail: bool,
    },
    RebalanceJobCount,
    PingShardMgmt,
}

fn str_arg(args: &[ArgValue], idx: usize) -> Result<String, BrokerError> {
    match args.get(idx) {
        Some(ArgValue::Str(s)) => Ok(s.clone()),
        _ => Err(BrokerError::InvalidArgument(format!(
            "expected STR argument at index {idx}"
        ))),
    }
}

fn int_arg(args: &[ArgValue], idx: usize) -> Result<i32, BrokerError> {
    match args.get(idx) {
        Some(ArgValue::Int(v)) => Ok(*v),
        _ => Err(BrokerError::InvalidArgument(format!(
            "expected INT argument at index {idx}"
        ))),
    }
}

fn int64_arg(args: &[ArgValue], idx: usize) -> Result<i64, BrokerError> {
    match args.get(idx) {
        Some(ArgValue::Int64(v)) => Ok(*v),
        _ => Err(BrokerError::InvalidArgument(format!(
            "expected INT64 argument at index {idx}"
        ))),
    }
}

fn int_array_arg(args: &[ArgValue], idx: usize) -> Result<Vec<i32>, BrokerError> {
    match args.get(idx) {
        Some(ArgValue::IntArray(v)) => Ok(v.clone()),
        _ => Err(BrokerError::InvalidArgument(format!(
            "expected INT_ARRAY argument at index {idx}"
        ))),
    }
}

fn str_array_arg(args: &[ArgValue], idx: usize) -> Result<Vec<String>, BrokerError> {
    match args.get(idx) {
        Some(ArgValue::StrArray(v)) => Ok(v.clone()),
        _ => Err(BrokerError::InvalidArgument(format!(
            "expected STR_ARRAY argument at index {idx}"
        ))),
    }
}

/// Parses `INIT`'s `init_nodes` argument: a flattened `STR_ARRAY` of
/// `"node_id|local_dbname|host|port"` tuples (one choice of several
/// reasonable wire shapes for a list-of-structs argument; the spec leaves
/// the exact tuple encoding unspecified beyond "a node tuple").
fn parse_node_specs(raw: &[String]) -> Result<Vec<NodeSpec>, BrokerError> {
    raw.iter()
        .map(|entry| {
            let parts: Vec<&str> = entry.split('|').collect();
            if parts.len() != 4 {
                return Err(BrokerError::InvalidArgument(format!(
                    "malformed node spec '{entry}'"
                )));
            }
            Ok(NodeSpec {
                node_id: parts[0].parse().map_err(|_| {
                    BrokerError::InvalidArgument(format!("bad node_id in '{entry}'"))
                })?,
                local_dbname: parts[1].to_string(),
                host: parts[2].to_string(),
                port: parts[3].parse().map_err(|_| {
                    BrokerError::InvalidArgument(format!("bad port in '{entry}'"))
                })?,
            })
        })
        .collect()
}

/// Inverse of `parse_node_specs`, used by clients (the admin CLI, the
/// local-mgmt sync loop) encoding a request to send.
fn flatten_node_specs(nodes: &[NodeSpec]) -> Vec<String> {
    nodes
        .iter()
        .map(|n| format!("{}|{}|{}|{}", n.node_id, n.local_dbname, n.host, n.port))
        .collect()
}

impl ManagementRequest {
    /// The wire opcode this request encodes to.
    pub fn opcode(&self) -> u8 {
        use opcode::*;
        match self {
            ManagementRequest::CasConnect => CAS_CONNECT,
            ManagementRequest::Ping => PING,
            ManagementRequest::QueryCancel { .. } => QUERY_CANCEL,
            ManagementRequest::CasChangeMode { .. } => CAS_CHANGE_MODE,
            ManagementRequest::LaunchProcess { .. } => LAUNCH_PROCESS,
            ManagementRequest::GetShardMgmtInfo => GET_SHARD_MGMT_INFO,
            ManagementRequest::NumShardVersionInfo => NUM_SHARD_VERSION_INFO,
            ManagementRequest::ReadRyeFile { .. } => READ_RYE_FILE,
            ManagementRequest::WriteRyeConf { .. } => WRITE_RYE_CONF,
            ManagementRequest::UpdateConf { .. } => UPDATE_CONF,
            ManagementRequest::DeleteConf { .. } => DELETE_CONF,
            ManagementRequest::GetConf { .. } => GET_CONF,
            ManagementRequest::BrAclReload => BR_ACL_RELOAD,
            ManagementRequest::SyncShardMgmtInfo { .. } => SYNC_SHARD_MGMT_INFO,
            ManagementRequest::GetShardInfo { .. } => GET_SHARD_INFO,
            ManagementRequest::Init { .. } => INIT,
            ManagementRequest::AddNode { .. } => ADD_NODE,
            ManagementRequest::DropNode { .. } => DROP_NODE,
            ManagementRequest::MigrationStart { .. } => MIGRATION_START,
            ManagementRequest::MigrationEnd { .. } => MIGRATION_END,
            ManagementRequest::DdlStart { .. } => DDL_START,
            ManagementRequest::DdlEnd => DDL_END,
            ManagementRequest::GcStart => GC_START,
            ManagementRequest::GcEnd => GC_END,
            ManagementRequest::RebalanceReq { .. } => REBALANCE_REQ,
            ManagementRequest::RebalanceJobCount => REBALANCE_JOB_COUNT,
            ManagementRequest::PingShardMgmt => PING_SHARD_MGMT,
        }
    }

    /// Arguments in the exact order `parse_request` reads them back in, so
    /// `encode` ∘ `parse_request` is the identity for every variant.
    fn args(&self) -> Vec<ArgValue> {
        match self {
            ManagementRequest::CasConnect
            | ManagementRequest::Ping
            | ManagementRequest::GetShardMgmtInfo
            | ManagementRequest::NumShardVersionInfo
            | ManagementRequest::BrAclReload
            | ManagementRequest::DdlEnd
            | ManagementRequest::GcStart
            | ManagementRequest::GcEnd
            | ManagementRequest::RebalanceJobCount
            | ManagementRequest::PingShardMgmt => vec![],

            ManagementRequest::QueryCancel { slot, pid } => {
                vec![ArgValue::Int(*slot), ArgValue::Int(*pid)]
            }
            ManagementRequest::CasChangeMode { mode } => vec![ArgValue::Int(*mode)],
            ManagementRequest::LaunchProcess { process_id, args } => {
                vec![ArgValue::Int(*process_id), ArgValue::StrArray(args.clone())]
            }
            ManagementRequest::ReadRyeFile { path } => vec![ArgValue::Str(path.clone())],
            ManagementRequest::WriteRyeConf { contents } => vec![ArgValue::Str(contents.clone())],
            ManagementRequest::UpdateConf { key, value } => {
                vec![ArgValue::Str(key.clone()), ArgValue::Str(value.clone())]
            }
            ManagementRequest::DeleteConf { key } => vec![ArgValue::Str(key.clone())],
            ManagementRequest::GetConf { key } => vec![ArgValue::Str(key.clone())],
            ManagementRequest::SyncShardMgmtInfo { port, node_hosts } => {
                vec![ArgValue::Int(*port), ArgValue::StrArray(node_hosts.clone())]
            }
            ManagementRequest::GetShardInfo {
                dbname,
                clt_node_ver,
                clt_groupid_ver,
                clt_created_at,
            } => vec![
                ArgValue::Str(dbname.clone()),
                ArgValue::Int64(*clt_node_ver),
                ArgValue::Int64(*clt_groupid_ver),
                ArgValue::Int64(*clt_created_at),
            ],
            ManagementRequest::Init {
                dba_passwd,
                global_dbname,
                groupid_count,
                init_nodes,
            } => vec![
                ArgValue::Str(dba_passwd.clone()),
                ArgValue::Str(global_dbname.clone()),
                ArgValue::Int(*groupid_count),
                ArgValue::StrArray(flatten_node_specs(init_nodes)),
            ],
            ManagementRequest::AddNode { node } => {
                vec![ArgValue::StrArray(flatten_node_specs(std::slice::from_ref(node)))]
            }
            ManagementRequest::DropNode { node_id, drop_all } => {
                vec![ArgValue::Int(*node_id), ArgValue::Int(*drop_all as i32)]
            }
            ManagementRequest::MigrationStart {
                groupid,
                dest_nodeid,
                num_shard_keys,
                timeout_sec,
            } => vec![
                ArgValue::Int(*groupid),
                ArgValue::Int(*dest_nodeid),
                ArgValue::Int(*num_shard_keys),
                ArgValue::Int(*timeout_sec),
            ],
            ManagementRequest::MigrationEnd { success } => vec![ArgValue::Int(*success as i32)],
            ManagementRequest::DdlStart { timeout_sec } => vec![ArgValue::Int(*timeout_sec)],
            ManagementRequest::RebalanceReq {
                src,
                dest,
                empty_node,
                ignore_prev_fail,
            } => vec![
                ArgValue::IntArray(src.clone()),
                ArgValue::IntArray(dest.clone()),
                ArgValue::Int(*empty_node as i32),
                ArgValue::Int(*ignore_prev_fail as i32),
            ],
        }
    }

    /// Encodes this request onto the wire: 16-byte header followed by the
    /// argument payload (spec §6). The client-side counterpart to
    /// `ManagementCodec`'s request decoder, used by the admin CLI and the
    /// local-mgmt sync loop, which both act as clients of this protocol
    /// rather than servers.
    pub fn encode(&self, version: u32) -> Bytes {
        let payload = frame::encode_args(&self.args());
        let header = frame::RequestHeader {
            opcode: self.opcode(),
            version,
            payload_len: payload.len() as u32,
        };
        let mut out = BytesMut::new();
        header.encode(&mut out);
        out.extend_from_slice(&payload);
        out.freeze()
    }
}

/// Parses a decoded argument list for the given opcode into a reified
/// `ManagementRequest`, per the typed-reader contract of spec §4.4.
pub fn parse_request(wire_opcode: u8, args: &[ArgValue]) -> Result<ManagementRequest, BrokerError> {
    use opcode::*;

    match wire_opcode {
        CAS_CONNECT => Ok(ManagementRequest::CasConnect),
        PING => Ok(ManagementRequest::Ping),
        QUERY_CANCEL => Ok(ManagementRequest::QueryCancel {
            slot: int_arg(args, 0)?,
            pid: int_arg(args, 1)?,
        }),
        CAS_CHANGE_MODE => Ok(ManagementRequest::CasChangeMode {
            mode: int_arg(args, 0)?,
        }),

        LAUNCH_PROCESS => Ok(ManagementRequest::LaunchProcess {
            process_id: int_arg(args, 0)?,
            args: str_array_arg(args, 1)?,
        }),
        GET_SHARD_MGMT_INFO => Ok(ManagementRequest::GetShardMgmtInfo),
        NUM_SHARD_VERSION_INFO => Ok(ManagementRequest::NumShardVersionInfo),
        READ_RYE_FILE => Ok(ManagementRequest::ReadRyeFile {
            path: str_arg(args, 0)?,
        }),
        WRITE_RYE_CONF => Ok(ManagementRequest::WriteRyeConf {
            contents: str_arg(args, 0)?,
        }),
        UPDATE_CONF => Ok(ManagementRequest::UpdateConf {
            key: str_arg(args, 0)?,
            value: str_arg(args, 1)?,
        }),
        DELETE_CONF => Ok(ManagementRequest::DeleteConf {
            key: str_arg(args, 0)?,
        }),
        GET_CONF => Ok(ManagementRequest::GetConf {
            key: str_arg(args, 0)?,
        }),
        BR_ACL_RELOAD => Ok(ManagementRequest::BrAclReload),
        SYNC_SHARD_MGMT_INFO => Ok(ManagementRequest::SyncShardMgmtInfo {
            port: int_arg(args, 0)?,
            node_hosts: str_array_arg(args, 1)?,
        }),

        GET_SHARD_INFO => Ok(ManagementRequest::GetShardInfo {
            dbname: str_arg(args, 0)?,
            clt_node_ver: int64_arg(args, 1)?,
            clt_groupid_ver: int64_arg(args, 2)?,
            clt_created_at: int64_arg(args, 3)?,
        }),
        INIT => {
            let raw_nodes = str_array_arg(args, 3)?;
            Ok(ManagementRequest::Init {
                dba_passwd: str_arg(args, 0)?,
                global_dbname: str_arg(args, 1)?,
                groupid_count: int_arg(args, 2)?,
                init_nodes: parse_node_specs(&raw_nodes)?,
            })
        }
        ADD_NODE => {
            let raw_nodes = str_array_arg(args, 0)?;
            let mut nodes = parse_node_specs(&raw_nodes)?;
            let node = nodes
                .pop()
                .ok_or_else(|| BrokerError::InvalidArgument("ADD_NODE requires one node".into()))?;
            Ok(ManagementRequest::AddNode { node })
        }
        DROP_NODE => Ok(ManagementRequest::DropNode {
            node_id: int_arg(args, 0)?,
            drop_all: int_arg(args, 1)? != 0,
        }),
        MIGRATION_START => Ok(ManagementRequest::MigrationStart {
            groupid: int_arg(args, 0)?,
            dest_nodeid: int_arg(args, 1)?,
            num_shard_keys: int_arg(args, 2)?,
            timeout_sec: int_arg(args, 3)?,
        }),
        MIGRATION_END => Ok(ManagementRequest::MigrationEnd {
            success: int_arg(args, 0)? != 0,
        }),
        DDL_START => Ok(ManagementRequest::DdlStart {
            timeout_sec: int_arg(args, 0)?,
        }),
        DDL_END => Ok(ManagementRequest::DdlEnd),
        GC_START => Ok(ManagementRequest::GcStart),
        GC_END => Ok(ManagementRequest::GcEnd),
        REBALANCE_REQ => Ok(ManagementRequest::RebalanceReq {
            src: int_array_arg(args, 0)?,
            dest: int_array_arg(args, 1)?,
            empty_node: int_arg(args, 2)? != 0,
            ignore_prev_fail: int_arg(args, 3)? != 0,
        }),
        REBALANCE_JOB_COUNT => Ok(ManagementRequest::RebalanceJobCount),
        PING_SHARD_MGMT => Ok(ManagementRequest::PingShardMgmt),

        _ => Err(BrokerError::InvalidOpcode),
    }
}
