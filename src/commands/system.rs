//! PING, AUTH and INFO.
//!
//! These are dispatched ahead of the command table: PING and AUTH skip
//! the authentication gate, and INFO is produced without touching the
//! keyspace.

use super::{arity_error, lower, Engine};
use crate::error::{CommandError, Result};
use crate::protocol::Frame;
use crate::server::{Config, Session};
use bytes::Bytes;
use std::fmt::Write;

pub(super) fn ping(args: &[Bytes]) -> Result<Frame> {
    match args.len() {
        0 => Ok(Frame::pong()),
        1 => Ok(Frame::Simple(String::from_utf8_lossy(&args[0]).into_owned())),
        _ => Err(arity_error("ping").into()),
    }
}

/// AUTH remembers the submitted password on the session either way;
/// later commands compare it against the configuration, which stays
/// the source of truth for runtime password changes.
pub(super) fn auth(config: &Config, session: &Session, args: &[Bytes]) -> Result<Frame> {
    if args.len() != 1 {
        return Err(arity_error("auth").into());
    }
    let Some(required) = config.require_pass() else {
        return Err(CommandError::NoPasswordSet.into());
    };
    let submitted = String::from_utf8_lossy(&args[0]).into_owned();
    session.set_password(submitted.clone());
    if submitted != required {
        return Err(CommandError::InvalidPassword.into());
    }
    Ok(Frame::ok())
}

const ALL_SECTIONS: [&str; 3] = ["server", "client", "cluster"];

pub(super) fn info(engine: &Engine, args: &[Bytes]) -> Result<Frame> {
    if args.len() >= 2 {
        return Err(arity_error("info").into());
    }

    let sections: Vec<&str> = if args.is_empty() {
        ALL_SECTIONS.to_vec()
    } else {
        match lower(&args[0]).as_str() {
            "server" => vec!["server"],
            "client" => vec!["client"],
            "cluster" => vec!["cluster"],
            "all" | "default" => ALL_SECTIONS.to_vec(),
            _ => return Err(CommandError::InvalidSection.into()),
        }
    };

    let mut text = String::new();
    for section in sections {
        write_section(engine, section, &mut text);
    }
    Ok(Frame::bulk(text))
}

fn write_section(engine: &Engine, section: &str, out: &mut String) {
    let config = engine.config();
    match section {
        "server" => {
            let uptime = engine.started_at().elapsed().as_secs();
            out.push_str("# Server\r\n");
            let _ = write!(out, "redis_version:{}\r\n", crate::SERVER_VERSION);
            out.push_str("redis_mode:standalone\r\n");
            let _ = write!(
                out,
                "os:{} {}\r\n",
                std::env::consts::OS,
                std::env::consts::ARCH
            );
            let _ = write!(out, "arch_bits:{}\r\n", usize::BITS);
            let _ = write!(out, "process_id:{}\r\n", std::process::id());
            let _ = write!(out, "run_id:{}\r\n", config.run_id);
            let _ = write!(out, "tcp_port:{}\r\n", config.port);
            let _ = write!(out, "uptime_in_seconds:{uptime}\r\n");
            let _ = write!(out, "uptime_in_days:{}\r\n", uptime / 86_400);
            let _ = write!(
                out,
                "config_file:{}\r\n",
                config
                    .config_file
                    .as_ref()
                    .map(|p| p.display().to_string())
                    .unwrap_or_default()
            );
        }
        "client" => {
            out.push_str("# Client\r\n");
            let _ = write!(out, "connected_clients:{}\r\n", engine.client_count());
            let _ = write!(out, "maxclients:{}\r\n", config.max_clients);
        }
        "cluster" => {
            out.push_str("# Cluster\r\n");
            out.push_str("cluster_enabled:0\r\n");
        }
        _ => {}
    }
}
