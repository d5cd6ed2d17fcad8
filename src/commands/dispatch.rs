//! The dispatch engine: the front door for every command.
//!
//! `exec` applies connection-state checks (admission, authentication),
//! routes PING/AUTH/INFO ahead of the keyspace, then consults the
//! command table: validate arity, extract the write/read key sets,
//! acquire the ordered shard locks, run the executor, release. A panic
//! inside an executor is caught, logged with a backtrace, and surfaced
//! as the generic unknown-error reply.

use super::registry::{CommandTable, Handler};
use super::{lower, system};
use crate::error::CommandError;
use crate::protocol::Frame;
use crate::server::{Config, Session};
use crate::storage::{panic_message, Db};
use bytes::Bytes;
use std::backtrace::Backtrace;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::error;

/// The command engine: owns the keyspace, the command table, and the
/// counters INFO reports.
pub struct Engine {
    db: Arc<Db>,
    table: CommandTable,
    config: Arc<Config>,
    clients: AtomicUsize,
    started_at: Instant,
}

impl Engine {
    /// Build the engine: keyspace, expiration wheel, and command
    /// table. Must be called from within a tokio runtime.
    pub fn new(config: Arc<Config>) -> Self {
        Self {
            db: Db::new(),
            table: CommandTable::new(),
            config,
            clients: AtomicUsize::new(0),
            started_at: Instant::now(),
        }
    }

    /// The keyspace.
    pub fn db(&self) -> &Arc<Db> {
        &self.db
    }

    /// The server configuration.
    pub fn config(&self) -> &Arc<Config> {
        &self.config
    }

    /// Number of currently connected clients.
    pub fn client_count(&self) -> usize {
        self.clients.load(Ordering::Relaxed)
    }

    /// When the engine was created, for INFO uptime reporting.
    pub fn started_at(&self) -> Instant {
        self.started_at
    }

    /// Record a new connection; returns the updated client count.
    pub fn register_client(&self) -> usize {
        self.clients.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Record a closed connection.
    pub fn unregister_client(&self) {
        self.clients.fetch_sub(1, Ordering::Relaxed);
    }

    /// Stop background work (the expiration wheel).
    pub fn shutdown(&self) {
        self.db.shutdown();
    }

    /// Execute one command line for `session` and produce the reply
    /// frame.
    pub async fn exec(&self, session: &Session, tokens: &[Bytes]) -> Frame {
        if tokens.is_empty() {
            return error_frame(CommandError::UnknownCommand(String::new()));
        }
        if !session.admitted() {
            return error_frame(CommandError::MaxClients);
        }

        let name = lower(&tokens[0]);
        let args = &tokens[1..];

        // PING and AUTH bypass authentication.
        match name.as_str() {
            "ping" => return reply(system::ping(args)),
            "auth" => return reply(system::auth(&self.config, session, args)),
            _ => {}
        }

        if !self.authenticated(session) {
            return error_frame(CommandError::AuthRequired);
        }

        // INFO is produced outside the keyspace.
        if name == "info" {
            return reply(system::info(self, args));
        }

        let Some(command) = self.table.get(&name) else {
            return error_frame(CommandError::UnknownCommand(name));
        };
        if !command.validate_arity(tokens.len()) {
            return error_frame(CommandError::WrongArity { command: name });
        }

        match &command.handler {
            Handler::Locked { keys, exec } => {
                let (write_keys, read_keys) = keys(args);
                let exec = *exec;
                let outcome = catch_unwind(AssertUnwindSafe(|| {
                    let mut view = self.db.view(&write_keys, &read_keys);
                    exec(&mut view, args)
                }));
                match outcome {
                    Ok(result) => reply(result),
                    Err(panic) => {
                        error!(
                            command = %name,
                            panic = %panic_message(&panic),
                            backtrace = %Backtrace::force_capture(),
                            "executor panicked"
                        );
                        error_frame(CommandError::Unknown)
                    }
                }
            }
            Handler::SelfLocking { exec } => {
                // Run on a separate task so a panic surfaces as a
                // JoinError instead of unwinding through the engine.
                let future = exec(Arc::clone(&self.db), args.to_vec());
                match tokio::spawn(future).await {
                    Ok(result) => reply(result),
                    Err(join_error) => {
                        error!(command = %name, %join_error, "executor task failed");
                        error_frame(CommandError::Unknown)
                    }
                }
            }
        }
    }

    /// A session is authenticated when no password is configured, or
    /// when the password it presented matches the configured one. The
    /// configuration is the source of truth and is re-read on every
    /// command.
    fn authenticated(&self, session: &Session) -> bool {
        match self.config.require_pass() {
            None => true,
            Some(required) => session.password().as_deref() == Some(required.as_str()),
        }
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("commands", &self.table.len())
            .field("keys", &self.db.len())
            .field("clients", &self.client_count())
            .finish()
    }
}

fn reply(result: crate::error::Result<Frame>) -> Frame {
    match result {
        Ok(frame) => frame,
        Err(e) => Frame::Error(e.to_resp()),
    }
}

fn error_frame(e: CommandError) -> Frame {
    Frame::Error(e.to_string())
}
