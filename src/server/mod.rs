//! The network front-end.
//!
//! All listeners plus the signal streams run on one current-thread
//! event loop. The loop owns the cache and the statistics counters;
//! the only channel to the database thread is the work queue, and the
//! only way back is the reply handle inside each entry.

use std::sync::Arc;

use anyhow::Context;
use tokio::signal::unix::{signal, SignalKind};
use tokio::task::JoinHandle;

use crate::logging::LogHandle;
use crate::state::ServerState;

#[cfg(any(feature = "tipc", feature = "sctp"))]
pub mod raw;
#[cfg(feature = "sctp")]
pub mod sctp;
pub mod tcp;
#[cfg(feature = "tipc")]
pub mod tipc;
pub mod udp;

/// Bind every transport and serve until SIGTERM or SIGINT.
pub async fn run(srv: Arc<ServerState>, log_handle: Option<LogHandle>) -> anyhow::Result<()> {
    let mut tasks: Vec<JoinHandle<()>> = Vec::new();

    #[cfg(feature = "tipc")]
    {
        let socket = tipc::bind(srv.settings.tipc_lower, srv.settings.tipc_upper)
            .context("error initializing tipc")?;
        log::info!(
            "tipc listener on type {} instances {}..{}",
            tipc::TIPC_SERVER_TYPE,
            srv.settings.tipc_lower,
            srv.settings.tipc_upper
        );
        tasks.push(tokio::spawn(tipc::serve(
            Arc::clone(&srv),
            Arc::new(socket),
        )));
    }

    let listener = tcp::bind(srv.settings.tcp_addr).context("error initializing tcp")?;
    log::info!("tcp listener on {}", srv.settings.tcp_addr);
    tasks.push(tokio::spawn(tcp::serve(Arc::clone(&srv), listener)));

    let socket = udp::bind(srv.settings.udp_addr)
        .await
        .context("error initializing udp")?;
    log::info!("udp listener on {}", srv.settings.udp_addr);
    tasks.push(tokio::spawn(udp::serve(Arc::clone(&srv), Arc::new(socket))));

    #[cfg(feature = "sctp")]
    {
        let socket = sctp::bind(srv.settings.sctp_addr).context("error initializing sctp")?;
        log::info!("sctp listener on {}", srv.settings.sctp_addr);
        tasks.push(tokio::spawn(sctp::serve(
            Arc::clone(&srv),
            Arc::new(socket),
        )));
    }

    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sighup = signal(SignalKind::hangup())?;
    let mut sigusr1 = signal(SignalKind::user_defined1())?;
    let mut sigusr2 = signal(SignalKind::user_defined2())?;

    loop {
        tokio::select! {
            _ = sigterm.recv() => {
                log::info!("got SIGTERM, shutting down");
                break;
            }
            _ = sigint.recv() => {
                log::info!("got SIGINT, shutting down");
                break;
            }
            _ = sighup.recv() => {
                match &log_handle {
                    Some(handle) => match handle.reopen() {
                        Ok(()) => log::info!("log reopened"),
                        Err(e) => log::error!("error reopening log: {}", e),
                    },
                    None => log::debug!("got SIGHUP but not logging to a file"),
                }
            }
            _ = sigusr1.recv() => {
                if srv.flags.latch_read_only() {
                    log::info!("changing to read-only mode");
                } else {
                    log::info!("got signal, but already in read-only mode");
                }
            }
            _ = sigusr2.recv() => {
                let passive = srv.flags.toggle_passive();
                log::info!("passive mode {}", if passive { "enabled" } else { "disabled" });
            }
        }
    }

    for task in &tasks {
        task.abort();
    }
    Ok(())
}
