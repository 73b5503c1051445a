//! nmdb server entry point.
//!
//! Startup order matters: settings and logging first, then the fork
//! into the background (before any thread exists), then the PID file,
//! the backend store, the database worker, and finally the network
//! event loop on a current-thread runtime.

use std::fs;
use std::sync::Arc;

use anyhow::Context;

use nmdb::backend::Store;
use nmdb::dbloop;
use nmdb::logging;
use nmdb::server;
use nmdb::settings::Settings;
use nmdb::state::ServerState;

fn main() -> anyhow::Result<()> {
    let settings = Settings::load();

    let log_handle = logging::init(&settings).context("error opening log file")?;

    if !settings.foreground {
        daemonize()?;
    }

    log::info!("starting nmdb {}", nmdb::VERSION);

    write_pid(&settings)?;

    let store =
        Store::open(settings.backend, &settings.dbpath).context("error opening the database")?;
    log::info!(
        "opened database {} with {} backend",
        settings.dbpath.display(),
        settings.backend
    );

    let srv = Arc::new(ServerState::new(settings));

    let worker = dbloop::spawn(Arc::clone(&srv), store)
        .context("error starting the database worker")?;

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("error building the event loop")?;
    let result = runtime.block_on(server::run(Arc::clone(&srv), log_handle));

    // Let the worker drain whatever the dispatcher queued before the
    // loop exited, then flush the backend.
    worker.stop();

    if let Some(pidfile) = &srv.settings.pidfile {
        let _ = fs::remove_file(pidfile);
    }

    log::info!("nmdb shutdown complete");
    result
}

fn write_pid(settings: &Settings) -> anyhow::Result<()> {
    if let Some(path) = &settings.pidfile {
        fs::write(path, format!("{}\n", std::process::id()))
            .context("error writing PID file")?;
    }
    Ok(())
}

/// Fork into the background. Must run while the process is still
/// single-threaded; the parent exits, the child detaches from the
/// controlling session and carries on.
fn daemonize() -> anyhow::Result<()> {
    let pid = unsafe { libc::fork() };
    if pid < 0 {
        anyhow::bail!("fork failed: {}", std::io::Error::last_os_error());
    }
    if pid > 0 {
        std::process::exit(0);
    }
    unsafe {
        libc::setsid();
        libc::close(0);
    }
    Ok(())
}
