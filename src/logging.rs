//! Logging setup.
//!
//! Log lines go through the `log` facade to an env_logger backend.
//! Without `-o` they land on stdout; with it they append to the given
//! file through a shared writer that SIGHUP can reopen in place, so log
//! rotation never needs a restart.

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::settings::Settings;

/// Handle to a reopenable log file.
#[derive(Clone)]
pub struct LogHandle {
    path: PathBuf,
    file: Arc<Mutex<File>>,
}

impl LogHandle {
    pub fn open(path: &Path) -> io::Result<LogHandle> {
        Ok(LogHandle {
            path: path.to_path_buf(),
            file: Arc::new(Mutex::new(open_log(path)?)),
        })
    }

    /// Swap the underlying file for a freshly opened one. On failure
    /// the old file stays in place.
    pub fn reopen(&self) -> io::Result<()> {
        let fresh = open_log(&self.path)?;
        *self.file.lock() = fresh;
        Ok(())
    }
}

fn open_log(path: &Path) -> io::Result<File> {
    OpenOptions::new().create(true).append(true).open(path)
}

struct LogWriter(LogHandle);

impl Write for LogWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.file.lock().write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.0.file.lock().flush()
    }
}

/// Initialize the logger. Returns a handle when logging to a file, so
/// the SIGHUP handler can reopen it.
pub fn init(settings: &Settings) -> io::Result<Option<LogHandle>> {
    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"));
    match &settings.logfile {
        Some(path) if path.as_os_str() != "-" => {
            let handle = LogHandle::open(path)?;
            builder.target(env_logger::Target::Pipe(Box::new(LogWriter(
                handle.clone(),
            ))));
            builder.init();
            Ok(Some(handle))
        }
        _ => {
            builder.target(env_logger::Target::Stdout);
            builder.init();
            Ok(None)
        }
    }
}
