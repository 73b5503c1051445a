//! Startup configuration.
//!
//! Options are parsed once at startup into an immutable [`Settings`]
//! record. The two operational modes (passive, read-only) start from
//! their CLI values but live on as runtime-mutable flags, toggled by
//! signal.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;

use clap::Parser;

use crate::backend::BackendKind;

/// Default listening port for the TCP, UDP and SCTP transports.
pub const DEFAULT_PORT: u16 = 26010;
/// Default TIPC name instance.
pub const DEFAULT_TIPC_INSTANCE: u32 = 10;
/// Default cache capacity, in entries.
pub const DEFAULT_CACHE_ENTRIES: usize = 128_000;

#[derive(Parser, Debug)]
#[command(
    name = "nmdb",
    version,
    about = "Networked in-memory cache server with a persistent key-value backend"
)]
pub struct Args {
    /// Backend to use (sled, memory, null)
    #[arg(short = 'b', value_name = "BACKEND", default_value = "sled")]
    pub backend: BackendKind,

    /// Database path
    #[arg(short = 'd', value_name = "PATH", default_value = "database")]
    pub dbpath: PathBuf,

    /// TIPC lower port number
    #[arg(short = 'l', value_name = "LOWER")]
    pub tipc_lower: Option<u32>,

    /// TIPC upper port number (defaults to the lower one)
    #[arg(short = 'L', value_name = "UPPER")]
    pub tipc_upper: Option<u32>,

    /// TCP listening port
    #[arg(short = 't', value_name = "PORT")]
    pub tcp_port: Option<u16>,

    /// TCP listening address
    #[arg(short = 'T', value_name = "ADDR")]
    pub tcp_addr: Option<IpAddr>,

    /// UDP listening port
    #[arg(short = 'u', value_name = "PORT")]
    pub udp_port: Option<u16>,

    /// UDP listening address
    #[arg(short = 'U', value_name = "ADDR")]
    pub udp_addr: Option<IpAddr>,

    /// SCTP listening port
    #[arg(short = 's', value_name = "PORT")]
    pub sctp_port: Option<u16>,

    /// SCTP listening address
    #[arg(short = 'S', value_name = "ADDR")]
    pub sctp_addr: Option<IpAddr>,

    /// Max. number of objects to cache, in thousands
    #[arg(short = 'c', value_name = "NOBJS")]
    pub cache_thousands: Option<usize>,

    /// Log to the given file instead of stdout
    #[arg(short = 'o', value_name = "FILE")]
    pub logfile: Option<PathBuf>,

    /// File to write the PID to
    #[arg(short = 'i', value_name = "FILE")]
    pub pidfile: Option<PathBuf>,

    /// Don't fork, stay in the foreground
    #[arg(short = 'f')]
    pub foreground: bool,

    /// Enable passive mode, for redundancy purposes
    #[arg(short = 'p')]
    pub passive: bool,

    /// Read-only mode
    #[arg(short = 'r')]
    pub read_only: bool,
}

/// The resolved, immutable startup settings.
#[derive(Debug, Clone)]
pub struct Settings {
    pub backend: BackendKind,
    pub dbpath: PathBuf,
    pub tipc_lower: u32,
    pub tipc_upper: u32,
    pub tcp_addr: SocketAddr,
    pub udp_addr: SocketAddr,
    pub sctp_addr: SocketAddr,
    pub cache_entries: usize,
    pub logfile: Option<PathBuf>,
    pub pidfile: Option<PathBuf>,
    pub foreground: bool,
    pub passive: bool,
    pub read_only: bool,
}

impl Settings {
    /// Parse the process arguments and resolve defaults.
    pub fn load() -> Settings {
        Args::parse().into()
    }
}

impl From<Args> for Settings {
    fn from(args: Args) -> Settings {
        let any = IpAddr::V4(Ipv4Addr::UNSPECIFIED);
        let tipc_lower = args.tipc_lower.unwrap_or(DEFAULT_TIPC_INSTANCE);
        Settings {
            backend: args.backend,
            dbpath: args.dbpath,
            tipc_lower,
            tipc_upper: args.tipc_upper.unwrap_or(tipc_lower),
            tcp_addr: SocketAddr::new(
                args.tcp_addr.unwrap_or(any),
                args.tcp_port.unwrap_or(DEFAULT_PORT),
            ),
            udp_addr: SocketAddr::new(
                args.udp_addr.unwrap_or(any),
                args.udp_port.unwrap_or(DEFAULT_PORT),
            ),
            sctp_addr: SocketAddr::new(
                args.sctp_addr.unwrap_or(any),
                args.sctp_port.unwrap_or(DEFAULT_PORT),
            ),
            cache_entries: args
                .cache_thousands
                .map(|n| n * 1000)
                .unwrap_or(DEFAULT_CACHE_ENTRIES),
            logfile: args.logfile,
            pidfile: args.pidfile,
            foreground: args.foreground,
            passive: args.passive,
            read_only: args.read_only,
        }
    }
}

impl Default for Settings {
    fn default() -> Settings {
        Args::parse_from(["nmdb"]).into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_resolve() {
        let s = Settings::default();
        assert_eq!(s.backend, BackendKind::Sled);
        assert_eq!(s.dbpath, PathBuf::from("database"));
        assert_eq!(s.tipc_lower, DEFAULT_TIPC_INSTANCE);
        assert_eq!(s.tipc_upper, s.tipc_lower);
        assert_eq!(s.tcp_addr.port(), DEFAULT_PORT);
        assert!(s.tcp_addr.ip().is_unspecified());
        assert_eq!(s.cache_entries, DEFAULT_CACHE_ENTRIES);
        assert!(!s.foreground);
        assert!(!s.passive);
        assert!(!s.read_only);
    }

    #[test]
    fn cache_size_is_given_in_thousands() {
        let s: Settings = Args::parse_from(["nmdb", "-c", "64"]).into();
        assert_eq!(s.cache_entries, 64_000);
    }

    #[test]
    fn upper_tipc_port_follows_lower() {
        let s: Settings = Args::parse_from(["nmdb", "-l", "20"]).into();
        assert_eq!(s.tipc_lower, 20);
        assert_eq!(s.tipc_upper, 20);

        let s: Settings = Args::parse_from(["nmdb", "-l", "20", "-L", "30"]).into();
        assert_eq!(s.tipc_upper, 30);
    }

    #[test]
    fn explicit_addresses_and_flags() {
        let s: Settings = Args::parse_from([
            "nmdb", "-b", "memory", "-t", "9000", "-T", "127.0.0.1", "-f", "-r",
        ])
        .into();
        assert_eq!(s.backend, BackendKind::Memory);
        assert_eq!(s.tcp_addr, "127.0.0.1:9000".parse().unwrap());
        assert!(s.foreground);
        assert!(s.read_only);
        // UDP keeps its own defaults.
        assert_eq!(s.udp_addr.port(), DEFAULT_PORT);
    }
}
