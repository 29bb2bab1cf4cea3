//! `loomsyncd`'s command-line surface: the declarative config file is the
//! primary source of truth (spec.md §6), so the CLI only carries a handful
//! of process-level overrides on top of it.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use clap::Parser;

fn default_config_path() -> PathBuf {
    PathBuf::from("loomsync.toml")
}

#[derive(Debug, Parser)]
#[command(name = "loomsyncd", version, about = "Bidirectional live-sync and hot-reload fabric")]
pub struct Args {
    /// Path to the project's declarative configuration file.
    #[arg(short, long, env = "LOOMSYNC_CONFIG", default_value = "loomsync.toml")]
    pub config: PathBuf,

    /// Address the control HTTP surface and WebSocket upgrade endpoint bind to.
    #[arg(short, long, env = "LOOMSYNC_LISTEN", default_value = "127.0.0.1:7890")]
    pub listen: SocketAddr,

    /// Overrides the config's `storageDir` for this run.
    #[arg(long, env = "LOOMSYNC_STORAGE_DIR")]
    pub storage_dir: Option<PathBuf>,
}

impl Args {
    pub fn config_path(&self) -> &Path {
        &self.config
    }

    pub fn listen_addr(&self) -> SocketAddr {
        self.listen
    }
}

impl Default for Args {
    fn default() -> Self {
        Self {
            config: default_config_path(),
            listen: "127.0.0.1:7890".parse().expect("valid default listen address"),
            storage_dir: None,
        }
    }
}
