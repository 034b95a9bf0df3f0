pub mod artifact;
pub mod config;
pub mod error;
pub mod expr;
pub mod kernel;
pub mod session;

pub use artifact::{Artifact, ArtifactKind, ArtifactSnapshot, SessionLayout};
pub use config::MathmateConfig;
pub use error::{MathmateError, Result};
pub use expr::Expr;
pub use kernel::{Kernel, KernelConnector, KernelError, Packet};
pub use session::{spawn_periodic_render, Session, SessionState};

use tracing_subscriber::EnvFilter;

/// Install a stderr `fmt` subscriber filtered by `RUST_LOG` (default `info`).
///
/// Safe to call more than once; later calls are no-ops.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}
