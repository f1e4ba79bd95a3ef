//! Logging bootstrap
//!
//! Installs a `tracing` subscriber with an `EnvFilter` (honouring `RUST_LOG`)
//! and a formatting layer. Safe to call more than once.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Filter used when `RUST_LOG` is not set
pub const DEFAULT_FILTER: &str = "xnote_core=debug,info";

/// Initialize logging. Returns `false` when a global subscriber was
/// already installed (by an earlier call or by the host application).
pub fn init(default_filter: &str) -> bool {
    let installed = tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .try_init()
        .is_ok();

    if installed {
        tracing::info!("Logging initialized");
    }

    installed
}
