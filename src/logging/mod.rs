//! Logging setup
//!
//! Installs the tracing subscriber used by the binary. Library code only emits
//! `tracing` events and never installs a subscriber itself.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Default filter directive when `RUST_LOG` is not set
pub fn default_directive(level: &str) -> String {
    format!("wallet_transport={},info", level)
}

/// Initialize tracing with an env filter and either plain or JSON output.
///
/// `RUST_LOG` wins over `level` when present. Returns an error if a global
/// subscriber was already installed.
pub fn init(level: &str, json: bool) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive(level)));

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry
            .with(tracing_subscriber::fmt::layer().json())
            .try_init()?;
    } else {
        registry.with(tracing_subscriber::fmt::layer()).try_init()?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_directive() {
        assert_eq!(default_directive("debug"), "wallet_transport=debug,info");
    }
}
