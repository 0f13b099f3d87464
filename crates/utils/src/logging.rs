//! Process-wide tracing setup, optionally forwarding to Sentry.

use sentry::ClientInitGuard;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Filter used when `RUST_LOG` is not set
pub const DEFAULT_FILTER: &str = "info,sqlx=warn";

/// Install the global subscriber.
///
/// When a non-empty DSN is given, Sentry is initialised and tracing events are
/// forwarded to it. The returned guard must be kept alive for the lifetime of
/// the process so queued events are flushed on shutdown.
pub fn init(sentry_dsn: Option<&str>) -> Option<ClientInitGuard> {
    let guard = sentry_dsn
        .map(str::trim)
        .filter(|dsn| !dsn.is_empty())
        .map(|dsn| {
            sentry::init((
                dsn,
                sentry::ClientOptions {
                    release: sentry::release_name!(),
                    ..Default::default()
                },
            ))
        });

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    let registry = tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer());

    let installed = if guard.is_some() {
        registry.with(sentry_tracing::layer()).try_init()
    } else {
        registry.try_init()
    };
    if let Err(e) = installed {
        tracing::warn!("Tracing subscriber already installed: {}", e);
    }

    guard
}
