//! Tracing subscriber setup: a single compact formatter, level controlled
//! by `RUST_LOG`.

use anyhow::{Context, Result};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Registry};

pub fn init_telemetry() -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .context("invalid RUST_LOG value")?;

    let fmt_layer = fmt::layer().compact().with_target(true).with_file(false).with_line_number(false);

    Registry::default().with(env_filter).with(fmt_layer).try_init().context("telemetry already initialized")?;
    Ok(())
}
