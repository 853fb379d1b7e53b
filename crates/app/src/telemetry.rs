//! Tracing setup for the binary.
//!
//! - `ASSESS_LOG` holds the filter directives (defaults to `warn,services=info`).
//! - `ASSESS_LOG_FORMAT=json` switches to structured JSON lines.
//!
//! Logs go to stderr so they never interleave with the question prompts.

use tracing_subscriber::EnvFilter;

pub fn init_tracing() {
    let filter = EnvFilter::try_from_env("ASSESS_LOG")
        .unwrap_or_else(|_| EnvFilter::new("warn,services=info,app=info"));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true);

    match std::env::var("ASSESS_LOG_FORMAT").as_deref() {
        Ok("json") => builder.json().init(),
        _ => builder.init(),
    }
}
