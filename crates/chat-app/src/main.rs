use formchat_app::app::RuntimeSnafu;
use formchat_app::{AppError, ChatShell, SettingsStore};
use snafu::ResultExt;
use tokio::task::LocalSet;
use tracing_subscriber::EnvFilter;

/// Reads chat input from stdin and prints the conversation to stdout.
///
/// Logs go to stderr; set `RUST_LOG` (for example `RUST_LOG=formchat=debug`) to see them.
fn main() -> Result<(), AppError> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context(RuntimeSnafu {
            stage: "build-runtime",
        })?;

    let settings = SettingsStore::load();
    tracing::info!(
        path = %settings.config_path().display(),
        endpoint = %settings.settings().chat_api_url,
        "settings loaded"
    );

    let shell = ChatShell::new(settings)?;
    LocalSet::new().block_on(&runtime, shell.run())
}
