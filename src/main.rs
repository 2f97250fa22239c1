// Entrypoint for the checkout shell.
// - Loads `~/.fakeoutrc` (and env overrides), builds the API client and
//   eagerly fetches products when both server and token are known.
// - Hands the client to the `ui::Shell` loop until `exit` or end of input.

use std::io::{self, IsTerminal};

use fakeout::api::CheckoutClient;
use fakeout::config::Settings;
use fakeout::ui::{LinePrompt, Shell, TerminalPrompt};
use tracing_subscriber::EnvFilter;

fn main() -> anyhow::Result<()> {
    init_logging();

    let settings = Settings::load();
    if let Some(path) = &settings.source {
        println!("Using {}", path.display());
    }

    let api = CheckoutClient::new(settings.server, settings.token)?;
    let mut shell = Shell::new(api, io::stdout());
    shell.preload()?;

    if io::stdin().is_terminal() {
        shell.run(&mut TerminalPrompt::new())
    } else {
        shell.run(&mut LinePrompt::new(io::stdin().lock()))
    }
}

/// Compact logs on stderr, `warn` unless `RUST_LOG` says otherwise.
fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .with_writer(io::stderr)
        .init();
}
