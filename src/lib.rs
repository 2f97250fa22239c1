// Library root
// ------------
// `fakeout` is a terminal client for the Checkout point-of-sale API. The
// binary (`main.rs`) wires these modules into an interactive shell.
//
// Module responsibilities:
// - `api`: HTTP calls to the Checkout server and the Product/User records.
// - `config`: the optional `~/.fakeoutrc` and environment overrides.
// - `session`: catalog, cart and logged-in user, and the command
//   transitions on them.
// - `ui`: command parsing, help, input sources and the prompt loop.
pub mod api;
pub mod config;
pub mod session;
pub mod ui;
