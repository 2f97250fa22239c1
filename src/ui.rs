// UI layer: the `(c-o)` shell. Reads one line at a time, resolves it to a
// `Verb`, runs it against the `Session` and prints the outcome. Errors
// from a command are printed and the loop carries on.

use std::io::{self, BufRead, Write};
use std::time::Duration;

use anyhow::Result;
use console::{Key, Term};
use dialoguer::{BasicHistory, History};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::warn;

use crate::api::CheckoutApi;
use crate::session::Session;

pub const INTRO: &str = "Checkout ready! Type `help` or `?` for help.";
pub const PROMPT: &str = "(c-o) ";

// Ctrl-D as delivered by a raw-mode terminal.
const EOT: char = '\x04';
pub const FAREWELL: &str = "Bye!";

/// Every command the shell understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verb {
    GetProducts,
    LsProducts,
    Add,
    ClearCart,
    Checkout,
    Login,
    Logout,
    Register,
    Token,
    Server,
    Status,
    Help,
    Exit,
}

impl Verb {
    pub const ALL: [Verb; 13] = [
        Verb::GetProducts,
        Verb::LsProducts,
        Verb::Add,
        Verb::ClearCart,
        Verb::Checkout,
        Verb::Login,
        Verb::Logout,
        Verb::Register,
        Verb::Token,
        Verb::Server,
        Verb::Status,
        Verb::Help,
        Verb::Exit,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Verb::GetProducts => "getproducts",
            Verb::LsProducts => "lsproducts",
            Verb::Add => "add",
            Verb::ClearCart => "clearcart",
            Verb::Checkout => "checkout",
            Verb::Login => "login",
            Verb::Logout => "logout",
            Verb::Register => "register",
            Verb::Token => "token",
            Verb::Server => "server",
            Verb::Status => "status",
            Verb::Help => "help",
            Verb::Exit => "exit",
        }
    }

    pub fn help(self) -> &'static str {
        match self {
            Verb::GetProducts => "Retrieve the current set of available products: GETPRODUCTS",
            Verb::LsProducts => {
                "Show the loaded products, optionally in a given category: LSPRODUCTS [cat]"
            }
            Verb::Add => {
                "Add products to the cart by id or name, once per unit: ADD product [...]"
            }
            Verb::ClearCart => "Clear the current cart: CLEARCART",
            Verb::Checkout => {
                "Attempt to finalize the purchase of the products in the cart: CHECKOUT"
            }
            Verb::Login => "Retrieve user information based on a card ID: LOGIN card_id",
            Verb::Logout => "Clear 'current user' information, if present: LOGOUT",
            Verb::Register => {
                "Send a registration request for a new card: REGISTER card_id student_id"
            }
            Verb::Token => "Show or change the currently used token: TOKEN [token]",
            Verb::Server => "Show or change the currently used Koala instance: SERVER [server]",
            Verb::Status => "Show the current status: STATUS",
            Verb::Help => "List available commands or show help for one: HELP [command]",
            Verb::Exit => "Exit the shell: EXIT",
        }
    }

    /// Case-insensitive lookup; `?` is an alias for `help`.
    pub fn from_name(name: &str) -> Option<Verb> {
        if name == "?" {
            return Some(Verb::Help);
        }
        Verb::ALL
            .into_iter()
            .find(|v| v.name().eq_ignore_ascii_case(name))
    }
}

/// One line of operator input, split into command and argument text.
#[derive(Debug, PartialEq, Eq)]
pub enum Line<'a> {
    Empty,
    Command(Verb, &'a str),
    Unknown(&'a str),
}

pub fn parse_line(line: &str) -> Line<'_> {
    let line = line.trim();
    if line.is_empty() {
        return Line::Empty;
    }
    // `?cmd` is allowed without a space, like `?add`.
    let (name, rest) = match line.strip_prefix('?') {
        Some(rest) => ("?", rest),
        None => line.split_once(char::is_whitespace).unwrap_or((line, "")),
    };
    match Verb::from_name(name) {
        Some(verb) => Line::Command(verb, rest.trim()),
        None => Line::Unknown(name),
    }
}

/// Whether the loop should keep going after a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Exit,
}

/// Source of operator input lines. `None` means end of input.
pub trait Prompt {
    fn read_line(&mut self, prompt: &str) -> Result<Option<String>>;
}

/// Key-level terminal access used by `TerminalPrompt`.
pub trait KeyInput {
    /// Next key press. Ctrl-C arrives as `Key::CtrlC` rather than a signal.
    fn next_key(&mut self) -> io::Result<Key>;
    /// Repaint the current line as `prompt` followed by `line`.
    fn redraw(&mut self, prompt: &str, line: &str) -> io::Result<()>;
    /// Move past the edited line.
    fn finish_line(&mut self) -> io::Result<()>;
}

impl KeyInput for Term {
    fn next_key(&mut self) -> io::Result<Key> {
        self.read_key_raw()
    }

    fn redraw(&mut self, prompt: &str, line: &str) -> io::Result<()> {
        self.clear_line()?;
        self.write_str(prompt)?;
        self.write_str(line)?;
        self.flush()
    }

    fn finish_line(&mut self) -> io::Result<()> {
        self.write_line("")
    }
}

/// Interactive terminal input with in-memory history. Ctrl-D on an empty
/// line and Ctrl-C both end the session.
pub struct TerminalPrompt<T = Term> {
    term: T,
    history: BasicHistory,
}

impl TerminalPrompt {
    pub fn new() -> Self {
        Self::with_term(Term::stdout())
    }
}

impl Default for TerminalPrompt {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: KeyInput> TerminalPrompt<T> {
    pub fn with_term(term: T) -> Self {
        TerminalPrompt {
            term,
            history: BasicHistory::new().max_entries(100).no_duplicates(true),
        }
    }

    fn recall(&self, pos: usize) -> Option<String> {
        History::<String>::read(&self.history, pos)
    }
}

impl<T: KeyInput> Prompt for TerminalPrompt<T> {
    fn read_line(&mut self, prompt: &str) -> Result<Option<String>> {
        let mut line = String::new();
        // Index into history while browsing with the arrow keys, 0 = newest.
        let mut browsing: Option<usize> = None;
        self.term.redraw(prompt, &line)?;

        loop {
            match self.term.next_key()? {
                Key::Enter => {
                    self.term.finish_line()?;
                    if !line.trim().is_empty() {
                        self.history.write(&line);
                    }
                    return Ok(Some(line));
                }
                Key::CtrlC => {
                    self.term.finish_line()?;
                    return Ok(None);
                }
                Key::Char(EOT) if line.is_empty() => {
                    self.term.finish_line()?;
                    return Ok(None);
                }
                Key::Char(c) if !c.is_control() => {
                    line.push(c);
                    browsing = None;
                }
                Key::Backspace => {
                    line.pop();
                }
                Key::ArrowUp => {
                    let next = browsing.map_or(0, |pos| pos + 1);
                    if let Some(entry) = self.recall(next) {
                        line = entry;
                        browsing = Some(next);
                    }
                }
                Key::ArrowDown => match browsing {
                    Some(0) => {
                        line.clear();
                        browsing = None;
                    }
                    Some(pos) => {
                        if let Some(entry) = self.recall(pos - 1) {
                            line = entry;
                            browsing = Some(pos - 1);
                        }
                    }
                    None => {}
                },
                _ => {}
            }
            self.term.redraw(prompt, &line)?;
        }
    }
}

/// Line-by-line input from any reader (pipes, scripts, tests).
pub struct LinePrompt<R> {
    reader: R,
}

impl<R: BufRead> LinePrompt<R> {
    pub fn new(reader: R) -> Self {
        LinePrompt { reader }
    }
}

impl<R: BufRead> Prompt for LinePrompt<R> {
    fn read_line(&mut self, _prompt: &str) -> Result<Option<String>> {
        let mut buf = String::new();
        if self.reader.read_line(&mut buf)? == 0 {
            return Ok(None);
        }
        Ok(Some(buf))
    }
}

/// The interactive shell: session state plus where to print.
pub struct Shell<A, W> {
    session: Session<A>,
    out: W,
}

impl<A: CheckoutApi, W: Write> Shell<A, W> {
    pub fn new(api: A, out: W) -> Self {
        Shell {
            session: Session::new(api),
            out,
        }
    }

    pub fn session(&self) -> &Session<A> {
        &self.session
    }

    pub fn into_output(self) -> W {
        self.out
    }

    /// Eagerly load products when the connection is configured. A failure
    /// is printed and the shell starts with an empty catalog.
    pub fn preload(&mut self) -> io::Result<()> {
        if self.session.api().is_configured() {
            self.get_products()?;
        }
        Ok(())
    }

    /// Run until `exit` or end of input.
    pub fn run<P: Prompt>(&mut self, prompt: &mut P) -> Result<()> {
        writeln!(self.out, "{INTRO}")?;
        loop {
            self.out.flush()?;
            let Some(line) = prompt.read_line(PROMPT)? else {
                writeln!(self.out, "{FAREWELL}")?;
                break;
            };
            if self.dispatch(&line)? == Flow::Exit {
                break;
            }
        }
        self.out.flush()?;
        Ok(())
    }

    /// Handle one line of input.
    pub fn dispatch(&mut self, line: &str) -> io::Result<Flow> {
        let (verb, args) = match parse_line(line) {
            Line::Empty => return Ok(Flow::Continue),
            Line::Unknown(name) => {
                writeln!(self.out, "*** Unknown syntax: {name}")?;
                return Ok(Flow::Continue);
            }
            Line::Command(verb, args) => (verb, args),
        };

        match verb {
            Verb::GetProducts => self.get_products()?,
            Verb::LsProducts => self.ls_products(args)?,
            Verb::Add => self.add(args)?,
            Verb::ClearCart => self.clear_cart()?,
            Verb::Checkout => self.checkout()?,
            Verb::Login => self.login(args)?,
            Verb::Logout => self.logout()?,
            Verb::Register => self.register(args)?,
            Verb::Token => self.token(args)?,
            Verb::Server => self.server(args)?,
            Verb::Status => self.status()?,
            Verb::Help => self.help(args)?,
            Verb::Exit => {
                writeln!(self.out, "{FAREWELL}")?;
                return Ok(Flow::Exit);
            }
        }
        Ok(Flow::Continue)
    }

    fn report(&mut self, err: impl std::fmt::Display) -> io::Result<()> {
        warn!("{err}");
        writeln!(self.out, "{err}")
    }

    fn get_products(&mut self) -> io::Result<()> {
        match busy("Loading products...", || self.session.load_products()) {
            Ok(count) => writeln!(self.out, "Loaded {count} products."),
            Err(e) => self.report(e),
        }
    }

    fn ls_products(&mut self, category: &str) -> io::Result<()> {
        let category = Some(category).filter(|c| !c.is_empty());
        if self.session.catalog().is_empty() {
            return writeln!(self.out, "No products loaded.");
        }
        for p in self.session.products(category) {
            writeln!(
                self.out,
                "{:>6}  {:<28} {:<14} €{}",
                p.id, p.name, p.category, p.price
            )?;
        }
        Ok(())
    }

    fn add(&mut self, args: &str) -> io::Result<()> {
        let keys: Vec<&str> = args.split_whitespace().collect();
        if keys.is_empty() {
            return writeln!(self.out, "Usage: add product [...]");
        }
        for result in self.session.add_items(keys.as_slice()) {
            match result {
                Ok(product) => writeln!(self.out, "Adding to cart: {product}")?,
                Err(e) => self.report(e)?,
            }
        }
        Ok(())
    }

    fn clear_cart(&mut self) -> io::Result<()> {
        self.session.clear_cart();
        writeln!(self.out, "Your cart is now empty.")
    }

    fn checkout(&mut self) -> io::Result<()> {
        match busy("Purchasing...", || self.session.checkout()) {
            Ok(balance) => {
                writeln!(self.out, "Purchase successful! Ka-$hing!")?;
                writeln!(self.out, "New balance: {balance}")?;
                writeln!(self.out, "Your cart is now empty.")
            }
            Err(e) => self.report(e),
        }
    }

    fn login(&mut self, args: &str) -> io::Result<()> {
        let mut parts = args.split_whitespace();
        let (Some(card_id), None) = (parts.next(), parts.next()) else {
            return writeln!(self.out, "Usage: login card_id");
        };
        match busy("Looking up card...", || self.session.login(card_id).cloned()) {
            Ok(user) => writeln!(
                self.out,
                "Logged in as {}, balance: {}",
                user.first_name, user.balance
            ),
            Err(e) => self.report(e),
        }
    }

    fn logout(&mut self) -> io::Result<()> {
        self.session.logout();
        writeln!(self.out, "User information cleared.")
    }

    fn register(&mut self, args: &str) -> io::Result<()> {
        let args: Vec<&str> = args.split_whitespace().collect();
        match busy("Registering card...", || self.session.register(args.as_slice())) {
            Ok(()) => writeln!(self.out, "Card registration requested."),
            Err(e) => self.report(e),
        }
    }

    fn token(&mut self, args: &str) -> io::Result<()> {
        match args.split_whitespace().next() {
            Some(token) => {
                self.session.set_token(token);
                writeln!(self.out, "Updated token.")
            }
            None => match self.session.token() {
                Some(token) => writeln!(self.out, "Current token: {token}"),
                None => writeln!(self.out, "No token set."),
            },
        }
    }

    fn server(&mut self, args: &str) -> io::Result<()> {
        match args.split_whitespace().next() {
            Some(server) => {
                self.session.set_server(server);
                let current = self.session.server().unwrap_or(server).to_string();
                writeln!(self.out, "Set new server to {current}")
            }
            None => match self.session.server() {
                Some(server) => writeln!(self.out, "Current server: {server}"),
                None => writeln!(self.out, "No server set."),
            },
        }
    }

    fn status(&mut self) -> io::Result<()> {
        let catalog = self.session.catalog();
        if catalog.is_empty() {
            writeln!(self.out, "No products loaded.")?;
        } else {
            writeln!(self.out, "{} products loaded.", catalog.len())?;
        }

        match self.session.user() {
            Some(user) => writeln!(
                self.out,
                "Logged in as user: {}, balance {}",
                user.first_name, user.balance
            )?,
            None => writeln!(self.out, "Not logged in.")?,
        }

        let cart = self.session.cart();
        if !cart.is_empty() {
            writeln!(self.out)?;
            writeln!(self.out, "Cart: ({})", cart.total())?;
            for p in cart.items() {
                writeln!(self.out, "- {} ({})", p.name, p.price)?;
            }
        }
        Ok(())
    }

    fn help(&mut self, args: &str) -> io::Result<()> {
        let topic = args.split_whitespace().next();
        match topic.map(|t| (t, Verb::from_name(t))) {
            Some((_, Some(verb))) => writeln!(self.out, "{}", verb.help()),
            Some((name, None)) => writeln!(self.out, "*** No help on {name}"),
            None => {
                writeln!(self.out, "Documented commands (type help <topic>):")?;
                let names: Vec<&str> = Verb::ALL.iter().map(|v| v.name()).collect();
                writeln!(self.out, "{}", names.join("  "))
            }
        }
    }
}

/// Show a spinner on stderr while `f` runs. Hidden when stderr is not a
/// terminal.
fn busy<T>(message: &'static str, f: impl FnOnce() -> T) -> T {
    let spinner = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::with_template("{spinner} {msg}") {
        spinner.set_style(style);
    }
    spinner.set_message(message);
    spinner.enable_steady_tick(Duration::from_millis(100));
    let result = f();
    spinner.finish_and_clear();
    result
}
