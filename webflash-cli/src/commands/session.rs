//! Interactive flashing session.
//!
//! The terminal is the host surface: once it is confirmed interactive the
//! key bindings are installed, the default firmware is fetched after a short
//! delay, and the controller is ticked between key presses so the auto-flash
//! and unplug detection run on their own.

use anyhow::{Context, Result};
use console::style;
use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use crossterm::terminal;
use dialoguer::{Input, theme::ColorfulTheme};
use log::debug;
use std::io::IsTerminal;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use webflash::{Controller, MountHost, MountOutcome, MountWatcher, View};

use super::{build_controller, report::LineMode};
use crate::config::Config;
use crate::{Cli, CliError, backend, was_interrupted};

const TICK: Duration = Duration::from_millis(50);

/// Something the operator asked for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Action {
    Connect,
    Disconnect,
    Flash,
    Erase,
    ToggleEraseAll,
    SetAddress,
    OpenFile,
    LoadDefault,
    LoadRemote,
    Show,
    Help,
    Quit,
}

fn parse_key(key: KeyEvent) -> Option<Action> {
    if key.kind != KeyEventKind::Press {
        return None;
    }
    match (key.code, key.modifiers) {
        (KeyCode::Char('c'), KeyModifiers::CONTROL) | (KeyCode::Char('q') | KeyCode::Esc, _) => {
            Some(Action::Quit)
        },
        (KeyCode::Char('c'), _) => Some(Action::Connect),
        (KeyCode::Char('d'), _) => Some(Action::Disconnect),
        (KeyCode::Char('f') | KeyCode::Enter, _) => Some(Action::Flash),
        (KeyCode::Char('x'), _) => Some(Action::Erase),
        (KeyCode::Char('e'), _) => Some(Action::ToggleEraseAll),
        (KeyCode::Char('a'), _) => Some(Action::SetAddress),
        (KeyCode::Char('o'), _) => Some(Action::OpenFile),
        (KeyCode::Char('l'), _) => Some(Action::LoadDefault),
        (KeyCode::Char('r'), _) => Some(Action::LoadRemote),
        (KeyCode::Char('s'), _) => Some(Action::Show),
        (KeyCode::Char('h' | '?'), _) => Some(Action::Help),
        _ => None,
    }
}

/// Whether the view currently accepts `action`.
fn allowed(view: &View<'_>, action: Action) -> bool {
    let buttons = view.buttons;
    match action {
        Action::Connect => buttons.connect,
        Action::Disconnect => buttons.disconnect,
        Action::Flash => buttons.flash,
        Action::Erase | Action::ToggleEraseAll => buttons.erase_checkbox,
        Action::OpenFile | Action::LoadDefault | Action::LoadRemote | Action::SetAddress => {
            buttons.file_input
        },
        Action::Show | Action::Help | Action::Quit => true,
    }
}

const HELP: &[(&str, &str)] = &[
    ("c", "connect"),
    ("d", "disconnect"),
    ("f", "flash"),
    ("x", "erase flash"),
    ("e", "toggle erase-all"),
    ("a", "set start address"),
    ("o", "open firmware file"),
    ("l", "load default firmware"),
    ("r", "load firmware by name"),
    ("s", "show session"),
    ("q", "quit"),
];

/// The terminal as a mount surface.
struct TerminalSurface {
    interactive: bool,
    bound: bool,
    raw: Option<RawModeGuard>,
}

impl TerminalSurface {
    fn detect() -> Self {
        Self {
            interactive: std::io::stdin().is_terminal() && std::io::stderr().is_terminal(),
            bound: false,
            raw: None,
        }
    }

    /// Leave raw mode around a line prompt.
    fn prompt(&mut self, label: &str, initial: &str) -> Result<Option<String>> {
        self.raw = None;
        let answer = Input::<String>::with_theme(&ColorfulTheme::default())
            .with_prompt(label)
            .with_initial_text(initial)
            .allow_empty(true)
            .interact_text();
        self.raw = Some(RawModeGuard::enter()?);

        match answer {
            Ok(text) if text.trim().is_empty() => Ok(None),
            Ok(text) => Ok(Some(text.trim().to_string())),
            Err(e) => {
                debug!("prompt dismissed: {e}");
                Ok(None)
            },
        }
    }
}

impl MountHost for TerminalSurface {
    fn anchors_present(&self) -> bool {
        self.interactive
    }

    fn is_bound(&self) -> bool {
        self.bound
    }

    fn mark_bound(&mut self) {
        self.bound = true;
    }

    fn bind_handlers(&mut self) {
        match RawModeGuard::enter() {
            Ok(guard) => self.raw = Some(guard),
            Err(e) => debug!("raw mode unavailable: {e}"),
        }
    }

    fn observe_mount(&mut self, _deadline: Duration) -> Option<bool> {
        // A terminal never appears later.
        Some(self.interactive)
    }
}

/// RAII guard to restore terminal mode on drop.
struct RawModeGuard;

impl RawModeGuard {
    fn enter() -> Result<Self> {
        terminal::enable_raw_mode().context("Failed to enable raw terminal mode")?;
        Ok(Self)
    }
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        let _ = terminal::disable_raw_mode();
    }
}

fn raw_line(text: &str) {
    eprint!("{text}\r\n");
}

fn print_help() {
    for (key, what) in HELP {
        raw_line(&format!("  {} {}", style(key).cyan().bold(), what));
    }
}

fn print_view(view: &View<'_>, address: &str, erase_all: bool) {
    let flag = |on: bool, name: &str| {
        if on {
            style(format!("[{name}]")).green().to_string()
        } else {
            style(format!("[{name}]")).dim().to_string()
        }
    };
    let b = view.buttons;
    raw_line(&format!(
        "{} {} {} {}",
        flag(b.connect, "connect"),
        flag(b.disconnect, "disconnect"),
        flag(b.flash, "flash"),
        flag(b.file_input, "firmware"),
    ));
    raw_line(&format!(
        "  firmware: {}  address: {}  erase all: {}",
        if view.firmware_label.is_empty() {
            "-"
        } else {
            view.firmware_label
        },
        address,
        if erase_all { "yes" } else { "no" }
    ));
    raw_line(&format!(
        "  progress: {:.0}% {}",
        view.progress_percent, view.progress_label
    ));
    if let Some(status) = view.status {
        raw_line(&format!("  status: {}", super::report::format_status(status)));
    }
}

fn show(controller: &mut Controller) {
    let address = controller.session().form().start_address.clone();
    let erase_all = controller.session().form().erase_all;
    print_view(&controller.view(), &address, erase_all);
}

/// Run one action. Failures are already on screen through the reporter.
fn perform(action: Action, controller: &mut Controller, surface: &mut TerminalSurface) -> Result<()> {
    if !allowed(&controller.view(), action) {
        raw_line(&style(format!("{action:?} is not available right now.")).dim().to_string());
        return Ok(());
    }

    match action {
        Action::Connect => {
            // The port chooser may prompt.
            surface.raw = None;
            let _ = controller.connect();
            surface.raw = Some(RawModeGuard::enter()?);
        },
        Action::Disconnect => controller.disconnect(true),
        Action::Flash => {
            let _ = controller.flash_firmware();
        },
        Action::Erase => {
            let _ = controller.erase_flash();
        },
        Action::ToggleEraseAll => {
            let erase_all = !controller.session().form().erase_all;
            controller.set_erase_all(erase_all);
            raw_line(&format!("  erase all: {}", if erase_all { "yes" } else { "no" }));
        },
        Action::SetAddress => {
            let current = controller.session().form().start_address.clone();
            if let Some(text) = surface.prompt("Start address", &current)? {
                let resolved = webflash::parse_address(&text);
                controller.set_start_address(text);
                raw_line(&format!("  start address: {resolved:#x}"));
            }
        },
        Action::OpenFile => {
            if let Some(path) = surface.prompt("Firmware file", "")? {
                let _ = controller.load_from_user_file(&PathBuf::from(path));
            }
        },
        Action::LoadDefault => {
            let _ = controller.load_default_firmware();
        },
        Action::LoadRemote => {
            if let Some(name) = surface.prompt("Firmware name", "")? {
                let _ = controller.load_from_remote(&name);
            }
        },
        Action::Show => show(controller),
        Action::Help => print_help(),
        Action::Quit => {},
    }
    Ok(())
}

/// Session command implementation.
pub(crate) fn cmd_session(cli: &Cli, config: &Config) -> Result<()> {
    let mut controller = build_controller(cli, config, backend::loaders(cli), LineMode::Raw);
    let mut surface = TerminalSurface::detect();

    let watcher = MountWatcher::new(&config.flasher.mount);
    match watcher.mount(&mut surface, &mut controller) {
        MountOutcome::Bound | MountOutcome::AlreadyBound => {},
        MountOutcome::GaveUp { .. } => {
            return Err(
                CliError::Usage("the session command needs an interactive terminal".to_string())
                    .into(),
            );
        },
    }

    raw_line(&style("webflash session").bold().underlined().to_string());
    if cli.dry_run {
        raw_line(&style("dry run: no board is attached").yellow().to_string());
    }
    print_help();

    loop {
        if was_interrupted() {
            break;
        }
        controller.tick(Instant::now());

        if !event::poll(TICK)? {
            continue;
        }
        let Event::Key(key) = event::read()? else {
            continue;
        };
        match parse_key(key) {
            Some(Action::Quit) => break,
            Some(action) => perform(action, &mut controller, &mut surface)?,
            None => {},
        }
    }

    controller.shutdown();
    surface.raw = None;
    eprintln!("{} Session closed", style("👋").cyan());
    Ok(())
}
