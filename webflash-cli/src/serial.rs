//! Serial port selection and listing.
//!
//! The controller asks its capability for a port whenever it connects. In
//! the terminal that capability is a [`NativePortProvider`] whose chooser
//! either uses the configured port or prompts with dialoguer.

use {
    crate::{Cli, backend, config::Config},
    anyhow::Result,
    console::style,
    dialoguer::{Error as DialoguerError, Select, theme::ColorfulTheme},
    log::debug,
    std::io::IsTerminal,
    webflash::{
        Error, PortProvider,
        port::{FixedPort, NativePortEnumerator, NativePortProvider, PortChooser, PortEnumerator},
    },
};

/// Port chooser backed by a terminal prompt.
pub struct PromptChooser {
    non_interactive: bool,
}

impl PromptChooser {
    /// Create a chooser; with `non_interactive` it never prompts.
    pub fn new(non_interactive: bool) -> Self {
        Self { non_interactive }
    }
}

impl PortChooser for PromptChooser {
    fn choose(&mut self, ports: &[webflash::PortInfo]) -> webflash::Result<webflash::PortInfo> {
        match ports {
            [] => Err(Error::PermissionDenied(
                "no serial ports available".to_string(),
            )),
            [only] => {
                debug!("Single port available: {}", only.name);
                Ok(only.clone())
            },
            _ if self.non_interactive => Err(Error::Config(format!(
                "{} serial ports found; pass --port to pick one",
                ports.len()
            ))),
            _ => select_interactive(ports),
        }
    }
}

fn select_interactive(ports: &[webflash::PortInfo]) -> webflash::Result<webflash::PortInfo> {
    if !(std::io::stdin().is_terminal() && std::io::stderr().is_terminal()) {
        return Err(Error::Config(
            "choosing a port requires a terminal; pass --port".to_string(),
        ));
    }

    // Truncate labels to fit terminal width to prevent wrapping in narrow
    // terminals.
    let term_width = console::Term::stderr().size().1 as usize;
    let max_item_width = term_width.saturating_sub(4);
    let labels: Vec<String> = ports
        .iter()
        .map(|p| console::truncate_str(&p.label(), max_item_width, "\u{2026}").into_owned())
        .collect();

    let selection = Select::with_theme(&ColorfulTheme::default())
        .with_prompt("Select the serial port of your board")
        .items(&labels)
        .default(0)
        .interact_opt()
        .map_err(map_prompt_error)?;

    selection
        .and_then(|index| ports.get(index).cloned())
        .ok_or(Error::UserCancelled)
}

fn map_prompt_error(err: DialoguerError) -> Error {
    match err {
        DialoguerError::IO(io_err) if io_err.kind() == std::io::ErrorKind::Interrupted => {
            Error::UserCancelled
        },
        DialoguerError::IO(io_err) => Error::Io(io_err),
    }
}

/// Build the serial capability for this invocation.
pub(crate) fn port_provider(cli: &Cli, config: &Config) -> Box<dyn PortProvider> {
    if cli.dry_run {
        return Box::new(backend::RehearsalProvider::default());
    }

    let chooser: Box<dyn PortChooser> = match &config.connection.serial {
        Some(name) => Box::new(FixedPort(name.clone())),
        None => Box::new(PromptChooser::new(cli.non_interactive)),
    };
    Box::new(NativePortProvider::new(chooser))
}

/// List ports command implementation.
pub(crate) fn cmd_list_ports(json: bool) -> Result<()> {
    let ports = NativePortEnumerator::list_ports()?;

    if json {
        let ports: Vec<serde_json::Value> = ports
            .iter()
            .map(|p| {
                serde_json::json!({
                    "name": p.name,
                    "vid": p.vid,
                    "pid": p.pid,
                    "manufacturer": p.manufacturer,
                    "product": p.product,
                    "serial": p.serial_number,
                })
            })
            .collect();
        println!(
            "{}",
            serde_json::to_string_pretty(&ports).unwrap_or_default()
        );
        return Ok(());
    }

    eprintln!("{}", style("Available serial ports").bold().underlined());

    if ports.is_empty() {
        eprintln!("  {}", style("No serial ports found").dim());
        return Ok(());
    }

    for port in &ports {
        let vid_pid = if let (Some(vid), Some(pid)) = (port.vid, port.pid) {
            format!(" ({vid:04X}:{pid:04X})")
        } else {
            String::new()
        };
        let product = port
            .product
            .as_ref()
            .map(|p| format!(" - {}", style(p).dim()))
            .unwrap_or_default();

        eprintln!(
            "  {} {}{}{}",
            style("•").green(),
            style(&port.name).cyan(),
            vid_pid,
            product
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use webflash::PortInfo;

    fn usb(name: &str) -> PortInfo {
        PortInfo {
            vid: Some(0x303a),
            pid: Some(0x1001),
            ..PortInfo::named(name)
        }
    }

    #[test]
    fn test_no_ports_is_denied() {
        let mut chooser = PromptChooser::new(true);
        let err = chooser.choose(&[]).unwrap_err();
        assert!(matches!(err, Error::PermissionDenied(_)));
    }

    #[test]
    fn test_single_port_is_taken_without_prompt() {
        let mut chooser = PromptChooser::new(false);
        let chosen = chooser.choose(&[usb("/dev/ttyACM0")]).unwrap();
        assert_eq!(chosen.name, "/dev/ttyACM0");
    }

    #[test]
    fn test_non_interactive_multiple_ports_fails() {
        let mut chooser = PromptChooser::new(true);
        let err = chooser
            .choose(&[usb("/dev/ttyACM0"), PortInfo::named("/dev/ttyS0")])
            .unwrap_err();
        match err {
            Error::Config(msg) => assert!(msg.contains("--port")),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_interrupted_prompt_is_cancel() {
        let err = map_prompt_error(DialoguerError::IO(std::io::Error::from(
            std::io::ErrorKind::Interrupted,
        )));
        assert!(matches!(err, Error::UserCancelled));
    }

    #[test]
    fn test_dry_run_uses_rehearsal_port() {
        let cli = <Cli as clap::Parser>::try_parse_from(["webflash", "--dry-run", "probe"]).unwrap();
        let mut provider = port_provider(&cli, &Config::default());
        let port = provider.request_port().unwrap();
        assert_eq!(port.id().as_str(), backend::REHEARSAL_PORT);
    }
}
