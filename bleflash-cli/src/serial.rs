//! Interactive serial port selection.
//!
//! - Explicit `--port` or configured port wins
//! - USB ports are preferred over other serial devices
//! - Interactive selection via dialoguer when several candidates remain
//! - Non-interactive mode for CI/CD

use {
    crate::{CliError, config::Config},
    anyhow::Result,
    bleflash::{PortInfo, list_ports},
    console::style,
    dialoguer::{Confirm, Error as DialoguerError, Select, theme::ColorfulTheme},
    log::{debug, error, info},
    std::{cmp::Ordering, io::IsTerminal},
};

/// Options for serial port selection.
#[derive(Debug, Clone, Default)]
pub struct SerialOptions {
    /// Explicit port specified via CLI.
    pub port: Option<String>,
    /// Non-interactive mode (fail if multiple ports).
    pub non_interactive: bool,
}

/// Outcome of port selection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectedPort {
    /// Port name/path.
    pub name: String,
    /// Whether the user picked it from a prompt.
    pub prompted: bool,
}

impl SelectedPort {
    fn given(name: &str) -> Self {
        Self {
            name: name.to_string(),
            prompted: false,
        }
    }
}

fn usage_err(message: &str) -> anyhow::Error {
    // Port selection failures are setup problems: exit code 2.
    CliError::Usage(message.to_string()).into()
}

/// Select a serial port from options, config or the detected ports.
pub fn select_serial_port(options: &SerialOptions, config: &Config) -> Result<SelectedPort> {
    if let Some(port_name) = &options.port {
        return Ok(SelectedPort::given(port_name));
    }

    if let Some(port_name) = &config
        .connection
        .serial
    {
        debug!("Using port from config: {port_name}");
        return Ok(SelectedPort::given(port_name));
    }

    let ports = list_ports()?;
    choose_port(candidates(ports), options.non_interactive)
}

/// USB ports when there are any, all ports otherwise.
fn candidates(ports: Vec<PortInfo>) -> Vec<PortInfo> {
    let usb: Vec<PortInfo> = ports
        .iter()
        .filter(|p| p.vid.is_some())
        .cloned()
        .collect();
    if usb.is_empty() { ports } else { usb }
}

fn choose_port(ports: Vec<PortInfo>, non_interactive: bool) -> Result<SelectedPort> {
    match ports
        .len()
        .cmp(&1)
    {
        Ordering::Less => Err(usage_err("No serial ports found; connect the bridge or pass --port")),
        Ordering::Equal => {
            let name = ports
                .into_iter()
                .next()
                .map(|p| p.name)
                .ok_or_else(|| usage_err("No serial ports found"))?;
            info!("Auto-selected port: {name}");
            Ok(SelectedPort::given(&name))
        },
        Ordering::Greater if non_interactive => Err(usage_err(
            "Found multiple serial ports; pass --port in non-interactive mode",
        )),
        Ordering::Greater => {
            ensure_interactive_terminal()?;
            select_port_interactive(ports)
        },
    }
}

fn ensure_interactive_terminal() -> Result<()> {
    if std::io::stdin().is_terminal() && std::io::stderr().is_terminal() {
        Ok(())
    } else {
        Err(usage_err(
            "Port selection needs an interactive terminal; pass --port",
        ))
    }
}

fn map_prompt_error(err: DialoguerError) -> anyhow::Error {
    match err {
        DialoguerError::IO(io_err) => {
            if io_err.kind() == std::io::ErrorKind::Interrupted {
                CliError::Cancelled("Port selection cancelled".to_string()).into()
            } else {
                usage_err("Port prompt failed")
            }
        },
    }
}

/// Display label for a port.
fn port_label(port: &PortInfo) -> String {
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

    format!("{}{vid_pid}{product}", port.name)
}

/// Interactive port selection.
fn select_port_interactive(ports: Vec<PortInfo>) -> Result<SelectedPort> {
    eprintln!(
        "{} Found {} serial ports",
        style("ℹ").blue(),
        ports.len()
    );

    let term_width = console::Term::stderr()
        .size()
        .1 as usize;
    let max_item_width = term_width.saturating_sub(4);
    let labels: Vec<String> = ports
        .iter()
        .map(|p| console::truncate_str(&port_label(p), max_item_width, "\u{2026}").into_owned())
        .collect();

    let selection = Select::with_theme(&ColorfulTheme::default())
        .with_prompt("Select the BLE bridge port")
        .items(&labels)
        .default(0)
        .interact_opt()
        .map_err(map_prompt_error)?;

    match selection {
        Some(index) => {
            let port = ports
                .into_iter()
                .nth(index)
                .ok_or_else(|| anyhow::anyhow!("Invalid port index: {index}"))?;
            Ok(SelectedPort {
                name: port.name,
                prompted: true,
            })
        },
        None => Err(CliError::Cancelled("Port selection cancelled".to_string()).into()),
    }
}

/// Ask user if they want to remember this port.
pub fn ask_remember_port(port: &str, config: &mut Config) -> Result<()> {
    let confirmed = Confirm::with_theme(&ColorfulTheme::default())
        .with_prompt(format!("Remember {port} for next time?"))
        .default(false)
        .interact_opt()
        .map_err(map_prompt_error)?
        .unwrap_or(false);

    if confirmed {
        if let Err(e) = config.remember_port(port) {
            error!("Failed to save port configuration: {e}");
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn port(name: &str, vid: Option<u16>) -> PortInfo {
        PortInfo {
            name: name.to_string(),
            vid,
            pid: vid.map(|_| 0x0001),
            manufacturer: None,
            product: None,
        }
    }

    #[test]
    fn test_explicit_port_wins() {
        let options = SerialOptions {
            port: Some("/dev/ttyACM9".to_string()),
            non_interactive: true,
        };
        let mut config = Config::default();
        config.connection.serial = Some("/dev/ttyACM0".to_string());

        let selected = select_serial_port(&options, &config).unwrap();
        assert_eq!(selected, SelectedPort::given("/dev/ttyACM9"));
    }

    #[test]
    fn test_config_port_used_without_flag() {
        let mut config = Config::default();
        config.connection.serial = Some("/dev/ttyACM0".to_string());

        let selected = select_serial_port(&SerialOptions::default(), &config).unwrap();
        assert_eq!(selected.name, "/dev/ttyACM0");
        assert!(!selected.prompted);
    }

    #[test]
    fn test_candidates_prefer_usb() {
        let ports = vec![port("/dev/ttyS0", None), port("/dev/ttyACM0", Some(0x2E8A))];
        let names: Vec<String> = candidates(ports)
            .into_iter()
            .map(|p| p.name)
            .collect();
        assert_eq!(names, vec!["/dev/ttyACM0"]);

        let plain = vec![port("/dev/ttyS0", None), port("/dev/ttyS1", None)];
        assert_eq!(candidates(plain).len(), 2);
    }

    #[test]
    fn test_single_candidate_auto_selected() {
        let selected = choose_port(vec![port("/dev/ttyACM0", Some(1))], true).unwrap();
        assert_eq!(selected.name, "/dev/ttyACM0");
    }

    #[test]
    fn test_non_interactive_multiple_ports_is_usage_error() {
        let ports = vec![port("/dev/ttyACM0", Some(1)), port("/dev/ttyACM1", Some(1))];
        let err = choose_port(ports, true).unwrap_err();
        assert!(matches!(err.downcast_ref::<CliError>(), Some(CliError::Usage(_))));
    }

    #[test]
    fn test_no_ports_is_usage_error() {
        let err = choose_port(Vec::new(), false).unwrap_err();
        assert!(matches!(err.downcast_ref::<CliError>(), Some(CliError::Usage(_))));
    }

    #[test]
    fn test_port_label() {
        let mut info = port("/dev/ttyACM0", Some(0x2E8A));
        assert_eq!(port_label(&info), "/dev/ttyACM0 (2E8A:0001)");
        info.vid = None;
        info.pid = None;
        assert_eq!(port_label(&info), "/dev/ttyACM0");
    }
}
