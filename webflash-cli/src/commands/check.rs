//! Environment check command.

use anyhow::Result;
use console::style;
use webflash::env;

use crate::config::Config;
use crate::{Cli, CliError, serial};

/// Report whether serial operations can be offered here.
pub(crate) fn cmd_check(cli: &Cli, json: bool) -> Result<()> {
    let provider = serial::port_provider(cli, &Config::default());
    let readiness = env::check(provider.as_ref());

    if json {
        let report = serde_json::json!({
            "ready": readiness.ready,
            "reason": readiness.reason,
            "secure_context": provider.is_secure_context(),
            "capability": format!("{:?}", provider.capability()),
        });
        println!(
            "{}",
            serde_json::to_string_pretty(&report).unwrap_or_default()
        );
    } else if readiness.ready {
        if !cli.quiet {
            eprintln!("{} Serial access is available.", style("✓").green());
        }
    } else {
        eprintln!("{} {}", style("✗").red(), readiness.reason);
    }

    if readiness.ready {
        Ok(())
    } else {
        Err(CliError::Usage(readiness.reason).into())
    }
}
