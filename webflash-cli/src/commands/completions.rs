//! Shell completion scripts.

use clap::CommandFactory;
use clap_complete::{Shell, generate};
use std::io::{self, Write};

use crate::Cli;

/// Write the completion script for `shell` to `out`.
pub(crate) fn write_completions(shell: Shell, out: &mut dyn Write) {
    let mut cmd = Cli::command();
    let name = cmd.get_name().to_string();
    generate(shell, &mut cmd, name, out);
}

/// Completions command implementation: the script goes to stdout.
pub(crate) fn cmd_completions(shell: Shell) {
    write_completions(shell, &mut io::stdout());
}

#[cfg(test)]
mod tests {
    use super::*;

    fn script(shell: Shell) -> String {
        let mut buf = Vec::new();
        write_completions(shell, &mut buf);
        String::from_utf8(buf).unwrap()
    }

    #[test]
    fn test_scripts_cover_session_commands() {
        for shell in [Shell::Bash, Shell::Zsh, Shell::Fish] {
            let output = script(shell);
            for word in ["webflash", "list-ports", "flash", "session", "dry-run"] {
                assert!(output.contains(word), "{shell:?} script lacks {word}");
            }
        }
    }

    #[test]
    fn test_flash_options_are_completed() {
        let output = script(Shell::Bash);
        assert!(output.contains("--erase-all"));
        assert!(output.contains("--remote"));
    }
}
