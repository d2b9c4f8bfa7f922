//! `bleflash completions <SHELL>`.

use clap::CommandFactory;
use clap_complete::{Shell, generate};
use std::io;

use crate::Cli;

/// Print the completion script for `shell`.
pub(crate) fn cmd_completions(shell: Shell) {
    let mut command = Cli::command();
    let bin_name = command
        .get_name()
        .to_owned();
    generate(shell, &mut command, bin_name, &mut io::stdout());
}
