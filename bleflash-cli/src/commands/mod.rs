//! Subcommand handlers, one module per subcommand.

pub(crate) mod completions;
pub(crate) mod info;
pub(crate) mod update;
