//! Command handlers for the `keeponline` binary.

mod login;
mod run;

pub(crate) use login::cmd_login;
pub(crate) use run::cmd_run;
