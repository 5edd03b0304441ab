use super::{Cli, Commands, eval_command, repl_command, run_command};
use anyhow::Result;

pub(crate) fn execute(cli: Cli) -> Result<()> {
    match cli.command {
        Some(Commands::Run {
            file: Some(path),
            session,
        }) => run_command(path, session),
        Some(Commands::Run {
            file: None,
            session,
        })
        | Some(Commands::Repl { session }) => repl_command(session),
        Some(Commands::Eval { code, session }) => eval_command(code, session),
        None => repl_command(cli.session),
    }
}
