use std::ffi::OsString;

const PREDEFINED_COMMANDS: &[&str] = &["run", "eval", "repl", "help"];

/// `kulla script.jsh` means `kulla run script.jsh`.
pub(crate) fn normalize_cli_args<I>(args: I) -> Vec<OsString>
where
    I: IntoIterator<Item = OsString>,
{
    let mut normalized: Vec<OsString> = args.into_iter().collect();
    if normalized.len() < 2 {
        return normalized;
    }

    let first = normalized[1].to_string_lossy();
    let is_known_subcommand = PREDEFINED_COMMANDS.contains(&first.as_ref());
    let is_flag = first.starts_with('-');

    if !is_known_subcommand && !is_flag {
        normalized.insert(1, OsString::from("run"));
    }

    normalized
}

#[cfg(test)]
mod tests {
    use super::normalize_cli_args;
    use std::ffi::OsString;

    fn normalize(args: &[&str]) -> Vec<String> {
        normalize_cli_args(args.iter().map(OsString::from))
            .into_iter()
            .map(|a| a.to_string_lossy().into_owned())
            .collect()
    }

    #[test]
    fn bare_file_becomes_run() {
        assert_eq!(normalize(&["kulla", "demo.jsh"]), ["kulla", "run", "demo.jsh"]);
    }

    #[test]
    fn subcommands_and_flags_are_left_alone() {
        assert_eq!(normalize(&["kulla", "eval", "1"]), ["kulla", "eval", "1"]);
        assert_eq!(normalize(&["kulla", "--version"]), ["kulla", "--version"]);
        assert_eq!(normalize(&["kulla"]), ["kulla"]);
    }
}
