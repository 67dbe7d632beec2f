//! Shell-vs-argv wrapping (§4.1 Shell wrapping / Shell-escaping contract).

use super::Cmd;

/// Resolve `cmd` to the argv the engine should actually exec.
///
/// A `Cmd::Argv` passes through untouched and reaches the target process as
/// discrete tokens — the engine never interposes a shell, so embedded
/// quotes, backslashes, and `$` reach the process verbatim. A `Cmd::Shell`
/// is wrapped into a platform-correct invocation.
pub fn wrap(cmd: &Cmd, windows_container: bool) -> Vec<String> {
    match cmd {
        Cmd::Argv(argv) => argv.clone(),
        Cmd::Shell(command) => {
            if windows_container {
                vec![
                    "powershell".to_string(),
                    "-NonInteractive".to_string(),
                    "-Command".to_string(),
                    command.clone(),
                ]
            } else {
                vec![unix_shell().to_string(), "-lc".to_string(), command.clone()]
            }
        }
    }
}

/// `bash` if present on the invoking host's `PATH`, else `/bin/sh`.
fn unix_shell() -> &'static str {
    if which::which("bash").is_ok() {
        "bash"
    } else {
        "/bin/sh"
    }
}
