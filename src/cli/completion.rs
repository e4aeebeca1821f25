//! Shell completion generation.

use std::io::Write;

use clap::CommandFactory;
use clap_complete::Shell;

/// Resolve a shell name, accepting `ps` for PowerShell.
pub fn parse_shell(name: &str) -> anyhow::Result<Shell> {
    match name.to_lowercase().as_str() {
        "bash" => Ok(Shell::Bash),
        "zsh" => Ok(Shell::Zsh),
        "fish" => Ok(Shell::Fish),
        "powershell" | "ps" => Ok(Shell::PowerShell),
        "elvish" => Ok(Shell::Elvish),
        _ => anyhow::bail!(
            "Unsupported shell: {}. Supported: bash, zsh, fish, powershell, elvish",
            name
        ),
    }
}

/// Write the completion script for `shell` to `out`.
pub fn write_completions(shell: &str, out: &mut dyn Write) -> anyhow::Result<()> {
    let shell = parse_shell(shell)?;
    let mut cmd = crate::cli::Cli::command();
    let bin_name = cmd.get_name().to_string();
    clap_complete::generate(shell, &mut cmd, bin_name, out);
    Ok(())
}

/// Print the completion script for `shell` to stdout.
pub fn generate_completions(shell: &str) -> anyhow::Result<()> {
    write_completions(shell, &mut std::io::stdout())
}
