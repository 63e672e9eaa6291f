//! Shell completion generation.

use std::io::Write;

use clap::CommandFactory;
use clap_complete::Shell;

/// Generate a completion script for `shell` on stdout.
pub fn generate_completions(shell: &str) -> anyhow::Result<()> {
    write_completions(shell, &mut std::io::stdout())
}

fn write_completions(shell: &str, out: &mut dyn Write) -> anyhow::Result<()> {
    let shell = match shell.to_lowercase().as_str() {
        "bash" => Shell::Bash,
        "zsh" => Shell::Zsh,
        "fish" => Shell::Fish,
        "powershell" | "ps" => Shell::PowerShell,
        "elvish" => Shell::Elvish,
        _ => anyhow::bail!(
            "Unsupported shell: {}. Supported: bash, zsh, fish, powershell, elvish",
            shell
        ),
    };

    let mut cmd = crate::cli::Cli::command();
    let bin_name = cmd.get_name().to_string();
    clap_complete::generate(shell, &mut cmd, bin_name, out);
    Ok(())
}
