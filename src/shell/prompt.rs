// src/shell/prompt.rs

//! Shell dialects, the distinguished prompt and the helper commands sent
//! during negotiation and shutdown.

use std::sync::LazyLock;

use regex::Regex;

/// Unique marker the remote shell prints as its prompt once negotiated.
pub const PROMPT_MARKER: &str = "[shellfleet:7c1e9b]";

/// Either of the stock prompts (`$` for users, `#` for root).
pub const GENERIC_PROMPT: &str = r"\$|#";

/// Prints the running shell's command name.
pub const SHELL_QUERY: &str = r#"echo "__shell=$(ps -p $$ -o comm=)""#;

/// Matches the reply to [`SHELL_QUERY`]; the login dash is optional.
pub const SHELL_NAME_PATTERN: &str = r"__shell=-?([A-Za-z0-9_./]+)";

pub const DISABLE_ECHO: &str = "stty -echo";

/// Prints the previous command's exit status between delimiters.
pub const EXIT_CODE_PROBE: &str = r#"echo "--$?--""#;

pub const EXIT_CODE_PATTERN: &str = r"--([0-9]+)--";

/// Supported POSIX shells.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShellKind {
    Bash,
    Zsh,
}

impl ShellKind {
    /// Identify a shell from a `ps` command name such as `-bash` or
    /// `/usr/bin/zsh`.
    pub fn from_name(name: &str) -> Option<Self> {
        let name = name.trim().trim_start_matches('-');
        let base = name.rsplit('/').next().unwrap_or(name);
        match base {
            "bash" => Some(ShellKind::Bash),
            "zsh" => Some(ShellKind::Zsh),
            _ => None,
        }
    }

    /// Command that makes the shell print [`PROMPT_MARKER`] on its own line.
    pub fn prompt_command(self) -> String {
        match self {
            ShellKind::Bash => {
                format!("PS1=$'{PROMPT_MARKER}\\n'; PS2=''; PROMPT_COMMAND=''")
            }
            // zle redraws typed input; prompt_sp would pad partial lines.
            ShellKind::Zsh => format!(
                "unsetopt zle; unsetopt prompt_sp; PS1=$'{PROMPT_MARKER}\\n'; RPS1=''; PROMPT_EOL_MARK=''"
            ),
        }
    }
}

/// Completion pattern for the distinguished prompt.
pub static PROMPT_RE: LazyLock<Regex> = LazyLock::new(|| {
    #[allow(clippy::expect_used)]
    Regex::new(&format!("{}\n", regex::escape(PROMPT_MARKER))).expect("valid regex")
});

pub static GENERIC_PROMPT_RE: LazyLock<Regex> = LazyLock::new(|| {
    #[allow(clippy::expect_used)]
    Regex::new(GENERIC_PROMPT).expect("valid regex")
});

pub static SHELL_NAME_RE: LazyLock<Regex> = LazyLock::new(|| {
    #[allow(clippy::expect_used)]
    Regex::new(SHELL_NAME_PATTERN).expect("valid regex")
});

pub static EXIT_CODE_RE: LazyLock<Regex> = LazyLock::new(|| {
    #[allow(clippy::expect_used)]
    Regex::new(EXIT_CODE_PATTERN).expect("valid regex")
});

/// Wrap `text` in single quotes for a POSIX shell.
pub fn shell_quote(text: &str) -> String {
    format!("'{}'", text.replace('\'', r"'\''"))
}

/// Command terminating every process whose command line matches `criterion`.
pub fn kill_command(criterion: &str) -> String {
    format!("pkill -f -- {}", shell_quote(criterion))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recognizes_supported_shells_in_ps_output() {
        assert_eq!(ShellKind::from_name("bash"), Some(ShellKind::Bash));
        assert_eq!(ShellKind::from_name("-bash"), Some(ShellKind::Bash));
        assert_eq!(ShellKind::from_name("/usr/bin/zsh\n"), Some(ShellKind::Zsh));
        assert_eq!(ShellKind::from_name("-zsh"), Some(ShellKind::Zsh));
        assert_eq!(ShellKind::from_name("fish"), None);
        assert_eq!(ShellKind::from_name("sh"), None);
    }

    #[test]
    fn prompt_pattern_matches_marker_line_only() {
        let re = &*PROMPT_RE;
        assert!(re.is_match("[shellfleet:7c1e9b]\n"));
        assert!(!re.is_match("[shellfleet:7c1e9b]"));
        assert!(!re.is_match("shellfleet:7c1e9b\n"));
    }

    #[test]
    fn prompt_commands_embed_marker() {
        assert!(ShellKind::Bash.prompt_command().contains(PROMPT_MARKER));
        let zsh = ShellKind::Zsh.prompt_command();
        assert!(zsh.starts_with("unsetopt zle"));
        assert!(zsh.contains(PROMPT_MARKER));
    }

    #[test]
    fn kill_command_quotes_criterion() {
        assert_eq!(kill_command("java -jar app.jar"), "pkill -f -- 'java -jar app.jar'");
        assert_eq!(kill_command("it's"), r"pkill -f -- 'it'\''s'");
    }

    #[test]
    fn exit_code_pattern_extracts_digits() {
        let caps = EXIT_CODE_RE.captures("noise --127-- more").unwrap();
        assert_eq!(&caps[1], "127");
    }

    #[test]
    fn shell_name_reply_strips_login_dash() {
        let caps = SHELL_NAME_RE.captures("__shell=-bash\n").unwrap();
        assert_eq!(&caps[1], "bash");
        assert!(GENERIC_PROMPT_RE.is_match("user@box:~$ "));
        assert!(GENERIC_PROMPT_RE.is_match("root@box:~# "));
    }
}
