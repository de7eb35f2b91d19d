/*!
 * Control Protocol
 *
 * Line-based: the first line of a connection is the shared-secret token,
 * every following line is one command. Replies are single lines.
 */

pub const ACCESS_DENIED: &str = "Erro: Acesso negado! Token inválido.\n";
pub const STARTED: &str = "Processos iniciados\n";
pub const STOPPED: &str = "Processos parados\n";
pub const RESTARTED: &str = "Processos reiniciados\n";
pub const UNKNOWN_COMMAND: &str = "Comando desconhecido\n";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Start,
    Stop,
    Restart,
    Status,
    Unknown,
}

impl Command {
    /// Parse one line, ignoring surrounding whitespace
    pub fn parse(line: &str) -> Self {
        match line.trim() {
            "START" => Command::Start,
            "STOP" => Command::Stop,
            "RESTART" => Command::Restart,
            "STATUS" => Command::Status,
            _ => Command::Unknown,
        }
    }
}

/// Reply line for STATUS
pub fn status_reply(summary: &str) -> String {
    format!("Status: {}\n", summary)
}

/// Token check on the raw first line; trailing CR/LF are ignored. Lines
/// that are not valid UTF-8 simply do not match.
pub fn token_matches(line: &[u8], token: &str) -> bool {
    let mut end = line.len();
    while end > 0 && matches!(line[end - 1], b'\r' | b'\n') {
        end -= 1;
    }
    &line[..end] == token.as_bytes()
}
