use std::path::PathBuf;

/// One line of user input
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Message(String),
    Exit,
    Help,
    /// Request a new answer after a failed completion
    Retry,
    /// Remove the last prompt and everything after it, for re-editing
    Undo,
    /// Delete the message at this index and everything after it
    Truncate(usize),
    Clear,
    History,
    Save(PathBuf),
    Load(PathBuf),
    Model(Option<String>),
    /// Not a known command, or a command with bad arguments
    Invalid(String),
    Empty,
}

pub const HELP: &str = "\
Commands:
/exit, /quit      - Exit the session
/retry            - Retry the last failed completion
/undo             - Erase your last message and the replies to it
/truncate <index> - Delete message <index> and everything after it
/clear            - Start a new conversation
/history          - Print the transcript with message indices
/save <file>      - Save the conversation
/load <file>      - Load a saved conversation
/model [name]     - Show or switch the model
/?                - Display this help message
Ctrl+C            - Cancel the running script, or erase the pending message";

pub fn parse(input: &str) -> Command {
    let input = input.trim();
    if input.is_empty() {
        return Command::Empty;
    }
    let Some(rest) = input.strip_prefix('/') else {
        return Command::Message(input.to_string());
    };

    let (name, argument) = match rest.split_once(char::is_whitespace) {
        Some((name, argument)) => (name, argument.trim()),
        None => (rest, ""),
    };
    let argument = (!argument.is_empty()).then(|| argument.to_string());

    match (name.to_ascii_lowercase().as_str(), argument) {
        ("exit" | "quit", _) => Command::Exit,
        ("?" | "help", _) => Command::Help,
        ("retry", None) => Command::Retry,
        ("undo", None) => Command::Undo,
        ("clear", None) => Command::Clear,
        ("history", None) => Command::History,
        ("truncate", Some(index)) => match index.parse() {
            Ok(index) => Command::Truncate(index),
            Err(_) => Command::Invalid(format!("Not a message index: {}", index)),
        },
        ("save", Some(path)) => Command::Save(PathBuf::from(path)),
        ("load", Some(path)) => Command::Load(PathBuf::from(path)),
        ("model", model) => Command::Model(model),
        ("truncate" | "save" | "load", None) => {
            Command::Invalid(format!("/{} needs an argument", name))
        }
        _ => Command::Invalid(format!("Unknown command: {}", input)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_messages() {
        assert_eq!(parse("  plot the data  "), Command::Message("plot the data".into()));
        assert_eq!(parse("   "), Command::Empty);
    }

    #[test]
    fn test_commands() {
        assert_eq!(parse("/exit"), Command::Exit);
        assert_eq!(parse("/QUIT"), Command::Exit);
        assert_eq!(parse("/?"), Command::Help);
        assert_eq!(parse("/retry"), Command::Retry);
        assert_eq!(parse("/undo"), Command::Undo);
        assert_eq!(parse("/truncate 3"), Command::Truncate(3));
        assert_eq!(parse("/save chats/a.nschat"), Command::Save("chats/a.nschat".into()));
        assert_eq!(parse("/load a.nschat"), Command::Load("a.nschat".into()));
        assert_eq!(parse("/model"), Command::Model(None));
        assert_eq!(
            parse("/model anthropic/claude-3.5-sonnet"),
            Command::Model(Some("anthropic/claude-3.5-sonnet".into()))
        );
    }

    #[test]
    fn test_invalid_commands() {
        assert_eq!(
            parse("/truncate x"),
            Command::Invalid("Not a message index: x".into())
        );
        assert_eq!(parse("/save"), Command::Invalid("/save needs an argument".into()));
        assert_eq!(parse("/frobnicate"), Command::Invalid("Unknown command: /frobnicate".into()));
        assert_eq!(parse("/retry now"), Command::Invalid("Unknown command: /retry now".into()));
    }
}
