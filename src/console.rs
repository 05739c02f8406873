//! Operator console commands
//!
//! One command per line. Panel and cloud commands inject signals as if the
//! hardware had raised them.

use thiserror::Error;

use crate::panel::Join;

pub const HELP: &str = "\
commands:
  press <join>            digital panel signal high
  release <join>          digital panel signal low
  level <join> <value>    analog panel signal
  roomname <name>         cloud renames the room
  online | offline        cloud slot connectivity
  systemcheck             cloud requests a system check
  clearsystemcheck        reset the system check state
  pause | resume          program lifecycle
  status                  log the room state
  setloglevel <level>     verbose, debug, info, warning, error
  quit                    stop the room and exit";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleCommand {
    Press(Join),
    Release(Join),
    Level(Join, u16),
    RoomName(String),
    Online(bool),
    SystemCheck,
    ClearSystemCheck,
    Pause,
    Resume,
    Status,
    SetLogLevel(String),
    Help,
    Quit,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("empty command")]
    Empty,

    #[error("unknown command: {0}")]
    Unknown(String),

    #[error("{command}: missing {argument}")]
    MissingArgument {
        command: &'static str,
        argument: &'static str,
    },

    #[error("not a number: {0}")]
    InvalidNumber(String),
}

fn number<T: std::str::FromStr>(
    value: Option<&str>,
    command: &'static str,
    argument: &'static str,
) -> Result<T, ParseError> {
    let value = value.ok_or(ParseError::MissingArgument { command, argument })?;
    value
        .parse()
        .map_err(|_| ParseError::InvalidNumber(value.to_string()))
}

pub fn parse_command(line: &str) -> Result<ConsoleCommand, ParseError> {
    let line = line.trim();
    let (command, rest) = match line.split_once(char::is_whitespace) {
        Some((command, rest)) => (command, rest.trim()),
        None => (line, ""),
    };
    let mut args = rest.split_whitespace();

    match command.to_ascii_lowercase().as_str() {
        "" => Err(ParseError::Empty),
        "press" => Ok(ConsoleCommand::Press(number(args.next(), "press", "join")?)),
        "release" => Ok(ConsoleCommand::Release(number(
            args.next(),
            "release",
            "join",
        )?)),
        "level" => {
            let join = number(args.next(), "level", "join")?;
            let value = number(args.next(), "level", "value")?;
            Ok(ConsoleCommand::Level(join, value))
        }
        "roomname" if rest.is_empty() => Err(ParseError::MissingArgument {
            command: "roomname",
            argument: "name",
        }),
        "roomname" => Ok(ConsoleCommand::RoomName(rest.to_string())),
        "online" => Ok(ConsoleCommand::Online(true)),
        "offline" => Ok(ConsoleCommand::Online(false)),
        "systemcheck" => Ok(ConsoleCommand::SystemCheck),
        "clearsystemcheck" => Ok(ConsoleCommand::ClearSystemCheck),
        "pause" => Ok(ConsoleCommand::Pause),
        "resume" => Ok(ConsoleCommand::Resume),
        "status" => Ok(ConsoleCommand::Status),
        "setloglevel" => args
            .next()
            .map(|level| ConsoleCommand::SetLogLevel(level.to_string()))
            .ok_or(ParseError::MissingArgument {
                command: "setloglevel",
                argument: "level",
            }),
        "help" | "?" => Ok(ConsoleCommand::Help),
        "quit" | "exit" => Ok(ConsoleCommand::Quit),
        other => Err(ParseError::Unknown(other.to_string())),
    }
}
