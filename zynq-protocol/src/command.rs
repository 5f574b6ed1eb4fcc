//! Parsing of operator command lines.
//!
//! ```text
//! id
//! load <ptr> <path>
//! rstptr <ptr>|all
//! status
//! route <ptr>
//! rstfifo
//! rstfpga
//! custom [-b] <payload...>
//! abort
//! exit
//! ```
//!
//! Pointers are only checked for being numbers here. Whether the device
//! accepts them is decided by the codec against its configured pointer set.
use std::str::FromStr;

use crate::{
    error::ParseError,
    protocol::{Command, Pointer, PointerTarget},
};

/// Splits off the first whitespace separated token.
fn split_token(input: &str) -> (&str, &str) {
    let input = input.trim_start();
    match input.split_once(char::is_whitespace) {
        Some((token, rest)) => (token, rest.trim_start()),
        None => (input, ""),
    }
}

fn pointer(command: &'static str, token: &str) -> Result<Pointer, ParseError> {
    if token.is_empty() {
        return Err(ParseError::MissingArgument {
            command,
            expected: "a pointer",
        });
    }
    token
        .parse::<u32>()
        .map(Pointer::from)
        .map_err(|_| ParseError::InvalidNumber {
            value: token.to_string(),
        })
}

fn no_arguments(command: Command, rest: &str) -> Result<Command, ParseError> {
    match split_token(rest).0 {
        "" => Ok(command),
        argument => Err(ParseError::UnexpectedArgument {
            command: command.name(),
            argument: argument.to_string(),
        }),
    }
}

fn single_pointer(command: &'static str, rest: &str) -> Result<Pointer, ParseError> {
    let (token, rest) = split_token(rest);
    let pointer = pointer(command, token)?;
    match split_token(rest).0 {
        "" => Ok(pointer),
        argument => Err(ParseError::UnexpectedArgument {
            command,
            argument: argument.to_string(),
        }),
    }
}

impl FromStr for Command {
    type Err = ParseError;

    fn from_str(line: &str) -> Result<Command, ParseError> {
        let (name, rest) = split_token(line.trim_end());
        match name {
            "" => Err(ParseError::Empty),
            "id" => no_arguments(Command::Identify, rest),
            "status" => no_arguments(Command::Status, rest),
            "rstfifo" => no_arguments(Command::ResetFifo, rest),
            "rstfpga" => no_arguments(Command::ResetFpga, rest),
            "abort" => no_arguments(Command::Abort, rest),
            "exit" => no_arguments(Command::Disconnect, rest),
            "load" => {
                let (token, path) = split_token(rest);
                let pointer = pointer("load", token)?;
                if path.is_empty() {
                    return Err(ParseError::MissingArgument {
                        command: "load",
                        expected: "a file path",
                    });
                }
                Ok(Command::Load {
                    pointer,
                    path: path.into(),
                })
            }
            "rstptr" => {
                let (token, _) = split_token(rest);
                if token == "all" {
                    no_arguments(Command::ResetPointer(PointerTarget::All), &rest[3..])
                } else {
                    single_pointer("rstptr", rest)
                        .map(|p| Command::ResetPointer(PointerTarget::One(p)))
                }
            }
            "route" => single_pointer("route", rest).map(|pointer| Command::Route { pointer }),
            "custom" => {
                let (flag, after_flag) = split_token(rest);
                let binary = flag == "-b";
                let payload = if binary {
                    after_flag.split_whitespace().collect::<String>()
                } else {
                    rest.split_whitespace().collect::<Vec<_>>().join(" ")
                };
                if payload.is_empty() {
                    return Err(ParseError::MissingArgument {
                        command: "custom",
                        expected: "a payload",
                    });
                }
                Ok(Command::Custom { payload, binary })
            }
            other => Err(ParseError::UnknownCommand(other.to_string())),
        }
    }
}
