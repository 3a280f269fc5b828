//! Operator console command parsing
//!
//! One command per line; words are separated by whitespace. Parsing is
//! kept apart from execution so the grammar can be tested without a
//! running session.

use cocomd_common::api::{Mode, UploadKind};
use std::path::PathBuf;

use crate::error::{ClientError, Result};

pub const HELP: &str = "\
Commands:
  mode maturity|disease           select an operating mode
  back                            return to mode selection
  stream start|stop               open or close the live detection stream
  count start|stop                start or stop a counting session
  upload maturity|disease <path>  classify an image file
  capture                         export the displayed frame
  context <location> <device>     set metadata sent with uploads
  status                          show the current session state
  help                            show this help
  quit                            exit";

/// A parsed console line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperatorCommand {
    Mode(Mode),
    Back,
    Stream { start: bool },
    Count { start: bool },
    Upload { kind: UploadKind, path: PathBuf },
    Capture,
    Context { location: String, device: String },
    Status,
    Help,
    Quit,
}

/// Parse one console line; blank lines and `#` comments yield `None`
pub fn parse(line: &str) -> Result<Option<OperatorCommand>> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return Ok(None);
    }

    let words: Vec<&str> = line.split_whitespace().collect();
    let command = match words.as_slice() {
        ["mode", mode] => OperatorCommand::Mode(mode.parse()?),
        ["back"] => OperatorCommand::Back,
        ["stream", toggle] => OperatorCommand::Stream {
            start: parse_toggle(toggle)?,
        },
        ["count", toggle] => OperatorCommand::Count {
            start: parse_toggle(toggle)?,
        },
        ["upload", kind, rest @ ..] if !rest.is_empty() => {
            // Paths may contain spaces; take everything after the kind
            let path = line["upload".len()..].trim_start()[kind.len()..].trim();
            OperatorCommand::Upload {
                kind: kind.parse()?,
                path: PathBuf::from(path),
            }
        }
        ["capture"] => OperatorCommand::Capture,
        ["context", location, device] => OperatorCommand::Context {
            location: location.to_string(),
            device: device.to_string(),
        },
        ["status"] => OperatorCommand::Status,
        ["help"] | ["?"] => OperatorCommand::Help,
        ["quit"] | ["exit"] => OperatorCommand::Quit,
        _ => {
            return Err(ClientError::InvalidInput(format!(
                "unrecognized command: {} (try 'help')",
                line
            )))
        }
    };

    Ok(Some(command))
}

fn parse_toggle(word: &str) -> Result<bool> {
    match word {
        "start" | "on" => Ok(true),
        "stop" | "off" => Ok(false),
        other => Err(ClientError::InvalidInput(format!(
            "expected start or stop, got {}",
            other
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_mode_and_toggles() {
        assert_eq!(
            parse("mode maturity").unwrap(),
            Some(OperatorCommand::Mode(Mode::Maturity))
        );
        assert_eq!(
            parse("  stream start ").unwrap(),
            Some(OperatorCommand::Stream { start: true })
        );
        assert_eq!(
            parse("count stop").unwrap(),
            Some(OperatorCommand::Count { start: false })
        );
        assert_eq!(parse("back").unwrap(), Some(OperatorCommand::Back));
    }

    #[test]
    fn test_parse_upload_keeps_spaces_in_path() {
        assert_eq!(
            parse("upload disease /tmp/palm photos/leaf 1.jpg").unwrap(),
            Some(OperatorCommand::Upload {
                kind: UploadKind::Disease,
                path: PathBuf::from("/tmp/palm photos/leaf 1.jpg"),
            })
        );
    }

    #[test]
    fn test_parse_context() {
        assert_eq!(
            parse("context Davao cam-02").unwrap(),
            Some(OperatorCommand::Context {
                location: "Davao".to_string(),
                device: "cam-02".to_string(),
            })
        );
    }

    #[test]
    fn test_blank_and_comment_lines() {
        assert_eq!(parse("").unwrap(), None);
        assert_eq!(parse("   # note").unwrap(), None);
    }

    #[test]
    fn test_parse_errors() {
        assert!(parse("mode banana").is_err());
        assert!(parse("stream maybe").is_err());
        assert!(parse("upload maturity").is_err());
        assert!(parse("upload fruit a.jpg").is_err());
        assert!(parse("dance").is_err());
        assert!(parse("upload   maturity   ").is_err());
        assert!(matches!(
            parse("context only-one"),
            Err(ClientError::InvalidInput(_))
        ));
    }
}
