//! Typed command grammar for both bot accounts.
//!
//! Whitespace-split, no quoting, no flags. Unrecognized or malformed input
//! comes back as a typed [`ParseError`] carrying the reply text, so the
//! dispatcher never has a crash path.

use thiserror::Error;

/// Minimum digits for a WhatsApp number, after stripping formatting.
const MIN_NUMBER_LEN: usize = 10;

pub const USAGE_LINK: &str = "Usage: /link <whatsapp_number>\nExample: /link 919876543210";
pub const USAGE_BROADCAST: &str = "Usage: /broadcast <message>";
pub const USAGE_UNLINK: &str = "Usage: /unlink <whatsapp_number>";
pub const USAGE_SONG: &str = "Usage: /song <search terms>\nExample: /song Amagulu";
pub const USAGE_ADMIN_BROADCAST: &str = "Usage: /admin_broadcast <message>";
pub const USAGE_ADMIN_PAIR: &str = "Usage: /admin_pair <whatsapp_number>";
pub const USAGE_ADMIN_CONTROL: &str =
    "Usage: /admin_control <number> <send|restart> [args]\n\
     send: /admin_control <number> send <jid> <message>";

/// A fully validated operator command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Start,
    Help,
    Link { number: String },
    Status,
    Broadcast { text: String },
    Unlink { number: String },
    Song { query: String },
    Admin,
    AdminUsers,
    AdminSessions,
    AdminBroadcast { text: String },
    AdminPair { number: String },
    AdminControl { number: String, action: ControlAction },
    AdminLogout,
}

/// Sub-action of `/admin_control`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlAction {
    Send { to: String, text: String },
    Restart,
}

/// Why an input did not become a [`Command`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    /// Plain text, not a slash command — silently ignored by the dispatcher.
    #[error("not a command")]
    NotACommand,

    #[error("Unknown command: /{0}. Use /help to see what I understand.")]
    Unknown(String),

    #[error("{0}")]
    Usage(&'static str),

    #[error("❌ Invalid number. Must be at least 10 digits.")]
    InvalidNumber,
}

/// Parse one message's text.
pub fn parse(text: &str) -> Result<Command, ParseError> {
    let mut parts = text.split_whitespace();
    let head = parts.next().ok_or(ParseError::NotACommand)?;
    let Some(head) = head.strip_prefix('/') else {
        return Err(ParseError::NotACommand);
    };
    // "/link@MyBridgeBot 123" arrives with the bot name attached in groups.
    let name = head.split('@').next().unwrap_or(head);
    let args: Vec<&str> = parts.collect();

    match name {
        "start" => Ok(Command::Start),
        "help" => Ok(Command::Help),
        "status" => Ok(Command::Status),
        "admin" => Ok(Command::Admin),
        "admin_users" => Ok(Command::AdminUsers),
        "admin_sessions" => Ok(Command::AdminSessions),
        "admin_logout" => Ok(Command::AdminLogout),
        "link" => match args.as_slice() {
            [raw] => Ok(Command::Link {
                number: normalize_number(raw)?,
            }),
            _ => Err(ParseError::Usage(USAGE_LINK)),
        },
        "unlink" => match args.as_slice() {
            [raw] => Ok(Command::Unlink {
                number: normalize_number(raw)?,
            }),
            _ => Err(ParseError::Usage(USAGE_UNLINK)),
        },
        "broadcast" => join_rest(&args)
            .map(|text| Command::Broadcast { text })
            .ok_or(ParseError::Usage(USAGE_BROADCAST)),
        "song" => join_rest(&args)
            .map(|query| Command::Song { query })
            .ok_or(ParseError::Usage(USAGE_SONG)),
        "admin_broadcast" => join_rest(&args)
            .map(|text| Command::AdminBroadcast { text })
            .ok_or(ParseError::Usage(USAGE_ADMIN_BROADCAST)),
        "admin_pair" => match args.as_slice() {
            [raw] => Ok(Command::AdminPair {
                number: normalize_number(raw)?,
            }),
            _ => Err(ParseError::Usage(USAGE_ADMIN_PAIR)),
        },
        "admin_control" => parse_admin_control(&args),
        other => Err(ParseError::Unknown(other.to_string())),
    }
}

fn parse_admin_control(args: &[&str]) -> Result<Command, ParseError> {
    let [raw_number, action, rest @ ..] = args else {
        return Err(ParseError::Usage(USAGE_ADMIN_CONTROL));
    };
    let number = normalize_number(raw_number)?;

    match *action {
        "restart" => Ok(Command::AdminControl {
            number,
            action: ControlAction::Restart,
        }),
        "send" => {
            let [to, text_parts @ ..] = rest else {
                return Err(ParseError::Usage(USAGE_ADMIN_CONTROL));
            };
            if text_parts.is_empty() {
                return Err(ParseError::Usage(USAGE_ADMIN_CONTROL));
            }
            Ok(Command::AdminControl {
                number,
                action: ControlAction::Send {
                    to: to.to_string(),
                    text: text_parts.join(" "),
                },
            })
        },
        _ => Err(ParseError::Usage(USAGE_ADMIN_CONTROL)),
    }
}

/// Strip everything but digits and enforce the minimum length.
fn normalize_number(raw: &str) -> Result<String, ParseError> {
    let digits: String = raw.chars().filter(char::is_ascii_digit).collect();
    if digits.len() < MIN_NUMBER_LEN {
        return Err(ParseError::InvalidNumber);
    }
    Ok(digits)
}

fn join_rest(args: &[&str]) -> Option<String> {
    if args.is_empty() {
        None
    } else {
        Some(args.join(" "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_text_is_not_a_command() {
        assert_eq!(parse("hello there"), Err(ParseError::NotACommand));
        assert_eq!(parse(""), Err(ParseError::NotACommand));
        assert_eq!(parse("   "), Err(ParseError::NotACommand));
    }

    #[test]
    fn unknown_command() {
        assert_eq!(parse("/frobnicate"), Err(ParseError::Unknown("frobnicate".into())));
    }

    #[test]
    fn simple_commands() {
        assert_eq!(parse("/start"), Ok(Command::Start));
        assert_eq!(parse("/help"), Ok(Command::Help));
        assert_eq!(parse("/status"), Ok(Command::Status));
        assert_eq!(parse("/admin"), Ok(Command::Admin));
        assert_eq!(parse("/admin_logout"), Ok(Command::AdminLogout));
    }

    #[test]
    fn bot_name_suffix_stripped() {
        assert_eq!(parse("/status@MyBridgeBot"), Ok(Command::Status));
        assert_eq!(
            parse("/link@MyBridgeBot 919876543210"),
            Ok(Command::Link {
                number: "919876543210".into()
            })
        );
    }

    #[test]
    fn link_normalizes_formatting() {
        assert_eq!(
            parse("/link +1 (987) 654-3210").ok(),
            None,
            "spaces split into extra args"
        );
        assert_eq!(
            parse("/link +1-987-654-3210"),
            Ok(Command::Link {
                number: "19876543210".into()
            })
        );
    }

    #[test]
    fn link_rejects_short_numbers() {
        assert_eq!(parse("/link 12345"), Err(ParseError::InvalidNumber));
    }

    #[test]
    fn link_wrong_arity_is_usage() {
        assert_eq!(parse("/link"), Err(ParseError::Usage(USAGE_LINK)));
        assert_eq!(parse("/link 1 2"), Err(ParseError::Usage(USAGE_LINK)));
    }

    #[test]
    fn broadcast_joins_words() {
        assert_eq!(
            parse("/broadcast hello   world"),
            Ok(Command::Broadcast {
                text: "hello world".into()
            })
        );
        assert_eq!(parse("/broadcast"), Err(ParseError::Usage(USAGE_BROADCAST)));
    }

    #[test]
    fn song_query() {
        assert_eq!(
            parse("/song never gonna give you up"),
            Ok(Command::Song {
                query: "never gonna give you up".into()
            })
        );
        assert_eq!(parse("/song"), Err(ParseError::Usage(USAGE_SONG)));
    }

    #[test]
    fn admin_pair() {
        assert_eq!(
            parse("/admin_pair 919876543210"),
            Ok(Command::AdminPair {
                number: "919876543210".into()
            })
        );
        assert_eq!(parse("/admin_pair"), Err(ParseError::Usage(USAGE_ADMIN_PAIR)));
    }

    #[test]
    fn admin_control_restart() {
        assert_eq!(
            parse("/admin_control 919876543210 restart"),
            Ok(Command::AdminControl {
                number: "919876543210".into(),
                action: ControlAction::Restart,
            })
        );
    }

    #[test]
    fn admin_control_send() {
        assert_eq!(
            parse("/admin_control 919876543210 send 111@s.whatsapp.net hello there"),
            Ok(Command::AdminControl {
                number: "919876543210".into(),
                action: ControlAction::Send {
                    to: "111@s.whatsapp.net".into(),
                    text: "hello there".into(),
                },
            })
        );
    }

    #[test]
    fn admin_control_malformed() {
        for input in [
            "/admin_control",
            "/admin_control 919876543210",
            "/admin_control 919876543210 explode",
            "/admin_control 919876543210 send",
            "/admin_control 919876543210 send 111@s.whatsapp.net",
        ] {
            assert_eq!(
                parse(input),
                Err(ParseError::Usage(USAGE_ADMIN_CONTROL)),
                "input: {input}"
            );
        }
    }
}
