use std::fmt;
use std::net::SocketAddr;

use crate::error::ProtocolError;

/// Every message understood on the wire, parsed from its first token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// `LEADER? [LEADER]`
    LeaderQuery { announce_leader: bool },
    Ping,
    Pong,
    Yes,
    NoLeader,
    UnknownCommand,
    /// Bare `ip:port` sent by a non-leader in reply to `LEADER?`.
    LeaderAddress(String),
    NewElection { leader_count: usize, difficulty: u32, payload: String },
    Election { difficulty: u32, payload: String },
    Win { nonce: String },
    WinAdvice { address: String },
    WinAccepted,
    WinRejected,
    Elected { addresses: Vec<String> },
    GetBlockchain,
    BlockchainData { data: String },
    /// Anything else; answered with `UNKNOWN_COMMAND`.
    Unknown(String),
}

impl Command {
    /// Parses whitespace-separated text. Empty text yields `Ok(None)`.
    pub fn parse(text: &str) -> Result<Option<Self>, ProtocolError> {
        let mut tokens = text.split_whitespace();
        let Some(verb) = tokens.next() else {
            return Ok(None);
        };

        let command = match verb {
            "LEADER?" => Command::LeaderQuery {
                announce_leader: tokens.next() == Some("LEADER"),
            },
            "PING" => Command::Ping,
            "PONG" => Command::Pong,
            "YES" => Command::Yes,
            "NO_LEADER" => Command::NoLeader,
            "UNKNOWN_COMMAND" => Command::UnknownCommand,
            "NEW_ELECTION" => {
                const NAME: &str = "NEW_ELECTION";
                let leader_count = number(NAME, tokens.next())?;
                let difficulty = number(NAME, tokens.next())?;
                let payload = required(NAME, tokens.next())?.to_string();
                Command::NewElection { leader_count, difficulty, payload }
            }
            "ELECTION" => {
                const NAME: &str = "ELECTION";
                let difficulty = number(NAME, tokens.next())?;
                let payload = required(NAME, tokens.next())?.to_string();
                Command::Election { difficulty, payload }
            }
            "WIN" => Command::Win {
                nonce: required("WIN", tokens.next())?.to_string(),
            },
            "WIN_ADVICE" => Command::WinAdvice {
                address: required("WIN_ADVICE", tokens.next())?.to_string(),
            },
            "WIN_ACCEPTED" => Command::WinAccepted,
            "WIN_REJECTED" => Command::WinRejected,
            "ELECTED" => Command::Elected {
                addresses: tokens.map(str::to_string).collect(),
            },
            "GET_BLOCKCHAIN" => Command::GetBlockchain,
            "BLOCKCHAIN_DATA" => Command::BlockchainData {
                data: required("BLOCKCHAIN_DATA", tokens.next())?.to_string(),
            },
            other if other.parse::<SocketAddr>().is_ok() => Command::LeaderAddress(other.to_string()),
            other => Command::Unknown(other.to_string()),
        };
        Ok(Some(command))
    }
}

fn required<'a>(command: &'static str, token: Option<&'a str>) -> Result<&'a str, ProtocolError> {
    token.ok_or(ProtocolError::MissingArgument { command })
}

fn number<T: std::str::FromStr>(command: &'static str, token: Option<&str>) -> Result<T, ProtocolError> {
    let value = required(command, token)?;
    value.parse().map_err(|_| ProtocolError::InvalidArgument {
        command,
        value: value.to_string(),
    })
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::LeaderQuery { announce_leader: true } => f.write_str("LEADER? LEADER"),
            Command::LeaderQuery { announce_leader: false } => f.write_str("LEADER?"),
            Command::Ping => f.write_str("PING"),
            Command::Pong => f.write_str("PONG"),
            Command::Yes => f.write_str("YES"),
            Command::NoLeader => f.write_str("NO_LEADER"),
            Command::UnknownCommand => f.write_str("UNKNOWN_COMMAND"),
            Command::LeaderAddress(address) => f.write_str(address),
            Command::NewElection { leader_count, difficulty, payload } => {
                write!(f, "NEW_ELECTION {} {} {}", leader_count, difficulty, payload)
            }
            Command::Election { difficulty, payload } => write!(f, "ELECTION {} {}", difficulty, payload),
            Command::Win { nonce } => write!(f, "WIN {}", nonce),
            Command::WinAdvice { address } => write!(f, "WIN_ADVICE {}", address),
            Command::WinAccepted => f.write_str("WIN_ACCEPTED"),
            Command::WinRejected => f.write_str("WIN_REJECTED"),
            Command::Elected { addresses } => {
                f.write_str("ELECTED")?;
                for address in addresses {
                    write!(f, " {}", address)?;
                }
                Ok(())
            }
            Command::GetBlockchain => f.write_str("GET_BLOCKCHAIN"),
            Command::BlockchainData { data } => write!(f, "BLOCKCHAIN_DATA {}", data),
            Command::Unknown(verb) => f.write_str(verb),
        }
    }
}
