//! Command-line parsing.

use std::fmt;

use ledgerdesk_core::api::CallKind;

pub const USAGE: &str = "\
Usage: ledgerdesk <command> [args]

Commands:
  login [--endpoint URL] [--id ID]   Enroll and start a session
  logout                             End the session and forget the token
  status                             Show the session state
  whoami                             List identities visible to the session
  discover <channel>                 Show peers and chaincodes on a channel
  invoke <channel> <chaincode> <method> [args...]
  query <channel> <chaincode> <method> [args...]
  history [page]                     Show recorded results, newest first

Environment:
  LEDGERDESK_ENDPOINT, LEDGERDESK_ID, LEDGERDESK_STORAGE, ...
  RUST_LOG            Log filter (default: warn)
  LEDGERDESK_LOG_DIR  Also write daily log files here";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Login {
        endpoint: Option<String>,
        id: Option<String>,
    },
    Logout,
    Status,
    Whoami,
    Discover {
        channel: String,
    },
    Call {
        kind: CallKind,
        channel: String,
        chaincode: String,
        method: String,
        args: Vec<String>,
    },
    History {
        page: usize,
    },
    Help,
}

impl Command {
    /// Destination checked by the route guard before running.
    pub fn route(&self) -> &'static str {
        match self {
            Command::Login { .. } => "/login",
            Command::Logout => "/logout",
            Command::Status => "/status",
            Command::Whoami => "/whoami",
            Command::Discover { .. } => "/discover",
            Command::Call {
                kind: CallKind::Invoke,
                ..
            } => "/invoke",
            Command::Call {
                kind: CallKind::Query,
                ..
            } => "/query",
            Command::History { .. } => "/history",
            Command::Help => "/help",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UsageError(pub String);

impl fmt::Display for UsageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::error::Error for UsageError {}

fn usage(message: impl Into<String>) -> UsageError {
    UsageError(message.into())
}

/// Parse the arguments after the program name.
pub fn parse(args: &[String]) -> Result<Command, UsageError> {
    let Some((name, rest)) = args.split_first() else {
        return Ok(Command::Help);
    };

    match name.as_str() {
        "login" => parse_login(rest),
        "logout" => no_args(rest, Command::Logout),
        "status" => no_args(rest, Command::Status),
        "whoami" => no_args(rest, Command::Whoami),
        "discover" => match rest {
            [channel] => Ok(Command::Discover {
                channel: channel.clone(),
            }),
            _ => Err(usage("discover takes exactly one <channel>")),
        },
        "invoke" => parse_call(CallKind::Invoke, rest),
        "query" => parse_call(CallKind::Query, rest),
        "history" => match rest {
            [] => Ok(Command::History { page: 1 }),
            [page] => page
                .parse::<usize>()
                .ok()
                .filter(|p| *p > 0)
                .map(|page| Command::History { page })
                .ok_or_else(|| usage(format!("invalid page '{}'", page))),
            _ => Err(usage("history takes at most one [page]")),
        },
        "help" | "-h" | "--help" => Ok(Command::Help),
        other => Err(usage(format!("unknown command '{}'", other))),
    }
}

fn no_args(rest: &[String], command: Command) -> Result<Command, UsageError> {
    if rest.is_empty() {
        Ok(command)
    } else {
        Err(usage(format!("unexpected argument '{}'", rest[0])))
    }
}

fn parse_login(rest: &[String]) -> Result<Command, UsageError> {
    let mut endpoint = None;
    let mut id = None;
    let mut iter = rest.iter();

    while let Some(flag) = iter.next() {
        let slot = match flag.as_str() {
            "--endpoint" => &mut endpoint,
            "--id" => &mut id,
            other => return Err(usage(format!("unknown login option '{}'", other))),
        };
        let value = iter
            .next()
            .ok_or_else(|| usage(format!("{} needs a value", flag)))?;
        *slot = Some(value.clone());
    }

    Ok(Command::Login { endpoint, id })
}

fn parse_call(kind: CallKind, rest: &[String]) -> Result<Command, UsageError> {
    match rest {
        [channel, chaincode, method, args @ ..] => Ok(Command::Call {
            kind,
            channel: channel.clone(),
            chaincode: chaincode.clone(),
            method: method.clone(),
            args: args.to_vec(),
        }),
        _ => Err(usage(format!(
            "{} needs <channel> <chaincode> <method> [args...]",
            kind
        ))),
    }
}
