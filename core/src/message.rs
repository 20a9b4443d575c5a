//! Protocol message parsing and formatting
//!
//! A line on the wire has the shape
//! `[:prefix ]COMMAND[ middle...][ :trailing]`. Middle parameters never
//! contain spaces; the trailing parameter is introduced by ` :` and runs to
//! the end of the line. The line terminator is handled by the framer, not
//! here.
//!
//! Messages can only be built with parts the wire can carry, so formatting
//! a message and parsing the line always gives the same message back.

use crate::{Error, Response, Result, User};
use std::fmt;
use std::str::FromStr;

/// Characters no part of a line may contain
const FORBIDDEN: [char; 3] = ['\r', '\n', '\0'];

/// Message command, either a named command or a numeric reply
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Command {
    Pass,
    Nick,
    User,
    Join,
    Part,
    Kick,
    Privmsg,
    Notice,
    Ping,
    Pong,
    Quit,
    Error,
    Mode,
    Topic,
    /// Numeric reply with a known symbolic name
    Response(Response),
    /// Anything else; unknown numerics keep their digits
    Other(OtherCommand),
}

/// A command token with no named variant
///
/// Only built by [`Command::parse`], so it is always upper-cased, well
/// formed and never the token of a named command or known numeric.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct OtherCommand(String);

impl OtherCommand {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OtherCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Command {
    /// Parse a command token: letters, or a 3-digit numeric
    pub fn parse(token: &str) -> Result<Self> {
        if !Self::is_valid_token(token) {
            return Err(Error::MalformedMessage(format!("invalid command '{}'", token)));
        }
        let upper = token.to_ascii_uppercase();
        let command = match upper.as_str() {
            "PASS" => Command::Pass,
            "NICK" => Command::Nick,
            "USER" => Command::User,
            "JOIN" => Command::Join,
            "PART" => Command::Part,
            "KICK" => Command::Kick,
            "PRIVMSG" => Command::Privmsg,
            "NOTICE" => Command::Notice,
            "PING" => Command::Ping,
            "PONG" => Command::Pong,
            "QUIT" => Command::Quit,
            "ERROR" => Command::Error,
            "MODE" => Command::Mode,
            "TOPIC" => Command::Topic,
            _ => upper
                .parse::<u16>()
                .ok()
                .filter(|_| upper.len() == 3)
                .and_then(Response::from_code)
                .map(Command::Response)
                .unwrap_or(Command::Other(OtherCommand(upper))),
        };
        Ok(command)
    }

    /// The reply this command stands for, if it is a known numeric
    pub fn response(&self) -> Option<Response> {
        match self {
            Command::Response(response) => Some(*response),
            _ => None,
        }
    }

    /// Whether a raw command token is shaped like a command
    fn is_valid_token(token: &str) -> bool {
        let is_alpha = !token.is_empty() && token.bytes().all(|b| b.is_ascii_alphabetic());
        let is_numeric = token.len() == 3 && token.bytes().all(|b| b.is_ascii_digit());
        is_alpha || is_numeric
    }
}

impl FromStr for Command {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Command::parse(s)
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Command::Pass => "PASS",
            Command::Nick => "NICK",
            Command::User => "USER",
            Command::Join => "JOIN",
            Command::Part => "PART",
            Command::Kick => "KICK",
            Command::Privmsg => "PRIVMSG",
            Command::Notice => "NOTICE",
            Command::Ping => "PING",
            Command::Pong => "PONG",
            Command::Quit => "QUIT",
            Command::Error => "ERROR",
            Command::Mode => "MODE",
            Command::Topic => "TOPIC",
            Command::Response(response) => return write!(f, "{}", response),
            Command::Other(cmd) => return write!(f, "{}", cmd),
        };
        write!(f, "{}", s)
    }
}

/// Whether `param` can be sent as a middle (non-trailing) parameter
fn is_middle(param: &str) -> bool {
    !param.is_empty() && !param.starts_with(':') && !param.contains(' ') && !param.contains(FORBIDDEN)
}

/// Whether `param` can be sent as a trailing parameter
fn is_trailing(param: &str) -> bool {
    !param.contains(FORBIDDEN)
}

/// Make `param` sendable as a middle parameter by dropping what the wire
/// cannot carry there
fn clean_middle(param: &str) -> String {
    let cleaned: String = param
        .chars()
        .filter(|c| !c.is_whitespace() && !FORBIDDEN.contains(c))
        .collect();
    match cleaned.trim_start_matches(':') {
        "" => "*".to_string(),
        rest => rest.to_string(),
    }
}

/// Make `param` sendable as a trailing parameter
fn clean_trailing(param: &str) -> String {
    param.chars().filter(|c| !FORBIDDEN.contains(c)).collect()
}

/// One protocol message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    prefix: Option<String>,
    command: Command,
    params: Vec<String>,
    trailing: bool,
}

impl Message {
    /// Create a new message without a prefix
    ///
    /// The last parameter is put in trailing form when it has to be: when it
    /// is empty, contains a space or starts with `:`. Every other parameter
    /// must be a valid middle parameter.
    pub fn new(command: Command, params: Vec<String>) -> Result<Self> {
        let trailing = params.last().map(|last| !is_middle(last)).unwrap_or(false);
        Self::build(command, params, trailing)
    }

    /// Create a message whose last parameter is always sent in trailing form
    pub fn with_trailing(command: Command, mut middle: Vec<String>, trailing: impl Into<String>) -> Result<Self> {
        middle.push(trailing.into());
        Self::build(command, middle, true)
    }

    fn build(command: Command, params: Vec<String>, trailing: bool) -> Result<Self> {
        let middle_count = if trailing { params.len().saturating_sub(1) } else { params.len() };
        if let Some(bad) = params[..middle_count].iter().find(|p| !is_middle(p)) {
            return Err(Error::MalformedMessage(format!("invalid parameter '{}'", bad.escape_debug())));
        }
        if let Some(last) = params.get(middle_count) {
            if !is_trailing(last) {
                return Err(Error::MalformedMessage(format!("invalid parameter '{}'", last.escape_debug())));
            }
        }
        Ok(Self {
            prefix: None,
            command,
            params,
            trailing,
        })
    }

    /// Build a message from parts that may need cleaning; used by the
    /// outbound constructors, which cannot fail
    fn cleaned(command: Command, middle: &[&str], last: Option<&str>) -> Self {
        let mut params: Vec<String> = middle.iter().map(|p| clean_middle(p)).collect();
        let trailing = last.is_some();
        params.extend(last.map(clean_trailing));
        Self {
            prefix: None,
            command,
            params,
            trailing,
        }
    }

    /// Like [`cleaned`](Self::cleaned) with a single parameter, sent in
    /// trailing form only if it has to be
    fn cleaned_single(command: Command, param: &str) -> Self {
        let param = clean_trailing(param);
        let trailing = !is_middle(&param);
        Self {
            prefix: None,
            command,
            params: vec![param],
            trailing,
        }
    }

    /// Attach a prefix to this message
    pub fn prefixed(mut self, prefix: impl Into<String>) -> Result<Self> {
        let prefix = prefix.into();
        if prefix.is_empty() || prefix.contains(' ') || prefix.contains(FORBIDDEN) {
            return Err(Error::MalformedMessage(format!("invalid prefix '{}'", prefix.escape_debug())));
        }
        self.prefix = Some(prefix);
        Ok(self)
    }

    /// Parse a single line (without its CR/LF terminator)
    pub fn parse(line: &str) -> Result<Self> {
        let malformed = || Error::MalformedMessage(line.to_string());

        if line.contains(FORBIDDEN) {
            return Err(malformed());
        }

        let mut rest = line;
        let prefix = match rest.strip_prefix(':') {
            Some(stripped) => {
                let (prefix, after) = stripped.split_once(' ').ok_or_else(malformed)?;
                if prefix.is_empty() {
                    return Err(malformed());
                }
                rest = after.trim_start_matches(' ');
                Some(prefix.to_string())
            }
            None => None,
        };

        let (token, rest) = match rest.split_once(' ') {
            Some((token, rest)) => (token, Some(rest)),
            None => (rest, None),
        };
        let command = Command::parse(token).map_err(|_| malformed())?;

        let mut params = Vec::new();
        let mut trailing = false;
        if let Some(rest) = rest {
            let (middle, trail) = match rest.strip_prefix(':') {
                Some(trail) => ("", Some(trail)),
                None => match rest.find(" :") {
                    Some(idx) => (&rest[..idx], Some(&rest[idx + 2..])),
                    None => (rest, None),
                },
            };

            params.extend(middle.split(' ').filter(|p| !p.is_empty()).map(str::to_string));
            if let Some(trail) = trail {
                params.push(trail.to_string());
                trailing = true;
            }
        }

        Ok(Message {
            prefix,
            command,
            params,
            trailing,
        })
    }

    /// Prefix (server name or `nick!user@host`)
    pub fn prefix(&self) -> Option<&str> {
        self.prefix.as_deref()
    }

    pub fn command(&self) -> &Command {
        &self.command
    }

    /// Parameters; the last one is the trailing parameter if [`has_trailing`](Self::has_trailing)
    pub fn params(&self) -> &[String] {
        &self.params
    }

    /// Whether the last parameter is sent in trailing (`:`) form
    pub fn has_trailing(&self) -> bool {
        self.trailing
    }

    /// The sender of this message, if its prefix is a user prefix
    pub fn sender(&self) -> Option<User> {
        self.prefix.as_deref().and_then(|prefix| User::parse(prefix).ok())
    }

    /// Get a parameter by position
    pub fn param(&self, index: usize) -> Option<&str> {
        self.params.get(index).map(String::as_str)
    }

    /// `PASS <password>`
    pub fn authenticate(password: &str) -> Self {
        Message::cleaned_single(Command::Pass, password)
    }

    /// `USER <username> 0 * :<realname>`
    pub fn register(username: &str, realname: &str) -> Self {
        Message::cleaned(Command::User, &[username, "0", "*"], Some(realname))
    }

    /// `NICK <nickname>`
    pub fn set_nickname(nick: &str) -> Self {
        Message::cleaned(Command::Nick, &[nick], None)
    }

    /// `JOIN <room>[,<room>...]`
    pub fn join<I, S>(rooms: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Message::cleaned(Command::Join, &[&join_list(rooms)], None)
    }

    /// `PART <room>[,<room>...]`
    pub fn leave<I, S>(rooms: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Message::cleaned(Command::Part, &[&join_list(rooms)], None)
    }

    /// `PONG :<token>`
    pub fn pong(token: &str) -> Self {
        Message::cleaned(Command::Pong, &[], Some(token))
    }

    /// `PRIVMSG <target> :<text>`
    pub fn privmsg(target: &str, text: &str) -> Self {
        Message::cleaned(Command::Privmsg, &[target], Some(text))
    }

    /// `QUIT :<reason>`
    pub fn quit(reason: &str) -> Self {
        Message::cleaned(Command::Quit, &[], Some(reason))
    }
}

fn join_list<I, S>(rooms: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    rooms
        .into_iter()
        .map(|room| room.as_ref().to_string())
        .collect::<Vec<_>>()
        .join(",")
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(prefix) = &self.prefix {
            write!(f, ":{} ", prefix)?;
        }
        write!(f, "{}", self.command)?;

        let last = self.params.len().saturating_sub(1);
        for (i, param) in self.params.iter().enumerate() {
            if i == last && self.trailing {
                write!(f, " :{}", param)?;
            } else {
                write!(f, " {}", param)?;
            }
        }
        Ok(())
    }
}

impl FromStr for Message {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Message::parse(s)
    }
}
