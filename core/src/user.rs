//! Sender identities parsed from message prefixes

use crate::{Error, Result};
use std::fmt;
use std::str::FromStr;

/// The user that sent a message, parsed from a `nick!user@host` prefix
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct User {
    /// Display nickname
    pub nick: String,
    /// Login/account name
    pub username: String,
    /// Originating host
    pub host: String,
}

impl User {
    /// Create a new user
    pub fn new(nick: impl Into<String>, username: impl Into<String>, host: impl Into<String>) -> Self {
        Self {
            nick: nick.into(),
            username: username.into(),
            host: host.into(),
        }
    }

    /// Parse a `nick!user@host` prefix
    ///
    /// The nickname runs up to the first `!`, the user name up to the
    /// following `@` and the host is everything after it. All three parts
    /// must be non-empty.
    pub fn parse(prefix: &str) -> Result<Self> {
        let invalid = || Error::InvalidUser(prefix.to_string());

        let (nick, rest) = prefix.split_once('!').ok_or_else(invalid)?;
        let (username, host) = rest.split_once('@').ok_or_else(invalid)?;

        if nick.is_empty() || username.is_empty() || host.is_empty() {
            return Err(invalid());
        }

        Ok(Self::new(nick, username, host))
    }
}

impl FromStr for User {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        User::parse(s)
    }
}

impl fmt::Display for User {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}!{}@{}", self.nick, self.username, self.host)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_user_prefix() {
        let user = User::parse("alice!~alice@host.example.com").unwrap();
        assert_eq!(user.nick, "alice");
        assert_eq!(user.username, "~alice");
        assert_eq!(user.host, "host.example.com");
        assert_eq!(user.to_string(), "alice!~alice@host.example.com");
    }

    #[test]
    fn test_host_may_contain_separators() {
        let user = User::parse("bob!bob@gateway/web@cloak").unwrap();
        assert_eq!(user.username, "bob");
        assert_eq!(user.host, "gateway/web@cloak");
    }

    #[test]
    fn test_reject_server_prefix() {
        assert!(User::parse("irc.example.net").is_err());
        assert!(User::parse("nick!user").is_err());
        assert!(User::parse("!user@host").is_err());
        assert!(User::parse("nick!@host").is_err());
        assert!(User::parse("nick!user@").is_err());
    }
}
