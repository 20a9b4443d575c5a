//! Numeric server replies as defined in RFC 1459 and RFC 2812
//!
//! Only the replies the bot understands by name are listed here. Any other
//! three-digit code is kept verbatim by the codec.

use std::fmt;

macro_rules! responses {
    ($($variant:ident = $code:literal => $name:literal,)*) => {
        /// Numeric reply codes with a known symbolic name
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum Response {
            $($variant,)*
        }

        impl Response {
            /// Look up a numeric code in the code -> name table
            pub fn from_code(code: u16) -> Option<Self> {
                match code {
                    $($code => Some(Response::$variant),)*
                    _ => None,
                }
            }

            /// The numeric code of this reply
            pub fn code(&self) -> u16 {
                match self {
                    $(Response::$variant => $code,)*
                }
            }

            /// The symbolic name of this reply, e.g. `RPL_MYINFO`
            pub fn name(&self) -> &'static str {
                match self {
                    $(Response::$variant => $name,)*
                }
            }
        }
    };
}

responses! {
    // Connection registration
    RplWelcome = 1 => "RPL_WELCOME",
    RplYourHost = 2 => "RPL_YOURHOST",
    RplCreated = 3 => "RPL_CREATED",
    RplMyInfo = 4 => "RPL_MYINFO",
    RplISupport = 5 => "RPL_ISUPPORT",

    // Server queries
    RplUmodeIs = 221 => "RPL_UMODEIS",
    RplLUserClient = 251 => "RPL_LUSERCLIENT",
    RplLUserOp = 252 => "RPL_LUSEROP",
    RplLUserUnknown = 253 => "RPL_LUSERUNKNOWN",
    RplLUserChannels = 254 => "RPL_LUSERCHANNELS",
    RplLUserMe = 255 => "RPL_LUSERME",
    RplLocalUsers = 265 => "RPL_LOCALUSERS",
    RplGlobalUsers = 266 => "RPL_GLOBALUSERS",
    RplAway = 301 => "RPL_AWAY",
    RplUnaway = 305 => "RPL_UNAWAY",
    RplNowAway = 306 => "RPL_NOWAWAY",
    RplChannelModeIs = 324 => "RPL_CHANNELMODEIS",
    RplNoTopic = 331 => "RPL_NOTOPIC",
    RplTopic = 332 => "RPL_TOPIC",
    RplTopicWhoTime = 333 => "RPL_TOPICWHOTIME",
    RplNameReply = 353 => "RPL_NAMREPLY",
    RplEndOfNames = 366 => "RPL_ENDOFNAMES",
    RplMotd = 372 => "RPL_MOTD",
    RplMotdStart = 375 => "RPL_MOTDSTART",
    RplEndOfMotd = 376 => "RPL_ENDOFMOTD",

    // Error replies
    ErrNoSuchNick = 401 => "ERR_NOSUCHNICK",
    ErrNoSuchServer = 402 => "ERR_NOSUCHSERVER",
    ErrNoSuchChannel = 403 => "ERR_NOSUCHCHANNEL",
    ErrCannotSendToChan = 404 => "ERR_CANNOTSENDTOCHAN",
    ErrTooManyChannels = 405 => "ERR_TOOMANYCHANNELS",
    ErrUnknownCommand = 421 => "ERR_UNKNOWNCOMMAND",
    ErrNoMotd = 422 => "ERR_NOMOTD",
    ErrNoNicknameGiven = 431 => "ERR_NONICKNAMEGIVEN",
    ErrErroneousNickname = 432 => "ERR_ERRONEUSNICKNAME",
    ErrNicknameInUse = 433 => "ERR_NICKNAMEINUSE",
    ErrNickCollision = 436 => "ERR_NICKCOLLISION",
    ErrUnavailResource = 437 => "ERR_UNAVAILRESOURCE",
    ErrNotOnChannel = 442 => "ERR_NOTONCHANNEL",
    ErrNotRegistered = 451 => "ERR_NOTREGISTERED",
    ErrNeedMoreParams = 461 => "ERR_NEEDMOREPARAMS",
    ErrAlreadyRegistered = 462 => "ERR_ALREADYREGISTRED",
    ErrPasswordMismatch = 464 => "ERR_PASSWDMISMATCH",
    ErrYoureBannedCreep = 465 => "ERR_YOUREBANNEDCREEP",
    ErrChannelIsFull = 471 => "ERR_CHANNELISFULL",
    ErrUnknownMode = 472 => "ERR_UNKNOWNMODE",
    ErrInviteOnlyChan = 473 => "ERR_INVITEONLYCHAN",
    ErrBannedFromChan = 474 => "ERR_BANNEDFROMCHAN",
    ErrBadChannelKey = 475 => "ERR_BADCHANNELKEY",
    ErrBadChanMask = 476 => "ERR_BADCHANMASK",
    ErrNoChanModes = 477 => "ERR_NOCHANMODES",
    ErrChanOpPrivsNeeded = 482 => "ERR_CHANOPRIVSNEEDED",
    ErrRestricted = 484 => "ERR_RESTRICTED",
}

impl Response {
    /// Replies telling us the nickname we asked for cannot be used
    pub fn is_nick_error(&self) -> bool {
        matches!(
            self,
            Response::ErrNoNicknameGiven
                | Response::ErrErroneousNickname
                | Response::ErrNicknameInUse
                | Response::ErrNickCollision
                | Response::ErrUnavailResource
        )
    }

    /// Replies telling us a JOIN was refused; the room is the second parameter
    pub fn is_join_error(&self) -> bool {
        matches!(
            self,
            Response::ErrNoSuchChannel
                | Response::ErrTooManyChannels
                | Response::ErrChannelIsFull
                | Response::ErrInviteOnlyChan
                | Response::ErrBannedFromChan
                | Response::ErrBadChannelKey
                | Response::ErrBadChanMask
                | Response::ErrNoChanModes
        )
    }

    /// Replies that complete client registration
    pub fn is_registration_complete(&self) -> bool {
        matches!(self, Response::RplWelcome | Response::RplMyInfo)
    }
}

impl fmt::Display for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:03}", self.code())
    }
}
