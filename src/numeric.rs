//! Numeric reply catalog. Codes and payload shapes follow
//! `examples/original_source/includes/IRCProtocol.hpp` and
//! `srcs/CommandHandlers.cpp`, which this server's wire format is grounded
//! on (see DESIGN.md).

pub const SERVER_NAME: &str = "ircserv";

#[repr(u16)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[allow(clippy::upper_case_acronyms)]
pub enum Numeric {
    RplWelcome = 1,
    RplYourHost = 2,
    RplCreated = 3,
    RplMyInfo = 4,
    RplISupport = 5,
    RplWhoReply = 352,
    RplEndOfWho = 315,
    RplWhoIsUser = 311,
    RplWhoIsServer = 312,
    RplWhoIsChannels = 319,
    RplEndOfWhoIs = 318,
    RplListStart = 321,
    RplList = 322,
    RplListEnd = 323,
    RplNoTopic = 331,
    RplTopic = 332,
    RplInviting = 341,
    RplNamReply = 353,
    RplEndOfNames = 366,
    RplChannelModeIs = 324,
    ErrNoSuchNick = 401,
    ErrNoSuchChannel = 403,
    ErrCannotSendToChan = 404,
    ErrNoRecipient = 411,
    ErrNoTextToSend = 412,
    ErrUnknownCommand = 421,
    ErrNoNicknameGiven = 431,
    ErrErroneousNickname = 432,
    ErrNicknameInUse = 433,
    ErrUserNotInChannel = 441,
    ErrNotOnChannel = 442,
    ErrUserOnChannel = 443,
    ErrNotRegistered = 451,
    ErrNeedMoreParams = 461,
    ErrAlreadyRegistered = 462,
    ErrPasswdMismatch = 464,
    ErrChannelIsFull = 471,
    ErrUnknownMode = 472,
    ErrInviteOnlyChan = 473,
    ErrBadChannelKey = 475,
    ErrChanOpPrivsNeeded = 482,
}

impl Numeric {
    pub fn code(self) -> u16 {
        self as u16
    }
}

/// Formats `:ircserv <code> <recipient> <rest>\r\n`. `recipient` should be
/// `*` when the connection has no nickname yet (§4.6).
pub fn reply(code: Numeric, recipient: &str, rest: &str) -> String {
    format!(
        ":{} {:03} {} {}\r\n",
        SERVER_NAME,
        code.code(),
        recipient,
        rest
    )
}

/// `recipient` falls back to `*` if empty, matching §4.6's rule for
/// not-yet-registered connections.
pub fn reply_for(code: Numeric, nickname: &str, rest: &str) -> String {
    let target = if nickname.is_empty() { "*" } else { nickname };
    reply(code, target, rest)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn formats_three_digit_code() {
        let line = reply(Numeric::RplWelcome, "Alice", ":hi");
        assert_eq!(line, ":ircserv 001 Alice :hi\r\n");
    }

    #[test]
    fn falls_back_to_star_for_anonymous() {
        let line = reply_for(Numeric::ErrNicknameInUse, "", "Alice :Nickname is already in use");
        assert_eq!(line, ":ircserv 433 * Alice :Nickname is already in use\r\n");
    }
}
