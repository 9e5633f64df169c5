//! The wire parser (§4.3). Turns one already-framed line (CR-LF already
//! stripped by [`crate::framer::LineFramer`]) into `{prefix?, command,
//! params[], trailing?}`.
//!
//! Grounded on `examples/tigercat2000-rust_irc/src/message_parse.rs`'s
//! `FromStr` + round-trip test style, generalized from that file's
//! closed `Command` enum to the flat `params`/`trailing` shape §3 and §4.3
//! of the spec require (handlers need arbitrary verbs, including ones this
//! server doesn't implement, to fall through to 421).

use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub prefix: Option<String>,
    pub command: String,
    pub params: Vec<String>,
    pub trailing: Option<String>,
}

impl Message {
    /// Parses one line with CR/LF already stripped. Returns `None` for a
    /// blank line (the framer already skips these, but a line that is only
    /// whitespace, or only a prefix, also parses to nothing actionable).
    pub fn parse(line: &str) -> Option<Message> {
        let line = line.trim_end();
        let mut rest = line.trim_start();
        if rest.is_empty() {
            return None;
        }

        let mut prefix = None;
        if let Some(stripped) = rest.strip_prefix(':') {
            let (p, r) = split_first_token(stripped);
            if p.is_empty() {
                return None;
            }
            prefix = Some(p.to_string());
            rest = r.trim_start();
        }
        if rest.is_empty() {
            return None;
        }

        let (command_tok, mut rest) = split_first_token(rest);
        if command_tok.is_empty() {
            return None;
        }
        let command = command_tok.to_uppercase();

        let mut params = Vec::new();
        let mut trailing = None;
        loop {
            rest = rest.trim_start();
            if rest.is_empty() {
                break;
            }
            if let Some(t) = rest.strip_prefix(':') {
                trailing = Some(t.to_string());
                break;
            }
            let (tok, r) = split_first_token(rest);
            if !tok.is_empty() {
                params.push(tok.to_string());
            }
            rest = r;
        }

        Some(Message {
            prefix,
            command,
            params,
            trailing,
        })
    }

    /// `params` with `trailing` appended, the shape handlers consume
    /// (§4.3 step 5: "handler receives params ++ [trailing]").
    pub fn all_params(&self) -> Vec<&str> {
        let mut v: Vec<&str> = self.params.iter().map(String::as_str).collect();
        if let Some(t) = &self.trailing {
            v.push(t.as_str());
        }
        v
    }
}

/// Splits off the first whitespace-delimited token, collapsing any run of
/// spaces that follows it (consecutive spaces collapse, empty tokens are
/// discarded, per §4.3).
fn split_first_token(s: &str) -> (&str, &str) {
    match s.find(' ') {
        Some(i) => (&s[..i], s[i + 1..].trim_start()),
        None => (s, ""),
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(p) = &self.prefix {
            write!(f, ":{} ", p)?;
        }
        write!(f, "{}", self.command)?;
        for p in &self.params {
            write!(f, " {}", p)?;
        }
        if let Some(t) = &self.trailing {
            write!(f, " :{}", t)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn parse_privmsg() {
        let m = Message::parse("PRIVMSG #meow :Hi there").unwrap();
        assert_eq!(m.command, "PRIVMSG");
        assert_eq!(m.params, vec!["#meow".to_string()]);
        assert_eq!(m.trailing.as_deref(), Some("Hi there"));
    }

    #[test]
    fn parse_ping_no_trailing() {
        let m = Message::parse("PING wuiobgv9").unwrap();
        assert_eq!(m.command, "PING");
        assert_eq!(m.all_params(), vec!["wuiobgv9"]);
    }

    #[test]
    fn lowercase_command_is_uppercased() {
        let m = Message::parse("join #meow").unwrap();
        assert_eq!(m.command, "JOIN");
    }

    #[test]
    fn prefix_is_stripped() {
        let m = Message::parse(":Alice!a@host PRIVMSG #meow :hey").unwrap();
        assert_eq!(m.prefix.as_deref(), Some("Alice!a@host"));
        assert_eq!(m.command, "PRIVMSG");
    }

    #[test]
    fn collapses_consecutive_spaces() {
        let m = Message::parse("USER   guest  0   *   :Real Name").unwrap();
        assert_eq!(m.params, vec!["guest", "0", "*"]);
        assert_eq!(m.trailing.as_deref(), Some("Real Name"));
    }

    #[test]
    fn trailing_with_leading_colon_only() {
        let m = Message::parse("QUIT :Leaving now").unwrap();
        assert_eq!(m.trailing.as_deref(), Some("Leaving now"));
    }

    #[test]
    fn no_params_no_trailing() {
        let m = Message::parse("MOTD").unwrap();
        assert!(m.params.is_empty());
        assert!(m.trailing.is_none());
    }

    #[test]
    fn blank_line_is_none() {
        assert!(Message::parse("").is_none());
        assert!(Message::parse("   ").is_none());
    }

    #[test]
    fn round_trip_matches_canonical_output() {
        let original = ":ircserv 001 Alice :Welcome to the IRC Network Alice!a@host";
        let parsed = Message::parse(original).unwrap();
        assert_eq!(parsed.to_string(), original);
    }

    #[test]
    fn round_trip_no_trailing() {
        let original = "JOIN #meow";
        let parsed = Message::parse(original).unwrap();
        assert_eq!(parsed.to_string(), original);
    }
}
