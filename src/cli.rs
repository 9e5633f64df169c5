//! Command-line argument parsing (§6). Grounded on the `clap` derive
//! usage pattern in the pack's other example repos; the teacher itself
//! read its port/password from `std::env::args` directly.

use clap::Parser;

use crate::error::{IrcError, Result};

#[derive(Debug, Parser)]
#[command(name = "ircserv", about = "A small, single-threaded IRC server")]
pub struct Cli {
    /// TCP port to listen on.
    pub port: String,

    /// Connection password clients must supply via PASS.
    pub password: String,
}

impl Cli {
    /// Validates the port string into a concrete `u16` (§6: "a malformed
    /// port argument is a startup error, not a runtime one").
    pub fn parsed_port(&self) -> Result<u16> {
        self.port
            .parse::<u16>()
            .ok()
            .filter(|p| *p != 0)
            .ok_or_else(|| IrcError::InvalidPort(self.port.clone()))
    }

    pub fn validate_password(&self) -> Result<()> {
        if self.password.is_empty() {
            return Err(IrcError::EmptyPassword);
        }
        Ok(())
    }
}
