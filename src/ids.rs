//! Stable integer handles for the Registry's arena (see DESIGN.md's note on
//! cyclic references). A [`ClientId`] survives the lifetime of one
//! connection; the Reactor derives an [`mio::Token`] from it 1:1 when
//! registering a socket with `mio::Poll`.

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClientId(pub usize);

impl From<ClientId> for mio::Token {
    fn from(id: ClientId) -> Self {
        mio::Token(id.0)
    }
}

impl From<mio::Token> for ClientId {
    fn from(token: mio::Token) -> Self {
        ClientId(token.0)
    }
}
