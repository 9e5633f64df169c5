//! The Channel half of the data model (§3). Field shapes and the
//! member/operator/invite split are grounded on
//! `examples/original_source/includes/Channel.hpp` and the mode handling
//! in `srcs/CommandHandlers.cpp::handleMode`, with `Client*` pointers
//! replaced by [`ClientId`] handles per the arena-and-indices note in
//! §9 of the spec.

use std::collections::BTreeSet;

use crate::ids::ClientId;

#[derive(Debug, Default, Clone)]
pub struct Modes {
    pub invite_only: bool,
    pub topic_restricted: bool,
    pub key: Option<String>,
    /// 0 = no limit.
    pub user_limit: usize,
}

impl Modes {
    /// `+` followed by any of `itkl` currently set, empty string if none
    /// (§4.5 MODE query reply).
    pub fn mode_string(&self) -> String {
        let mut flags = String::new();
        if self.invite_only {
            flags.push('i');
        }
        if self.topic_restricted {
            flags.push('t');
        }
        if self.key.is_some() {
            flags.push('k');
        }
        if self.user_limit > 0 {
            flags.push('l');
        }
        if flags.is_empty() {
            String::new()
        } else {
            format!("+{flags}")
        }
    }
}

#[derive(Debug)]
pub struct Channel {
    pub name: String,
    pub topic: String,
    pub members: BTreeSet<ClientId>,
    pub operators: BTreeSet<ClientId>,
    pub invites: BTreeSet<ClientId>,
    pub modes: Modes,
}

impl Channel {
    /// A freshly created channel has the creator as its sole member and
    /// operator (§3, §4.5 JOIN).
    pub fn new(name: impl Into<String>, creator: ClientId) -> Self {
        let mut members = BTreeSet::new();
        members.insert(creator);
        let mut operators = BTreeSet::new();
        operators.insert(creator);
        Self {
            name: name.into(),
            topic: String::new(),
            members,
            operators,
            invites: BTreeSet::new(),
            modes: Modes::default(),
        }
    }

    pub fn is_member(&self, id: ClientId) -> bool {
        self.members.contains(&id)
    }

    pub fn is_operator(&self, id: ClientId) -> bool {
        self.operators.contains(&id)
    }

    pub fn is_invited(&self, id: ClientId) -> bool {
        self.invites.contains(&id)
    }

    pub fn add_member(&mut self, id: ClientId) {
        self.members.insert(id);
        self.invites.remove(&id);
    }

    /// Removes `id` from members, operators, and invites together —
    /// invariant (I2) requires operator-set stay a subset of member-set.
    pub fn remove_member(&mut self, id: ClientId) {
        self.members.remove(&id);
        self.operators.remove(&id);
        self.invites.remove(&id);
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.modes.user_limit > 0 && self.members.len() >= self.modes.user_limit
    }

    /// If the operator set is empty but the channel still has members,
    /// promotes the lowest-handle remaining member and returns it (§4.5
    /// PART/KICK/QUIT operator succession).
    pub fn promote_operator_if_needed(&mut self) -> Option<ClientId> {
        if !self.operators.is_empty() {
            return None;
        }
        let promoted = *self.members.iter().next()?;
        self.operators.insert(promoted);
        Some(promoted)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn creator_is_sole_member_and_operator() {
        let c = Channel::new("#r", ClientId(1));
        assert!(c.is_member(ClientId(1)));
        assert!(c.is_operator(ClientId(1)));
        assert_eq!(c.members.len(), 1);
    }

    #[test]
    fn removing_member_drops_operator_and_invite() {
        let mut c = Channel::new("#r", ClientId(1));
        c.add_member(ClientId(2));
        c.operators.insert(ClientId(2));
        c.invites.insert(ClientId(2));
        c.remove_member(ClientId(2));
        assert!(!c.is_operator(ClientId(2)));
        assert!(!c.is_invited(ClientId(2)));
    }

    #[test]
    fn promotes_when_operator_set_empties() {
        let mut c = Channel::new("#r", ClientId(1));
        c.add_member(ClientId(2));
        c.remove_member(ClientId(1));
        let promoted = c.promote_operator_if_needed();
        assert_eq!(promoted, Some(ClientId(2)));
        assert!(c.is_operator(ClientId(2)));
    }

    #[test]
    fn does_not_promote_when_operator_present() {
        let mut c = Channel::new("#r", ClientId(1));
        c.add_member(ClientId(2));
        assert_eq!(c.promote_operator_if_needed(), None);
    }

    #[test]
    fn mode_string_reflects_flags() {
        let mut c = Channel::new("#r", ClientId(1));
        assert_eq!(c.modes.mode_string(), "");
        c.modes.invite_only = true;
        c.modes.user_limit = 5;
        assert_eq!(c.modes.mode_string(), "+il");
    }

    #[test]
    fn user_limit_zero_means_unlimited() {
        let c = Channel::new("#r", ClientId(1));
        assert!(!c.is_full());
    }
}
