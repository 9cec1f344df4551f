use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::Uid;

/// Identity queries answered by the controller's user database.
pub trait Authority: Send + Sync {
    /// Operators (and root) bypass partition visibility rules.
    fn is_operator(&self, uid: Uid) -> bool;

    /// Returns true if `uid` is a member of the named Unix group.
    fn is_member(&self, uid: Uid, group: &str) -> bool;
}

/// Authority backed by a fixed operator list and group membership table.
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
#[serde(default)]
pub struct StaticAuthority {
    operators: BTreeSet<Uid>,
    groups: BTreeMap<String, BTreeSet<Uid>>,
}

impl StaticAuthority {
    pub fn with_operator(mut self, uid: Uid) -> Self {
        self.operators.insert(uid);
        self
    }

    pub fn with_member(mut self, group: &str, uid: Uid) -> Self {
        self.groups.entry(group.to_string()).or_default().insert(uid);
        self
    }
}

impl Authority for StaticAuthority {
    fn is_operator(&self, uid: Uid) -> bool {
        uid.is_root() || self.operators.contains(&uid)
    }

    fn is_member(&self, uid: Uid, group: &str) -> bool {
        self.groups
            .get(group)
            .map(|members| members.contains(&uid))
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use crate::Uid;
    use crate::auth::{Authority, StaticAuthority};

    #[test]
    fn test_root_is_always_operator() {
        let authority = StaticAuthority::default();
        assert!(authority.is_operator(Uid::ROOT));
        assert!(!authority.is_operator(Uid::new(1000)));
    }

    #[test]
    fn test_group_membership() {
        let authority = StaticAuthority::default()
            .with_operator(Uid::new(500))
            .with_member("physics", Uid::new(1000));
        assert!(authority.is_operator(Uid::new(500)));
        assert!(authority.is_member(Uid::new(1000), "physics"));
        assert!(!authority.is_member(Uid::new(1001), "physics"));
        assert!(!authority.is_member(Uid::new(1000), "chemistry"));
    }
}
