use std::collections::HashSet;

use serenity::model::id::{RoleId, UserId};

use crate::models::{Caller, Track};

/// Decides who may pause, stop, clear, shuffle or force a skip.
#[derive(Debug, Clone, Default)]
pub struct AuthorityResolver {
    dj_users: HashSet<UserId>,
    dj_roles: HashSet<RoleId>,
}

impl AuthorityResolver {
    pub fn new(
        dj_users: impl IntoIterator<Item = UserId>,
        dj_roles: impl IntoIterator<Item = RoleId>,
    ) -> Self {
        AuthorityResolver {
            dj_users: dj_users.into_iter().collect(),
            dj_roles: dj_roles.into_iter().collect(),
        }
    }

    pub fn is_elevated(&self, caller: &Caller) -> bool {
        self.dj_users.contains(&caller.id)
            || caller.roles.iter().any(|role| self.dj_roles.contains(role))
    }

    /// The submitter of the current track is its DJ; elevated callers always are.
    pub fn is_dj(&self, caller: &Caller, current: Option<&Track>) -> bool {
        let submitted_current = current.map_or(false, |track| track.submitter == caller.id);

        submitted_current || self.is_elevated(caller)
    }
}
