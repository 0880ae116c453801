use std::{cmp::Ordering, collections::HashMap};

use shared::{domain::UserId, protocol::UserPresence};

const BADGE_CAP: u32 = 99;

#[derive(Debug, Default)]
pub struct PresenceTracker {
    snapshot: HashMap<UserId, UserPresence>,
    order: Vec<UserId>,
    unread: HashMap<UserId, u32>,
}

impl PresenceTracker {
    /// Replaces the whole snapshot; users missing from `users` disappear.
    /// Returns the active partner's online flag when that partner is listed.
    pub fn replace_snapshot(
        &mut self,
        users: Vec<UserPresence>,
        active: Option<&UserId>,
    ) -> Option<bool> {
        let mut listed: Vec<UserPresence> = users;
        listed.sort_by(presence_order);

        self.order = listed.iter().map(|user| user.id.clone()).collect();
        self.snapshot = listed
            .into_iter()
            .map(|user| (user.id.clone(), user))
            .collect();

        active
            .and_then(|id| self.snapshot.get(id))
            .map(|user| user.online)
    }

    pub fn ordered(&self) -> impl Iterator<Item = &UserPresence> {
        self.order.iter().filter_map(|id| self.snapshot.get(id))
    }

    pub fn get(&self, id: &UserId) -> Option<&UserPresence> {
        self.snapshot.get(id)
    }

    pub fn find_by_nickname(&self, nickname: &str) -> Option<&UserPresence> {
        self.ordered()
            .find(|user| user.nickname == nickname)
            .or_else(|| {
                self.ordered()
                    .find(|user| user.nickname.eq_ignore_ascii_case(nickname))
            })
    }

    pub fn unread(&self, id: &UserId) -> u32 {
        self.unread.get(id).copied().unwrap_or(0)
    }

    pub fn increment_unread(&mut self, id: &UserId) -> u32 {
        let count = self.unread.entry(id.clone()).or_insert(0);
        *count = count.saturating_add(1);
        *count
    }

    pub fn reset_unread(&mut self, id: &UserId) {
        self.unread.remove(id);
    }

    pub fn unread_total(&self) -> u32 {
        self.unread
            .values()
            .fold(0u32, |total, count| total.saturating_add(*count))
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.snapshot.len()
    }

    pub fn clear(&mut self) {
        self.snapshot.clear();
        self.order.clear();
        self.unread.clear();
    }
}

/// Most recent activity first; ties and users without activity by nickname.
pub fn presence_order(a: &UserPresence, b: &UserPresence) -> Ordering {
    let a_recent = a.last_msg.as_deref().unwrap_or("");
    let b_recent = b.last_msg.as_deref().unwrap_or("");
    b_recent
        .cmp(a_recent)
        .then_with(|| a.nickname.to_lowercase().cmp(&b.nickname.to_lowercase()))
        .then_with(|| a.nickname.cmp(&b.nickname))
        .then_with(|| a.id.cmp(&b.id))
}

pub fn badge_label(count: u32) -> Option<String> {
    match count {
        0 => None,
        n if n > BADGE_CAP => Some(format!("{BADGE_CAP}+")),
        n => Some(n.to_string()),
    }
}

#[cfg(test)]
#[path = "tests/presence_tests.rs"]
mod tests;
