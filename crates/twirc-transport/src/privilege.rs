//! Channel privilege tracking and outbound queue classification.
//!
//! The server announces the bot's own standing in a channel with `USERSTATE`
//! after every join and every message the bot sends. Moderators, VIPs and the
//! broadcaster get a much higher chat allowance, so their sends go through a
//! separate queue.

use std::collections::HashSet;
use std::fmt;

use parking_lot::RwLock;
use tracing::debug;
use twirc_core::{Message, MessageKind, normalize_channel};

/// Badges that lift a channel into the elevated queue.
const ELEVATED_BADGES: &[&str] = &["broadcaster", "moderator", "vip"];

/// The bot's standing in a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Privilege {
    #[default]
    Normal,
    Elevated,
}

/// Outbound queue a message is routed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum QueueId {
    /// Chat in channels where the bot has no special standing.
    Channel,
    /// Chat in channels where the bot is moderator, VIP or broadcaster.
    ModeratorChannel,
    /// Private whispers.
    Whisper,
    /// Protocol control lines (JOIN, PART, PONG, raw commands). Not rate
    /// limited.
    Control,
}

impl QueueId {
    pub const ALL: [QueueId; 4] = [
        QueueId::Channel,
        QueueId::ModeratorChannel,
        QueueId::Whisper,
        QueueId::Control,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            QueueId::Channel => "channel",
            QueueId::ModeratorChannel => "moderator-channel",
            QueueId::Whisper => "whisper",
            QueueId::Control => "control",
        }
    }
}

impl fmt::Display for QueueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Picks the queue for `message` given the bot's privilege in its channel.
///
/// ```
/// use twirc_core::Message;
/// use twirc_transport::{Privilege, QueueId, classify};
///
/// let msg = Message::chat("#chan", "hi").unwrap();
/// assert_eq!(classify(&msg, Privilege::Normal), QueueId::Channel);
/// assert_eq!(classify(&msg, Privilege::Elevated), QueueId::ModeratorChannel);
/// ```
pub fn classify(message: &Message, privilege: Privilege) -> QueueId {
    match (message.kind(), privilege) {
        (MessageKind::Chat(_), Privilege::Elevated) => QueueId::ModeratorChannel,
        (MessageKind::Chat(_), Privilege::Normal) => QueueId::Channel,
        (MessageKind::Whisper(_), _) => QueueId::Whisper,
        _ => QueueId::Control,
    }
}

/// Channels in which the bot currently holds elevated privilege.
#[derive(Debug, Default)]
pub struct PrivilegeTracker {
    elevated: RwLock<HashSet<String>>,
}

impl PrivilegeTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Updates the tracker from an inbound message. Only `USERSTATE` matters.
    pub fn observe(&self, message: &Message) {
        let MessageKind::UserState { channel } = message.kind() else {
            return;
        };
        let tags = message.tags();
        let elevated =
            tags.is_mod() || ELEVATED_BADGES.iter().any(|badge| tags.has_badge(badge));
        let privilege = if elevated {
            Privilege::Elevated
        } else {
            Privilege::Normal
        };
        self.set(channel, privilege);
    }

    /// Current privilege in `channel`.
    pub fn privilege(&self, channel: &str) -> Privilege {
        if self.elevated.read().contains(&normalize_channel(channel)) {
            Privilege::Elevated
        } else {
            Privilege::Normal
        }
    }

    /// Overrides the privilege in `channel`.
    pub fn set(&self, channel: &str, privilege: Privilege) {
        let channel = normalize_channel(channel);
        let changed = match privilege {
            Privilege::Elevated => self.elevated.write().insert(channel.clone()),
            Privilege::Normal => self.elevated.write().remove(&channel),
        };
        if changed {
            debug!(channel = %channel, privilege = ?privilege, "Channel privilege changed");
        }
    }

    /// Drops everything, e.g. after a reconnect.
    pub fn clear(&self) {
        self.elevated.write().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn userstate(tags: &str) -> Message {
        Message::parse(&format!("@{tags} :tmi.twitch.tv USERSTATE #chan")).unwrap()
    }

    #[test]
    fn test_classify() {
        let chat = Message::chat("chan", "hello").unwrap();
        let whisper = Message::whisper("alice", "psst").unwrap();
        let join = Message::join("chan").unwrap();
        let pong = Message::pong(Some("tmi.twitch.tv".into()));

        assert_eq!(classify(&chat, Privilege::Normal), QueueId::Channel);
        assert_eq!(classify(&chat, Privilege::Elevated), QueueId::ModeratorChannel);
        assert_eq!(classify(&whisper, Privilege::Elevated), QueueId::Whisper);
        assert_eq!(classify(&join, Privilege::Normal), QueueId::Control);
        assert_eq!(classify(&pong, Privilege::Elevated), QueueId::Control);
    }

    #[test]
    fn test_observe_userstate() {
        let tracker = PrivilegeTracker::new();
        assert_eq!(tracker.privilege("chan"), Privilege::Normal);

        tracker.observe(&userstate("badges=moderator/1;mod=1"));
        assert_eq!(tracker.privilege("#Chan"), Privilege::Elevated);

        tracker.observe(&userstate("badges=;mod=0"));
        assert_eq!(tracker.privilege("chan"), Privilege::Normal);

        tracker.observe(&userstate("badges=vip/1;mod=0"));
        assert_eq!(tracker.privilege("chan"), Privilege::Elevated);

        tracker.observe(&userstate("badges=broadcaster/1,subscriber/0;mod=0"));
        assert_eq!(tracker.privilege("chan"), Privilege::Elevated);

        tracker.observe(&userstate("badges=subscriber/12;mod=0"));
        assert_eq!(tracker.privilege("chan"), Privilege::Normal);
    }

    #[test]
    fn test_observe_ignores_other_messages() {
        let tracker = PrivilegeTracker::new();
        let chat = Message::parse("@badges=moderator/1;mod=1 :a!a@a PRIVMSG #chan :hi").unwrap();
        tracker.observe(&chat);
        assert_eq!(tracker.privilege("chan"), Privilege::Normal);
    }

    #[test]
    fn test_privilege_is_reevaluated_per_message() {
        let tracker = PrivilegeTracker::new();
        let chat = Message::chat("chan", "hi").unwrap();
        assert_eq!(classify(&chat, tracker.privilege("chan")), QueueId::Channel);
        tracker.set("chan", Privilege::Elevated);
        assert_eq!(classify(&chat, tracker.privilege("chan")), QueueId::ModeratorChannel);
        tracker.clear();
        assert_eq!(classify(&chat, tracker.privilege("chan")), QueueId::Channel);
    }
}
