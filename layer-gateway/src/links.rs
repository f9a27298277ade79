//! Deep links to chats, messages and users.
//!
//! | Chat | Chat link | Message link |
//! |---|---|---|
//! | has username | `https://t.me/{username}` | `https://t.me/{username}/{id}` |
//! | private | `tg://user?id={chat_id}` | `tg://openmessage?chat_id={chat_id}&message_id={id}` |
//! | channel | `https://t.me/c/{abs(chat_id)}` | `https://t.me/c/{abs(chat_id)}/{id}` |
//! | group | `tg://chat?id={chat_id}` | `tg://openmessage?chat_id={chat_id}&message_id={id}` |
//!
//! A chat with neither an id (zero counts as absent) nor a username gets no link.
//! Channel ids in the `-100…` marked form lose their marker in `t.me/c/` links.

use crate::protocol::ChatKind;

const CHANNEL_MARK: u64 = 1_000_000_000_000;

/// The id Telegram expects in `https://t.me/c/{id}` links.
fn channel_path_id(chat_id: i64) -> u64 {
    let abs = chat_id.unsigned_abs();
    if chat_id < 0 && abs > CHANNEL_MARK { abs - CHANNEL_MARK } else { abs }
}

fn username_of(username: Option<&str>) -> Option<&str> {
    username.map(|u| u.trim_start_matches('@')).filter(|u| !u.is_empty())
}

pub fn chat_link(chat_id: Option<i64>, username: Option<&str>, kind: ChatKind) -> Option<String> {
    if let Some(u) = username_of(username) {
        return Some(format!("https://t.me/{u}"));
    }
    let id = chat_id.filter(|id| *id != 0)?;
    Some(match kind {
        ChatKind::Private => format!("tg://user?id={id}"),
        ChatKind::Channel => format!("https://t.me/c/{}", channel_path_id(id)),
        ChatKind::Group   => format!("tg://chat?id={id}"),
    })
}

pub fn message_link(
    chat_id:    Option<i64>,
    username:   Option<&str>,
    kind:       ChatKind,
    message_id: i32,
) -> Option<String> {
    if let Some(u) = username_of(username) {
        return Some(format!("https://t.me/{u}/{message_id}"));
    }
    let id = chat_id.filter(|id| *id != 0)?;
    Some(match kind {
        ChatKind::Channel => format!("https://t.me/c/{}/{message_id}", channel_path_id(id)),
        ChatKind::Private | ChatKind::Group => {
            format!("tg://openmessage?chat_id={id}&message_id={message_id}")
        }
    })
}

/// Link to a user: public profile when they have a username.
pub fn contact_link(user_id: i64, username: Option<&str>) -> String {
    match username_of(username) {
        Some(u) => format!("https://t.me/{u}"),
        None    => format!("tg://user?id={user_id}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_without_username_uses_absolute_id() {
        assert_eq!(
            chat_link(Some(-123456789), None, ChatKind::Channel).as_deref(),
            Some("https://t.me/c/123456789"),
        );
        assert_eq!(
            message_link(Some(-123456789), None, ChatKind::Channel, 77).as_deref(),
            Some("https://t.me/c/123456789/77"),
        );
    }

    #[test]
    fn marked_channel_ids_drop_the_marker() {
        assert_eq!(
            chat_link(Some(-1_001_234_567_890), None, ChatKind::Channel).as_deref(),
            Some("https://t.me/c/1234567890"),
        );
    }

    #[test]
    fn username_wins() {
        for kind in [ChatKind::Private, ChatKind::Group, ChatKind::Channel] {
            assert_eq!(chat_link(Some(5), Some("durov"), kind).as_deref(), Some("https://t.me/durov"));
            assert_eq!(message_link(None, Some("@durov"), kind, 9).as_deref(), Some("https://t.me/durov/9"));
        }
    }

    #[test]
    fn private_and_group() {
        assert_eq!(chat_link(Some(42), None, ChatKind::Private).as_deref(), Some("tg://user?id=42"));
        assert_eq!(chat_link(Some(-42), None, ChatKind::Group).as_deref(), Some("tg://chat?id=-42"));
        assert_eq!(
            message_link(Some(42), None, ChatKind::Private, 3).as_deref(),
            Some("tg://openmessage?chat_id=42&message_id=3"),
        );
        assert_eq!(
            message_link(Some(-42), None, ChatKind::Group, 3).as_deref(),
            Some("tg://openmessage?chat_id=-42&message_id=3"),
        );
    }

    #[test]
    fn nothing_to_link() {
        assert_eq!(chat_link(None, None, ChatKind::Group), None);
        assert_eq!(chat_link(Some(0), Some(""), ChatKind::Channel), None);
        assert_eq!(message_link(None, None, ChatKind::Private, 1), None);
    }

    #[test]
    fn contacts() {
        assert_eq!(contact_link(7, Some("bob")), "https://t.me/bob");
        assert_eq!(contact_link(7, None), "tg://user?id=7");
    }
}
