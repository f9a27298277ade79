//! Contact search and global chat/message search.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::errors::GatewayError;
use crate::links;
use crate::phone::PhoneNumber;
use crate::protocol::{ChatKind, ProtocolClient, RemoteChat, RemoteUser};
use crate::validation::{self, ChatFilter, SearchLimit};

/// Upper bound on a single remote `contacts.search` page.
const REMOTE_CONTACT_PAGE: usize = 20;

// ─── Contacts ─────────────────────────────────────────────────────────────────

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Contact {
    pub user_id:      i64,
    pub first_name:   Option<String>,
    pub last_name:    Option<String>,
    pub username:     Option<String>,
    /// E.164, or absent when Telegram reported nothing usable.
    pub phone_number: Option<String>,
    pub link:         String,
}

impl From<RemoteUser> for Contact {
    fn from(u: RemoteUser) -> Self {
        let phone_number = u
            .phone
            .as_deref()
            .filter(|p| !p.is_empty())
            .and_then(|p| PhoneNumber::parse(p).ok())
            .map(|p| p.as_str().to_string());
        Self {
            link: links::contact_link(u.id, u.username.as_deref()),
            user_id: u.id,
            first_name: u.first_name,
            last_name: u.last_name,
            username: u.username,
            phone_number,
        }
    }
}

fn contact_matches(user: &RemoteUser, needle: &str) -> bool {
    [&user.first_name, &user.last_name, &user.username, &user.phone]
        .into_iter()
        .flatten()
        .any(|v| v.to_lowercase().contains(needle))
}

/// Search the account's contacts, then top up from Telegram's people search.
///
/// Local matches are a case-insensitive substring match over first name,
/// last name, username and phone. Results are unique by user id and capped
/// at `limit`.
pub async fn search_contacts(
    client: &dyn ProtocolClient,
    query:  &str,
    limit:  SearchLimit,
) -> Result<Vec<Contact>, GatewayError> {
    let query  = validation::require_query(query)?;
    let limit  = limit.get();
    let needle = query.to_lowercase();

    let mut seen  = HashSet::new();
    let mut found = Vec::new();

    for user in client.contacts().await? {
        if found.len() >= limit {
            break;
        }
        if contact_matches(&user, &needle) && seen.insert(user.id) {
            found.push(Contact::from(user));
        }
    }

    if found.len() < limit {
        let page = REMOTE_CONTACT_PAGE.min(limit - found.len());
        for user in client.search_contacts(query, page).await? {
            if found.len() >= limit {
                break;
            }
            if seen.insert(user.id) {
                found.push(Contact::from(user));
            }
        }
    }

    tracing::info!("[search] {} contact(s) for {query:?}", found.len());
    Ok(found)
}

// ─── Chats ────────────────────────────────────────────────────────────────────

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Message {
    pub message_id: i32,
    pub text:       Option<String>,
    pub date:       Option<DateTime<Utc>>,
    pub from_user:  Option<i64>,
    pub link:       Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Chat {
    pub chat_id:           i64,
    pub title:             Option<String>,
    #[serde(rename = "type")]
    pub kind:              ChatKind,
    pub username:          Option<String>,
    pub members_count:     Option<u32>,
    pub last_message_date: Option<DateTime<Utc>>,
    pub matching_messages: Vec<Message>,
    pub link:              Option<String>,
}

/// Global message search, grouped by the chat each message lives in.
///
/// Messages whose chat is missing from the response, or whose chat type is
/// excluded by `filter`, are skipped. At most `limit` chats are returned, in
/// the order their first matching message appeared.
pub async fn search_chats(
    client: &dyn ProtocolClient,
    query:  &str,
    limit:  SearchLimit,
    filter: ChatFilter,
) -> Result<Vec<Chat>, GatewayError> {
    let query = validation::require_query(query)?;
    let limit = limit.get();
    let page  = client.search_global(query, limit).await?;

    let chats_by_id: HashMap<i64, &RemoteChat> = page.chats.iter().map(|c| (c.id, c)).collect();
    let mut order: Vec<i64> = Vec::new();
    let mut out: HashMap<i64, Chat> = HashMap::new();

    for msg in &page.messages {
        let Some(remote) = chats_by_id.get(&msg.chat_id) else {
            tracing::debug!("[search] no chat {} for message {}", msg.chat_id, msg.id);
            continue;
        };
        if !filter.matches(remote.kind) {
            continue;
        }

        let entry = Message {
            message_id: msg.id,
            text:       msg.text.clone(),
            date:       msg.date,
            from_user:  msg.from_user,
            link:       links::message_link(Some(remote.id), remote.username.as_deref(), remote.kind, msg.id),
        };

        if let Some(chat) = out.get_mut(&remote.id) {
            if entry.date > chat.last_message_date {
                chat.last_message_date = entry.date;
            }
            chat.matching_messages.push(entry);
            continue;
        }
        if out.len() >= limit {
            continue;
        }
        order.push(remote.id);
        out.insert(remote.id, Chat {
            chat_id:           remote.id,
            title:             remote.title.clone(),
            kind:              remote.kind,
            username:          remote.username.clone(),
            members_count:     remote.members,
            last_message_date: entry.date,
            link:              links::chat_link(Some(remote.id), remote.username.as_deref(), remote.kind),
            matching_messages: vec![entry],
        });
    }

    let chats: Vec<Chat> = order.into_iter().filter_map(|id| out.remove(&id)).collect();
    tracing::info!("[search] {} chat(s) for {query:?} ({filter:?})", chats.len());
    Ok(chats)
}

// ─── Tests ────────────────────────────────────────────────────────────────────
