//! Batched message forwarding.
//!
//! A [`ForwardRequest`] names its messages by id, by public link, or both;
//! [`plan_forward`] turns it into a single-chat [`ForwardPlan`] without any
//! network access, and [`forward_messages`] runs the plan as one
//! `messages.forwardMessages` call.

use std::collections::HashSet;

use rand::Rng;
use serde::Deserialize;

use crate::errors::{GatewayError, ValidationError};
use crate::phone::PhoneNumber;
use crate::protocol::{ChatRef, ForwardBatch, ProtocolClient};
use crate::validation;

/// Telegram accepts at most this many messages per forward call.
pub const MAX_BATCH: usize = 100;

// ─── Request ──────────────────────────────────────────────────────────────────

/// Where the messages come from.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum SourceChat {
    Id(i64),
    /// Username (`"durov"`, `"@durov"`) or numeric string.
    Name(String),
    /// Public message links; the chat is taken from the links.
    Links(Vec<String>),
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum ChatTarget {
    Id(i64),
    Name(String),
}

impl From<&ChatTarget> for ChatRef {
    fn from(t: &ChatTarget) -> Self {
        match t {
            ChatTarget::Id(id)   => ChatRef::Id(*id),
            ChatTarget::Name(s)  => ChatRef::parse(s),
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct ForwardRequest {
    pub source_phone:             PhoneNumber,
    pub source_chat:              SourceChat,
    pub destination_chat:         ChatTarget,
    #[serde(default)]
    pub message_ids:              Option<Vec<i32>>,
    #[serde(default)]
    pub message_links:            Option<Vec<String>>,
    #[serde(default)]
    pub remove_sender_info:       bool,
    #[serde(default)]
    pub remove_captions:          bool,
    #[serde(default)]
    pub prevent_further_forwards: bool,
    #[serde(default)]
    pub silent:                   bool,
}

/// A validated forward: one source chat, one destination, ids in order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ForwardPlan {
    pub from:          ChatRef,
    pub to:            ChatRef,
    pub message_ids:   Vec<i32>,
    pub drop_author:   bool,
    pub drop_captions: bool,
    pub noforwards:    bool,
    pub silent:        bool,
}

fn same_chat_error() -> ValidationError {
    ValidationError::Field("All messages must be from the same chat".into())
}

/// Merge explicit ids with ids parsed from links and settle the source chat.
pub fn plan_forward(req: &ForwardRequest) -> Result<ForwardPlan, ValidationError> {
    let (explicit, source_links): (Option<ChatRef>, &[String]) = match &req.source_chat {
        SourceChat::Id(id)      => (Some(ChatRef::Id(*id)), &[]),
        SourceChat::Name(name)  => (Some(ChatRef::parse(name)), &[]),
        SourceChat::Links(list) => (None, list.as_slice()),
    };

    let mut message_ids = req.message_ids.clone().unwrap_or_default();
    let mut link_chat: Option<String> = None;

    let links = source_links.iter().chain(req.message_links.iter().flatten());
    for raw in links {
        let link = validation::parse_message_link(raw)?;
        match (&explicit, &link_chat) {
            (Some(ChatRef::Username(u)), _) if !u.eq_ignore_ascii_case(&link.username) => {
                return Err(same_chat_error());
            }
            (Some(ChatRef::Id(_)), _) => {
                return Err(ValidationError::Field(
                    "message links cannot be combined with a numeric source_chat".into(),
                ));
            }
            (None, Some(prev)) if !prev.eq_ignore_ascii_case(&link.username) => {
                return Err(same_chat_error());
            }
            _ => {}
        }
        link_chat.get_or_insert(link.username);
        message_ids.push(link.message_id);
    }

    if message_ids.is_empty() {
        return Err(ValidationError::Field("No messages to forward provided".into()));
    }
    if message_ids.len() > MAX_BATCH {
        return Err(ValidationError::Field(format!("at most {MAX_BATCH} messages can be forwarded at once")));
    }
    if let Some(bad) = message_ids.iter().find(|id| **id <= 0) {
        return Err(ValidationError::Field(format!("invalid message id {bad}")));
    }

    let from = explicit
        .or_else(|| link_chat.map(ChatRef::Username))
        .ok_or_else(|| ValidationError::Field("source_chat is missing".into()))?;

    Ok(ForwardPlan {
        from,
        to:            ChatRef::from(&req.destination_chat),
        message_ids,
        drop_author:   req.remove_sender_info,
        drop_captions: req.remove_captions,
        noforwards:    req.prevent_further_forwards,
        silent:        req.silent,
    })
}

// ─── Execution ────────────────────────────────────────────────────────────────

/// `n` distinct, non-zero random ids.
pub fn correlation_ids(n: usize) -> Vec<i64> {
    let mut rng  = rand::thread_rng();
    let mut seen = HashSet::with_capacity(n);
    let mut ids  = Vec::with_capacity(n);
    while ids.len() < n {
        let id: i64 = rng.r#gen();
        if id != 0 && seen.insert(id) {
            ids.push(id);
        }
    }
    ids
}

/// Join both chats (best effort), then forward the whole plan in one call.
///
/// Returns the ids of the new messages; zero new messages is
/// [`GatewayError::NotFound`].
pub async fn forward_messages(
    client: &dyn ProtocolClient,
    plan:   &ForwardPlan,
) -> Result<Vec<i32>, GatewayError> {
    for chat in [&plan.from, &plan.to] {
        if let Err(e) = client.join_chat(chat).await {
            tracing::warn!("[forward] failed to join {chat}: {e}");
        }
    }

    let batch = ForwardBatch {
        from:          plan.from.clone(),
        to:            plan.to.clone(),
        message_ids:   plan.message_ids.clone(),
        random_ids:    correlation_ids(plan.message_ids.len()),
        drop_author:   plan.drop_author,
        drop_captions: plan.drop_captions,
        noforwards:    plan.noforwards,
        silent:        plan.silent,
    };
    let forwarded = client.forward_messages(&batch).await?;

    if forwarded.is_empty() {
        tracing::warn!("[forward] {} → {}: nothing was forwarded", plan.from, plan.to);
        return Err(GatewayError::NotFound("No messages were forwarded successfully".into()));
    }
    tracing::info!("[forward] {} → {}: {} message(s)", plan.from, plan.to, forwarded.len());
    Ok(forwarded)
}

// ─── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{AppCredentials, ClientFactory};
    use crate::testing::{FakeBehavior, FakeFactory};
    use crate::ProtocolError;

    fn request(json: serde_json::Value) -> ForwardRequest {
        serde_json::from_value(json).unwrap()
    }

    #[test]
    fn ids_and_links_merge() {
        let req = request(serde_json::json!({
            "source_phone": "+15551234567",
            "source_chat": "@durov",
            "destination_chat": -1001234567890i64,
            "message_ids": [1, 2],
            "message_links": ["https://t.me/durov/3"],
            "silent": true,
        }));
        let plan = plan_forward(&req).unwrap();
        assert_eq!(plan.from, ChatRef::Username("durov".into()));
        assert_eq!(plan.to, ChatRef::Id(-1001234567890));
        assert_eq!(plan.message_ids, vec![1, 2, 3]);
        assert!(plan.silent);
        assert!(!plan.drop_author);
    }

    #[test]
    fn links_as_source_chat() {
        let req = request(serde_json::json!({
            "source_phone": 15551234567u64,
            "source_chat": ["https://t.me/news/10", "t.me/news/11"],
            "destination_chat": "me_chat",
        }));
        let plan = plan_forward(&req).unwrap();
        assert_eq!(plan.from, ChatRef::Username("news".into()));
        assert_eq!(plan.message_ids, vec![10, 11]);
    }

    #[test]
    fn mixed_chats_are_rejected() {
        let mixed = request(serde_json::json!({
            "source_phone": "+15551234567",
            "source_chat": ["https://t.me/a/1", "https://t.me/b/2"],
            "destination_chat": "x",
        }));
        assert_eq!(plan_forward(&mixed), Err(same_chat_error()));

        let mismatch = request(serde_json::json!({
            "source_phone": "+15551234567",
            "source_chat": "a",
            "destination_chat": "x",
            "message_links": ["https://t.me/b/2"],
        }));
        assert_eq!(plan_forward(&mismatch), Err(same_chat_error()));
    }

    #[test]
    fn nothing_to_forward() {
        let req = request(serde_json::json!({
            "source_phone": "+15551234567",
            "source_chat": "a",
            "destination_chat": "x",
        }));
        assert!(plan_forward(&req).is_err());

        let bad_link = request(serde_json::json!({
            "source_phone": "+15551234567",
            "source_chat": "a",
            "destination_chat": "x",
            "message_links": ["https://t.me/a"],
        }));
        assert!(matches!(plan_forward(&bad_link), Err(ValidationError::MessageLink(_))));
    }

    #[test]
    fn correlation_ids_are_distinct_and_non_zero() {
        let ids = correlation_ids(50);
        assert_eq!(ids.len(), 50);
        assert!(ids.iter().all(|id| *id != 0));
        assert_eq!(ids.iter().collect::<HashSet<_>>().len(), 50);
    }

    async fn run(behavior: FakeBehavior, ids: Vec<i32>) -> (Result<Vec<i32>, GatewayError>, FakeFactory) {
        let factory = FakeFactory::new(behavior);
        let phone   = PhoneNumber::parse("+15551234567").unwrap();
        let client  = factory
            .create(&phone, &AppCredentials::new(1, "x"), Some(&FakeFactory::blob_for(1)))
            .await
            .unwrap();
        let plan = ForwardPlan {
            from:          ChatRef::Username("src".into()),
            to:            ChatRef::Id(-100),
            message_ids:   ids,
            drop_author:   true,
            drop_captions: false,
            noforwards:    false,
            silent:        false,
        };
        (forward_messages(&*client, &plan).await, factory)
    }

    #[tokio::test]
    async fn one_random_id_per_message() {
        let (res, factory) = run(FakeBehavior::default(), vec![5, 6, 7]).await;
        assert_eq!(res.unwrap(), vec![1000, 1001, 1002]);

        let batches = factory.forwarded();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].message_ids, vec![5, 6, 7]);
        assert_eq!(batches[0].random_ids.len(), 3);
        assert!(batches[0].drop_author);
        assert_eq!(factory.joined(), vec![ChatRef::Username("src".into()), ChatRef::Id(-100)]);
    }

    #[tokio::test]
    async fn zero_forwarded_is_not_found() {
        let behavior = FakeBehavior { forward_result: Some(Vec::new()), ..FakeBehavior::default() };
        let (res, _) = run(behavior, vec![5]).await;
        assert!(matches!(res, Err(GatewayError::NotFound(_))));
    }

    #[tokio::test]
    async fn join_failures_are_not_fatal() {
        let behavior = FakeBehavior {
            join_error: Some(ProtocolError::Rejected { code: 400, name: "CHANNEL_PRIVATE".into() }),
            ..FakeBehavior::default()
        };
        let (res, _) = run(behavior, vec![5]).await;
        assert_eq!(res.unwrap(), vec![1000]);
    }
}
