//! Partition normalized messages into per-counterparty threads.

use indexmap::IndexMap;
use indexmap::map::Entry;
use tracing::info;

use crate::pipeline::types::{Message, Thread};

/// Threads keyed by counterparty, in order of first appearance.
pub type Conversations = IndexMap<String, Thread>;

/// Group sorted messages by counterparty.
///
/// Messages without a counterparty are skipped. Order within a thread is the
/// order of `messages`, so callers pass the normalizer's sorted output.
pub fn group_conversations(messages: Vec<Message>) -> Conversations {
    info!("Grouping conversations by customer number...");

    let mut conversations = Conversations::new();
    for message in messages {
        let Some(counterparty) = message.counterparty.clone() else {
            continue;
        };
        match conversations.entry(counterparty) {
            Entry::Occupied(mut e) => e.get_mut().push(message),
            Entry::Vacant(e) => {
                let key = e.key().clone();
                e.insert(Thread::start(key, message));
            }
        }
    }

    info!(count = conversations.len(), "Grouped into conversations");
    conversations
}
