//! Folds stream events into the thread store.
//!
//! Every call resolves the thread by id against the store's current contents and appends
//! to the accumulated text of the last message, so deltas must arrive in wire order.

use portal_llm::StreamFailure;
use portal_storage::{Message, Role, StoreResult, ThreadId, ThreadStore};

pub const FAILURE_MARKER: &str = "❌";

/// Appends one fragment to the thread's in-progress assistant reply.
///
/// The first fragment of a reply opens a new assistant message. Returns false when the
/// thread no longer exists.
pub fn apply_delta(store: &mut ThreadStore, thread_id: ThreadId, fragment: &str) -> StoreResult<bool> {
    if fragment.is_empty() {
        return Ok(false);
    }

    let applied = store.update_thread(thread_id, |thread| {
        let reply_in_progress = thread
            .last_message()
            .is_some_and(|message| message.role == Role::Assistant);
        if !reply_in_progress {
            thread.messages.push(Message::assistant(""));
        }

        if let Some(message) = thread.last_message_mut() {
            message.append_text(fragment);
        }
        thread.touch();
    })?;

    Ok(applied.is_some())
}

/// Records the end of a stream.
///
/// Success adds nothing. A failure is appended on its own paragraph to the in-progress
/// assistant reply, or becomes a new assistant message when no reply was started.
pub fn apply_terminal(
    store: &mut ThreadStore,
    thread_id: ThreadId,
    failure: Option<&StreamFailure>,
) -> StoreResult<bool> {
    let Some(failure) = failure else {
        return Ok(false);
    };

    let notice = failure_notice(failure);
    let applied = store.update_thread(thread_id, |thread| {
        match thread.last_message_mut() {
            Some(message) if message.role == Role::Assistant => {
                message.append_text("\n\n");
                message.append_text(&notice);
            }
            _ => thread.messages.push(Message::assistant(notice)),
        }
        thread.touch();
    })?;

    Ok(applied.is_some())
}

pub fn failure_notice(failure: &StreamFailure) -> String {
    format!("{FAILURE_MARKER} {failure}")
}
