use portal_storage::{Message, Role};

/// Default number of turns kept in the context window.
pub const DEFAULT_KEEP_TURNS: usize = 8;

/// Reduces a thread's messages to the context sent to the model.
///
/// All system messages are kept, followed by the last `keep_turns * 2` non-system
/// messages. A "turn" is counted as raw messages, not user/assistant pairs.
pub fn select_history_window(messages: &[Message], keep_turns: usize) -> Vec<&Message> {
    let (system, conversation): (Vec<&Message>, Vec<&Message>) = messages
        .iter()
        .partition(|message| message.role == Role::System);

    let keep = keep_turns.saturating_mul(2);
    let tail_start = conversation.len().saturating_sub(keep);

    system
        .into_iter()
        .chain(conversation[tail_start..].iter().copied())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn texts(selected: &[&Message]) -> Vec<String> {
        selected
            .iter()
            .map(|message| message.text_or_empty().to_string())
            .collect()
    }

    fn interleaved(system_count: usize, other_count: usize) -> Vec<Message> {
        let mut messages = Vec::new();
        let mut system_left = system_count;
        for index in 0..other_count {
            if system_left > 0 && index % 3 == 0 {
                messages.push(Message::system(format!("s{}", system_count - system_left)));
                system_left -= 1;
            }
            if index % 2 == 0 {
                messages.push(Message::user(format!("m{index}"), Vec::new()));
            } else {
                messages.push(Message::assistant(format!("m{index}")));
            }
        }
        for _ in 0..system_left {
            messages.push(Message::system(format!("s{}", system_count - system_left)));
            system_left -= 1;
        }
        messages
    }

    #[test]
    fn output_length_is_system_plus_bounded_tail() {
        for (system_count, other_count, keep_turns) in
            [(0, 0, 8), (1, 3, 8), (2, 40, 8), (3, 17, 1), (1, 5, 0), (4, 16, 8)]
        {
            let messages = interleaved(system_count, other_count);
            let selected = select_history_window(&messages, keep_turns);
            assert_eq!(
                selected.len(),
                system_count + other_count.min(keep_turns * 2),
                "s={system_count} n={other_count} k={keep_turns}"
            );
        }
    }

    #[test]
    fn system_messages_precede_tail_in_original_order() {
        let messages = interleaved(2, 30);
        let selected = select_history_window(&messages, 2);

        assert_eq!(texts(&selected), vec!["s0", "s1", "m26", "m27", "m28", "m29"]);
        assert!(selected[..2].iter().all(|m| m.role == Role::System));
        assert!(selected[2..].iter().all(|m| m.role != Role::System));
    }

    #[test]
    fn consecutive_assistant_messages_count_as_separate_turns() {
        let messages = vec![
            Message::user("q1", Vec::new()),
            Message::assistant("a1"),
            Message::assistant("error note"),
            Message::user("q2", Vec::new()),
        ];

        let selected = select_history_window(&messages, 1);
        assert_eq!(texts(&selected), vec!["error note", "q2"]);
    }

    #[test]
    fn text_is_never_truncated() {
        let long = "word ".repeat(2_000);
        let messages = vec![Message::user(long.clone(), Vec::new())];
        let selected = select_history_window(&messages, DEFAULT_KEEP_TURNS);
        assert_eq!(selected[0].text_or_empty(), long);
    }
}
