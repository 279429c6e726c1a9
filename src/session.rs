//! In-memory conversation history for one user session.

use std::collections::HashMap;

use serde::Serialize;

/// Message returned by [`Session::clear`].
pub const END_SESSION_MESSAGE: &str = "Session ended. Conversation history cleared.";

/// One recorded question and its answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConversationTurn {
    /// Question as submitted.
    pub question: String,
    /// Rendered answer.
    pub answer: String,
}

/// Insertion-ordered question → answer mapping. Asking the same question
/// again replaces its answer in place.
#[derive(Debug, Clone, Default)]
pub struct Session {
    turns: Vec<ConversationTurn>,
    positions: HashMap<String, usize>,
}

impl Session {
    /// Empty session.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `answer` for `question`, overwriting any earlier answer.
    pub fn record(&mut self, question: impl Into<String>, answer: impl Into<String>) {
        let question = question.into();
        let answer = answer.into();
        if let Some(&slot) = self.positions.get(&question) {
            self.turns[slot].answer = answer;
            return;
        }
        self.positions.insert(question.clone(), self.turns.len());
        self.turns.push(ConversationTurn { question, answer });
    }

    /// Answer recorded for `question`.
    pub fn get(&self, question: &str) -> Option<&str> {
        self.positions
            .get(question)
            .map(|&slot| self.turns[slot].answer.as_str())
    }

    /// Turns in first-asked order.
    pub fn turns(&self) -> &[ConversationTurn] {
        &self.turns
    }

    /// Number of distinct questions.
    pub fn len(&self) -> usize {
        self.turns.len()
    }

    /// True when nothing has been recorded.
    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    /// `Q: …\nA: …` per turn.
    pub fn render(&self) -> Vec<String> {
        self.turns
            .iter()
            .map(|turn| format!("Q: {}\nA: {}", turn.question, turn.answer))
            .collect()
    }

    /// History as one newline-separated block.
    pub fn render_text(&self) -> String {
        self.render().join("\n")
    }

    /// Forgets every turn.
    pub fn clear(&mut self) -> &'static str {
        self.turns.clear();
        self.positions.clear();
        END_SESSION_MESSAGE
    }
}
