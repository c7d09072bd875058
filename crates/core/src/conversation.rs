//! Conversation-related types.

use parley_model::ModelMessage;

/// The role of a history turn.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Role {
    /// The system instructions.
    System,
    /// A human (or routed-peer) input.
    User,
    /// Text the model generated.
    Assistant,
    /// A tool result or a dispatch error. Kept distinct from
    /// [`Role::Assistant`] so the model can tell what it said itself
    /// from what a tool answered.
    Feedback,
}

/// One turn in a conversation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Turn {
    /// The role this turn is tagged with.
    pub role: Role,
    /// The text content of this turn.
    pub content: String,
}

/// An agent's ordered conversation history.
///
/// The history always begins with exactly one [`Role::System`] turn
/// holding the agent's prompt; the engine only ever appends after it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Conversation {
    turns: Vec<Turn>,
}

impl Conversation {
    pub(crate) fn with_system_prompt(prompt: String) -> Self {
        Self {
            turns: vec![Turn {
                role: Role::System,
                content: prompt,
            }],
        }
    }

    /// Returns the turns of this conversation, oldest first.
    #[inline]
    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub(crate) fn push_user(&mut self, content: String) {
        self.push(Role::User, content);
    }

    pub(crate) fn push_assistant(&mut self, content: String) {
        self.push(Role::Assistant, content);
    }

    pub(crate) fn push_feedback(&mut self, content: String) {
        self.push(Role::Feedback, content);
    }

    fn push(&mut self, role: Role, content: String) {
        self.turns.push(Turn { role, content });
    }

    pub(crate) fn to_messages(&self) -> Vec<ModelMessage> {
        self.turns
            .iter()
            .map(|turn| match turn.role {
                Role::System => ModelMessage::System(turn.content.clone()),
                Role::User => ModelMessage::User(turn.content.clone()),
                Role::Assistant => {
                    ModelMessage::Assistant(turn.content.clone())
                }
                Role::Feedback => ModelMessage::Feedback(turn.content.clone()),
            })
            .collect()
    }
}
