/// A request to be sent to the model provider.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ModelRequest {
    /// The input messages.
    pub messages: Vec<ModelMessage>,
}

/// A complete message.
///
/// Tool feedback is kept distinct from assistant text so the model can
/// tell "what a tool answered" from "what it said itself". How the
/// feedback role is rendered on the wire is up to each provider.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum ModelMessage {
    /// The system instructions.
    System(String),
    /// A user input text.
    User(String),
    /// An assistant text.
    Assistant(String),
    /// A tool result or a dispatch error, fed back to the model.
    Feedback(String),
}
