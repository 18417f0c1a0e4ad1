//! Prompt candidates and their message templates.
//!
//! A [`PromptCandidate`] is an ordered list of role-tagged messages whose
//! content may reference the scenario through `{context}` and `{input}`.
//! Templates are parsed when the candidate is built, so a typo such as
//! `{contxt}` is rejected up front instead of reaching the model verbatim.
//! Literal braces are written as `{{` and `}}`.

use crate::scenario::ScenarioItem;
use promptlab_core::{LlmRequest, Turn};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// The health-coach system prompt used as the optimization seed.
pub const DEFAULT_SYSTEM_PROMPT: &str = r#"You are Healthic, an emotionally intelligent health coach.

## Core Principles

1. EMOTIONAL INTELLIGENCE
   - When users express emotions, acknowledge them FIRST before giving advice
   - Match their energy: celebrate wins enthusiastically, be supportive during struggles
   - Never dismiss feelings or jump straight to solutions

2. ACTIONABLE ADVICE
   - Be specific: "Walk 20 minutes after lunch" not "exercise more"
   - Include concrete times, quantities, or durations
   - Give advice they can act on TODAY

3. PERSONALIZATION
   - Account for user's stated preferences and constraints
   - Remember what they've told you about their situation
   - Never contradict their stated limitations (diet, schedule, injuries)

4. SAFETY (Non-negotiable)
   - Signs of disordered eating → Recommend professional help immediately
   - Never suggest: crash diets, extreme restriction, ignoring pain
   - When unsure, err on the side of caution

## Response Patterns

STRUGGLING USER: Acknowledge → Validate → Then problem-solve
CELEBRATING USER: Match energy → Ask what worked → Build momentum
NEW GOAL: Break down → Specific first step → Not overwhelming
HEALTH RISK: Express concern → Don't endorse → Recommend professional"#;

/// User-turn template paired with the system prompt.
pub const DEFAULT_USER_TEMPLATE: &str = "Context: {context}\n\n{input}";

/// Errors raised while parsing a template or assembling a candidate.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum TemplateError {
    /// A `{name}` that is not a known placeholder
    #[error("Unknown placeholder '{{{name}}}' at byte {offset}")]
    UnknownPlaceholder { name: String, offset: usize },

    /// A `{` without a matching `}`
    #[error("Unclosed placeholder starting at byte {0}")]
    Unclosed(usize),

    /// A `}` that does not close anything
    #[error("Unmatched '}}' at byte {0}")]
    UnmatchedClose(usize),

    /// The candidate has no messages, or no user message
    #[error("Prompt candidate must contain at least one user message")]
    NoUserMessage,

    /// A message whose content is blank
    #[error("Message {0} has empty content")]
    EmptyContent(usize),
}

/// Named substitution keys a template may use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placeholder {
    Context,
    Input,
}

impl Placeholder {
    /// Every placeholder name accepted in templates.
    pub const ALL: [Placeholder; 2] = [Placeholder::Context, Placeholder::Input];

    pub fn name(self) -> &'static str {
        match self {
            Placeholder::Context => "context",
            Placeholder::Input => "input",
        }
    }

    fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|p| p.name() == name)
    }

    fn resolve(self, scenario: &ScenarioItem) -> &str {
        match self {
            // Missing context reads as "None" to the model rather than a blank line
            Placeholder::Context if scenario.context.trim().is_empty() => "None",
            Placeholder::Context => &scenario.context,
            Placeholder::Input => &scenario.input,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Slot(Placeholder),
}

/// Parsed message content.
///
/// Serializes as its source string and re-validates on deserialization.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Template {
    source: String,
    segments: Vec<Segment>,
}

impl Template {
    /// Parse template text.
    pub fn parse(source: impl Into<String>) -> Result<Self, TemplateError> {
        let source = source.into();
        let segments = parse_segments(&source)?;
        Ok(Self { source, segments })
    }

    /// Template text as written.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Placeholders referenced by this template, in order of appearance.
    pub fn placeholders(&self) -> Vec<Placeholder> {
        self.segments
            .iter()
            .filter_map(|s| match s {
                Segment::Slot(p) => Some(*p),
                Segment::Literal(_) => None,
            })
            .collect()
    }

    /// Readable text: escaped braces unescaped, placeholders kept as `{name}`.
    pub fn display_text(&self) -> String {
        let mut out = String::with_capacity(self.source.len());
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::Slot(p) => {
                    out.push('{');
                    out.push_str(p.name());
                    out.push('}');
                }
            }
        }
        out
    }

    /// Substitute scenario fields into the template.
    pub fn render(&self, scenario: &ScenarioItem) -> String {
        let mut out = String::with_capacity(self.source.len() + scenario.input.len());
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::Slot(p) => out.push_str(p.resolve(scenario)),
            }
        }
        out
    }
}

impl PartialEq for Template {
    fn eq(&self, other: &Self) -> bool {
        self.source == other.source
    }
}

impl Eq for Template {}

impl TryFrom<String> for Template {
    type Error = TemplateError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Template::parse(value)
    }
}

impl From<Template> for String {
    fn from(value: Template) -> Self {
        value.source
    }
}

impl fmt::Display for Template {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

fn parse_segments(source: &str) -> Result<Vec<Segment>, TemplateError> {
    let mut segments = Vec::new();
    let mut literal = String::new();
    let mut chars = source.char_indices().peekable();

    while let Some((offset, c)) = chars.next() {
        match c {
            '{' if matches!(chars.peek(), Some((_, '{'))) => {
                chars.next();
                literal.push('{');
            }
            '}' if matches!(chars.peek(), Some((_, '}'))) => {
                chars.next();
                literal.push('}');
            }
            '}' => return Err(TemplateError::UnmatchedClose(offset)),
            '{' => {
                let mut name = String::new();
                let mut closed = false;
                for (_, c) in chars.by_ref() {
                    if c == '}' {
                        closed = true;
                        break;
                    }
                    name.push(c);
                }
                if !closed {
                    return Err(TemplateError::Unclosed(offset));
                }
                let placeholder = Placeholder::from_name(name.trim()).ok_or_else(|| {
                    TemplateError::UnknownPlaceholder {
                        name: name.clone(),
                        offset,
                    }
                })?;
                if !literal.is_empty() {
                    segments.push(Segment::Literal(std::mem::take(&mut literal)));
                }
                segments.push(Segment::Slot(placeholder));
            }
            _ => literal.push(c),
        }
    }

    if !literal.is_empty() {
        segments.push(Segment::Literal(literal));
    }
    Ok(segments)
}

/// Speaker of a template message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        })
    }
}

/// One role-tagged message of a candidate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptMessage {
    pub role: Role,
    pub content: Template,
}

impl PromptMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Result<Self, TemplateError> {
        Ok(Self {
            role,
            content: Template::parse(content)?,
        })
    }
}

/// One concrete version of the prompt under evaluation.
///
/// Immutable: derive new candidates with methods such as
/// [`with_system_prompt`](Self::with_system_prompt).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawCandidate", into = "RawCandidate")]
pub struct PromptCandidate {
    messages: Vec<PromptMessage>,
}

#[derive(Serialize, Deserialize)]
struct RawCandidate {
    messages: Vec<PromptMessage>,
}

impl TryFrom<RawCandidate> for PromptCandidate {
    type Error = TemplateError;

    fn try_from(raw: RawCandidate) -> Result<Self, Self::Error> {
        PromptCandidate::new(raw.messages)
    }
}

impl From<PromptCandidate> for RawCandidate {
    fn from(candidate: PromptCandidate) -> Self {
        RawCandidate {
            messages: candidate.messages,
        }
    }
}

impl PromptCandidate {
    /// Build a candidate, requiring non-empty messages and a user turn.
    pub fn new(messages: Vec<PromptMessage>) -> Result<Self, TemplateError> {
        if let Some(index) = messages
            .iter()
            .position(|m| m.content.source().trim().is_empty())
        {
            return Err(TemplateError::EmptyContent(index));
        }
        if !messages.iter().any(|m| m.role == Role::User) {
            return Err(TemplateError::NoUserMessage);
        }
        Ok(Self { messages })
    }

    /// A `[system, user]` candidate.
    pub fn from_system_and_user(
        system: impl Into<String>,
        user: impl Into<String>,
    ) -> Result<Self, TemplateError> {
        Self::new(vec![
            PromptMessage::new(Role::System, system)?,
            PromptMessage::new(Role::User, user)?,
        ])
    }

    /// The health-coach seed candidate.
    pub fn default_seed() -> Result<Self, TemplateError> {
        Self::from_system_and_user(DEFAULT_SYSTEM_PROMPT, DEFAULT_USER_TEMPLATE)
    }

    pub fn messages(&self) -> &[PromptMessage] {
        &self.messages
    }

    /// Template source of the first system message, if any.
    ///
    /// Escaped braces stay escaped (`{{`), so the result can be passed back
    /// to [`with_system_prompt`](Self::with_system_prompt). Use
    /// [`system_text`](Self::system_text) for display.
    pub fn system_prompt(&self) -> Option<&str> {
        self.system_message().map(|m| m.content.source())
    }

    /// Readable text of the first system message, if any.
    pub fn system_text(&self) -> Option<String> {
        self.system_message().map(|m| m.content.display_text())
    }

    fn system_message(&self) -> Option<&PromptMessage> {
        self.messages.iter().find(|m| m.role == Role::System)
    }

    /// A copy with the first system message replaced (or prepended).
    pub fn with_system_prompt(&self, system: impl Into<String>) -> Result<Self, TemplateError> {
        let replacement = PromptMessage::new(Role::System, system)?;
        let mut messages = self.messages.clone();
        match messages.iter().position(|m| m.role == Role::System) {
            Some(index) => messages[index] = replacement,
            None => messages.insert(0, replacement),
        }
        Self::new(messages)
    }

    /// Resolve placeholders for a scenario and build a model request.
    ///
    /// System messages are joined into the system instruction. User and
    /// assistant messages become conversation turns in order.
    pub fn to_request(&self, scenario: &ScenarioItem) -> LlmRequest {
        let mut system_parts = Vec::new();
        let mut turns = Vec::new();

        for message in &self.messages {
            let text = message.content.render(scenario);
            match message.role {
                Role::System => system_parts.push(text),
                Role::User => turns.push(Turn::user(text)),
                Role::Assistant => turns.push(Turn::model(text)),
            }
        }

        let request = LlmRequest::from_turns(turns);
        if system_parts.is_empty() {
            request
        } else {
            request.with_system_instruction(system_parts.join("\n\n"))
        }
    }

    /// Human-readable rendering of the unresolved templates.
    pub fn to_display_text(&self) -> String {
        self.messages
            .iter()
            .map(|m| format!("[{}]\n{}", m.role, m.content.display_text()))
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}
