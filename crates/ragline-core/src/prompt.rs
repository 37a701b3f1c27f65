//! Text templates with named `{slot}` placeholders.
//!
//! Substitution is purely textual: a slot is an identifier between single braces,
//! `{{` and `}}` produce literal braces, and substituted values are inserted
//! verbatim without being scanned for further placeholders.

use std::collections::BTreeMap;

use ragline_llm::{Message, Role};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TemplateError {
    #[error("template syntax error at byte {position}: {reason}")]
    Syntax {
        position: usize,
        reason: &'static str,
    },

    #[error("missing values for slots: {}", .0.join(", "))]
    MissingSlots(Vec<String>),

    #[error("unknown slots supplied: {}", .0.join(", "))]
    UnknownSlots(Vec<String>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Slot(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptTemplate {
    raw: String,
    segments: Vec<Segment>,
    slots: Vec<String>,
    strict: bool,
}

fn is_slot_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

fn parse(raw: &str) -> Result<Vec<Segment>, TemplateError> {
    let mut segments = Vec::new();
    let mut literal = String::new();
    let mut chars = raw.char_indices().peekable();

    while let Some((pos, c)) = chars.next() {
        match c {
            '{' if chars.peek().is_some_and(|&(_, n)| n == '{') => {
                chars.next();
                literal.push('{');
            }
            '}' if chars.peek().is_some_and(|&(_, n)| n == '}') => {
                chars.next();
                literal.push('}');
            }
            '{' => {
                let mut name = String::new();
                loop {
                    match chars.next() {
                        Some((_, '}')) => break,
                        Some((_, n)) if is_slot_char(n) => name.push(n),
                        Some((at, _)) => {
                            return Err(TemplateError::Syntax {
                                position: at,
                                reason: "invalid character in slot name",
                            });
                        }
                        None => {
                            return Err(TemplateError::Syntax {
                                position: pos,
                                reason: "unclosed '{'",
                            });
                        }
                    }
                }
                if name.is_empty() {
                    return Err(TemplateError::Syntax {
                        position: pos,
                        reason: "empty slot name",
                    });
                }
                if !literal.is_empty() {
                    segments.push(Segment::Literal(std::mem::take(&mut literal)));
                }
                segments.push(Segment::Slot(name));
            }
            '}' => {
                return Err(TemplateError::Syntax {
                    position: pos,
                    reason: "unmatched '}'",
                });
            }
            _ => literal.push(c),
        }
    }
    if !literal.is_empty() {
        segments.push(Segment::Literal(literal));
    }
    Ok(segments)
}

/// Check `values` against the union of `slots`: every slot must be filled, and in
/// strict mode no extra key may be present.
fn check_values(
    slots: &[String],
    values: &BTreeMap<String, String>,
    strict: bool,
) -> Result<(), TemplateError> {
    let missing: Vec<String> = slots
        .iter()
        .filter(|s| !values.contains_key(*s))
        .cloned()
        .collect();
    if !missing.is_empty() {
        return Err(TemplateError::MissingSlots(missing));
    }
    if strict {
        let unknown: Vec<String> = values
            .keys()
            .filter(|k| !slots.contains(k))
            .cloned()
            .collect();
        if !unknown.is_empty() {
            return Err(TemplateError::UnknownSlots(unknown));
        }
    }
    Ok(())
}

impl PromptTemplate {
    /// # Errors
    ///
    /// Returns [`TemplateError::Syntax`] on unbalanced braces or an invalid slot name.
    pub fn new(raw: impl Into<String>) -> Result<Self, TemplateError> {
        let raw = raw.into();
        let segments = parse(&raw)?;
        let mut slots: Vec<String> = Vec::new();
        for seg in &segments {
            if let Segment::Slot(name) = seg
                && !slots.contains(name)
            {
                slots.push(name.clone());
            }
        }
        Ok(Self {
            raw,
            segments,
            slots,
            strict: false,
        })
    }

    /// Reject values for slots the template does not declare.
    #[must_use]
    pub fn strict(mut self) -> Self {
        self.strict = true;
        self
    }

    /// Slot names in order of first appearance.
    #[must_use]
    pub fn input_variables(&self) -> &[String] {
        &self.slots
    }

    #[must_use]
    pub fn raw(&self) -> &str {
        &self.raw
    }

    /// # Errors
    ///
    /// Returns [`TemplateError::MissingSlots`] naming every unfilled slot, or
    /// [`TemplateError::UnknownSlots`] in strict mode.
    pub fn render(&self, values: &BTreeMap<String, String>) -> Result<String, TemplateError> {
        check_values(&self.slots, values, self.strict)?;
        Ok(self.render_unchecked(values))
    }

    fn render_unchecked(&self, values: &BTreeMap<String, String>) -> String {
        let mut out = String::with_capacity(self.raw.len());
        for seg in &self.segments {
            match seg {
                Segment::Literal(text) => out.push_str(text),
                Segment::Slot(name) => {
                    if let Some(v) = values.get(name) {
                        out.push_str(v);
                    }
                }
            }
        }
        out
    }

    /// Render into a single user message.
    ///
    /// # Errors
    ///
    /// Same as [`PromptTemplate::render`].
    pub fn format(&self, values: &BTreeMap<String, String>) -> Result<Vec<Message>, TemplateError> {
        Ok(vec![Message::user(self.render(values)?)])
    }
}

/// Ordered list of role-tagged templates rendered into a conversation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatPromptTemplate {
    messages: Vec<(Role, PromptTemplate)>,
    slots: Vec<String>,
    strict: bool,
}

impl ChatPromptTemplate {
    #[must_use]
    pub fn new(messages: Vec<(Role, PromptTemplate)>) -> Self {
        let mut slots: Vec<String> = Vec::new();
        for (_, t) in &messages {
            for s in t.input_variables() {
                if !slots.contains(s) {
                    slots.push(s.clone());
                }
            }
        }
        Self {
            messages,
            slots,
            strict: false,
        }
    }

    /// A single user-message template.
    ///
    /// # Errors
    ///
    /// Returns [`TemplateError::Syntax`] if the template does not parse.
    pub fn from_template(template: &str) -> Result<Self, TemplateError> {
        Ok(Self::new(vec![(Role::User, PromptTemplate::new(template)?)]))
    }

    /// # Errors
    ///
    /// Returns [`TemplateError::Syntax`] if any template does not parse.
    pub fn from_messages<'a>(
        messages: impl IntoIterator<Item = (Role, &'a str)>,
    ) -> Result<Self, TemplateError> {
        let parsed = messages
            .into_iter()
            .map(|(role, t)| PromptTemplate::new(t).map(|t| (role, t)))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::new(parsed))
    }

    #[must_use]
    pub fn strict(mut self) -> Self {
        self.strict = true;
        self
    }

    /// Union of all message slots in order of first appearance.
    #[must_use]
    pub fn input_variables(&self) -> &[String] {
        &self.slots
    }

    /// Render every message. Identical inputs always yield identical output.
    ///
    /// # Errors
    ///
    /// Returns [`TemplateError::MissingSlots`] listing all unfilled slots across
    /// every message, or [`TemplateError::UnknownSlots`] in strict mode.
    pub fn format(&self, values: &BTreeMap<String, String>) -> Result<Vec<Message>, TemplateError> {
        check_values(&self.slots, values, self.strict)?;
        Ok(self
            .messages
            .iter()
            .map(|(role, t)| Message::new(*role, t.render_unchecked(values)))
            .collect())
    }
}

impl From<PromptTemplate> for ChatPromptTemplate {
    fn from(template: PromptTemplate) -> Self {
        let strict = template.strict;
        let mut chat = Self::new(vec![(Role::User, template)]);
        chat.strict = strict;
        chat
    }
}
