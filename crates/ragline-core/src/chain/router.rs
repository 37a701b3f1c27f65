use std::fmt::Write as _;
use std::sync::Arc;

use ragline_llm::{LlmProvider, Message};

use super::{BoxFuture, Chain, ChainError, ChainValues, LlmChain};
use crate::context::RunContext;
use crate::parser::{ResponseSchema, StructuredOutputParser};
use crate::prompt::{PromptTemplate, TemplateError};

const DEFAULT_DESTINATION: &str = "DEFAULT";

const CLASSIFIER_PROMPT: &str = "\
Pick the destination best suited to handle the input below. Each destination \
is listed with a short description of the questions it is good at. You may \
rewrite the input if that would help the chosen destination answer it.

Answer with a ```json fenced block and nothing else:
```json
{{
    \"destination\": string,  // one of the names listed below, or \"DEFAULT\"
    \"next_inputs\": string  // the input to pass on, possibly rewritten
}}
```

Use \"DEFAULT\" when no destination is a plausible fit for the input.

DESTINATIONS
{destinations}

INPUT
{input}
";

const CORRECTION_PROMPT: &str = "Your previous reply could not be read ({error}). \
Reply again with only a ```json fenced block holding the string keys \
\"destination\" and \"next_inputs\".";

/// Outcome of classifying one input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteDecision {
    Matched {
        destination: String,
        next_input: String,
    },
    /// The classifier chose the default itself.
    ExplicitDefault { next_input: String },
    /// The classifier named a destination that is not registered.
    UnknownDestination {
        requested: String,
        next_input: String,
    },
    /// The classifier reply could not be parsed, even after the stricter re-prompt.
    Unparseable { error: String },
}

impl RouteDecision {
    /// Registered destination name, or `None` when the default chain handles the input.
    #[must_use]
    pub fn destination(&self) -> Option<&str> {
        match self {
            Self::Matched { destination, .. } => Some(destination),
            _ => None,
        }
    }

    #[must_use]
    pub fn is_fallback(&self) -> bool {
        matches!(
            self,
            Self::UnknownDestination { .. } | Self::Unparseable { .. }
        )
    }

    fn next_input<'a>(&'a self, original: &'a str) -> &'a str {
        match self {
            Self::Matched { next_input, .. }
            | Self::ExplicitDefault { next_input }
            | Self::UnknownDestination { next_input, .. } => next_input,
            Self::Unparseable { .. } => original,
        }
    }
}

pub struct Destination {
    pub name: String,
    pub description: String,
    pub chain: Box<dyn Chain>,
}

impl Destination {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        chain: Box<dyn Chain>,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            chain,
        }
    }

    /// Destination backed by an [`LlmChain`] over a single `{input}` template.
    ///
    /// # Errors
    ///
    /// Returns a [`TemplateError`] if `template` does not parse.
    pub fn from_template<P: LlmProvider + 'static>(
        provider: Arc<P>,
        name: impl Into<String>,
        description: impl Into<String>,
        template: &str,
    ) -> Result<Self, TemplateError> {
        let name = name.into();
        let chain = LlmChain::new(provider, PromptTemplate::new(template)?).with_name(name.clone());
        Ok(Self::new(name, description, Box::new(chain)))
    }
}

/// Classify free text against named destinations and run the chosen chain.
///
/// The result is stored under `text`.
pub struct RouterChain<P> {
    name: String,
    provider: Arc<P>,
    destinations: Vec<Destination>,
    default: Box<dyn Chain>,
    parser: StructuredOutputParser,
    classifier: PromptTemplate,
    input_keys: Vec<String>,
    output_keys: Vec<String>,
}

fn check_single_io(name: &str, chain: &dyn Chain) -> Result<(), ChainError> {
    if chain.input_keys().len() == 1 && chain.output_keys().len() == 1 {
        Ok(())
    } else {
        Err(ChainError::InvalidConfiguration(format!(
            "router destination {name:?} must have exactly one input and one output key"
        )))
    }
}

impl<P: LlmProvider> RouterChain<P> {
    /// # Errors
    ///
    /// Returns [`ChainError::InvalidConfiguration`] for duplicate or reserved
    /// destination names, or chains that are not single-input single-output.
    pub fn new(
        provider: Arc<P>,
        destinations: Vec<Destination>,
        default: Box<dyn Chain>,
    ) -> Result<Self, ChainError> {
        for (i, d) in destinations.iter().enumerate() {
            if d.name.eq_ignore_ascii_case(DEFAULT_DESTINATION) {
                return Err(ChainError::InvalidConfiguration(format!(
                    "destination name {:?} is reserved",
                    d.name
                )));
            }
            if destinations[..i]
                .iter()
                .any(|o| o.name.eq_ignore_ascii_case(&d.name))
            {
                return Err(ChainError::InvalidConfiguration(format!(
                    "duplicate destination {:?}",
                    d.name
                )));
            }
            check_single_io(&d.name, d.chain.as_ref())?;
        }
        check_single_io(DEFAULT_DESTINATION, default.as_ref())?;

        Ok(Self {
            name: "router_chain".into(),
            provider,
            destinations,
            default,
            parser: StructuredOutputParser::new(vec![
                ResponseSchema::new("destination", "name of the destination to use"),
                ResponseSchema::new("next_inputs", "input to pass to the destination"),
            ]),
            classifier: PromptTemplate::new(CLASSIFIER_PROMPT)?,
            input_keys: vec!["input".into()],
            output_keys: vec!["text".into()],
        })
    }

    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn destination_names(&self) -> impl Iterator<Item = &str> {
        self.destinations.iter().map(|d| d.name.as_str())
    }

    fn destinations_block(&self) -> String {
        let mut out = String::new();
        for d in &self.destinations {
            let _ = writeln!(out, "{}: {}", d.name, d.description);
        }
        out
    }

    async fn classify(&self, messages: &[Message], ctx: &RunContext) -> Result<String, ChainError> {
        ctx.observe(|o| o.on_llm_start(&self.name, messages));
        let reply = ctx
            .guard(&self.name, async {
                self.provider
                    .chat(messages, 0.0)
                    .await
                    .map_err(ChainError::Llm)
            })
            .await?;
        ctx.observe(|o| o.on_llm_end(&self.name, &reply));
        Ok(reply)
    }

    fn decide(&self, parsed: &ChainValues, input: &str) -> RouteDecision {
        let requested = parsed.get("destination").map_or("", |s| s.trim());
        let next_input = match parsed.get("next_inputs").map(|s| s.trim()) {
            Some(s) if !s.is_empty() => s.to_owned(),
            _ => input.to_owned(),
        };
        if requested.eq_ignore_ascii_case(DEFAULT_DESTINATION) {
            return RouteDecision::ExplicitDefault { next_input };
        }
        match self
            .destinations
            .iter()
            .find(|d| d.name.eq_ignore_ascii_case(requested))
        {
            Some(d) => RouteDecision::Matched {
                destination: d.name.clone(),
                next_input,
            },
            None => RouteDecision::UnknownDestination {
                requested: requested.to_owned(),
                next_input,
            },
        }
    }

    /// Ask the classifier where `input` should go. A reply that cannot be parsed is
    /// retried once with a stricter instruction.
    ///
    /// # Errors
    ///
    /// Only transport errors and cancellation fail; parse failures become
    /// [`RouteDecision::Unparseable`].
    pub async fn route(&self, input: &str, ctx: &RunContext) -> Result<RouteDecision, ChainError> {
        let prompt = self.classifier.render(&ChainValues::from([
            ("destinations".to_owned(), self.destinations_block()),
            ("input".to_owned(), input.to_owned()),
        ]))?;
        let mut messages = vec![Message::user(prompt)];

        let reply = self.classify(&messages, ctx).await?;
        let first_error = match self.parser.parse(&reply) {
            Ok(parsed) => return Ok(self.decide(&parsed, input)),
            Err(e) => e,
        };
        tracing::debug!(chain = %self.name, error = %first_error, "classifier reply unparseable, re-prompting");

        messages.push(Message::assistant(reply));
        messages.push(Message::user(
            CORRECTION_PROMPT.replace("{error}", &first_error.to_string()),
        ));
        let reply = self.classify(&messages, ctx).await?;
        Ok(match self.parser.parse(&reply) {
            Ok(parsed) => self.decide(&parsed, input),
            Err(e) => RouteDecision::Unparseable {
                error: e.to_string(),
            },
        })
    }
}

impl<P: LlmProvider> Chain for RouterChain<P> {
    fn name(&self) -> &str {
        &self.name
    }

    fn input_keys(&self) -> &[String] {
        &self.input_keys
    }

    fn output_keys(&self) -> &[String] {
        &self.output_keys
    }

    fn execute<'a>(
        &'a self,
        inputs: ChainValues,
        ctx: &'a RunContext,
    ) -> BoxFuture<'a, Result<ChainValues, ChainError>> {
        Box::pin(async move {
            let input = inputs.get(&self.input_keys[0]).map_or("", String::as_str);
            let decision = self.route(input, ctx).await?;
            ctx.observe(|o| o.on_route(&self.name, &decision));

            let chain: &dyn Chain = match &decision {
                RouteDecision::Matched { destination, .. } => {
                    tracing::info!(chain = %self.name, destination = %destination, "routed");
                    self.destinations
                        .iter()
                        .find(|d| &d.name == destination)
                        .map_or(self.default.as_ref(), |d| d.chain.as_ref())
                }
                RouteDecision::ExplicitDefault { .. } => {
                    tracing::info!(chain = %self.name, "routed to default");
                    self.default.as_ref()
                }
                RouteDecision::UnknownDestination { requested, .. } => {
                    tracing::warn!(
                        chain = %self.name,
                        requested = %requested,
                        reason = "unknown_destination",
                        "falling back to default chain"
                    );
                    self.default.as_ref()
                }
                RouteDecision::Unparseable { error } => {
                    tracing::warn!(
                        chain = %self.name,
                        error = %error,
                        reason = "unparseable_classifier_output",
                        "falling back to default chain"
                    );
                    self.default.as_ref()
                }
            };

            let text = chain.run(decision.next_input(input), ctx).await?;
            Ok(ChainValues::from([(self.output_keys[0].clone(), text)]))
        })
    }
}
