//! Model-graded evaluation of QA answers and generation of QA examples.

use std::sync::{Arc, LazyLock};

use regex::Regex;
use serde::{Deserialize, Serialize};

use ragline_llm::{LlmProvider, Message, Role};
use ragline_memory::Document;

use crate::chain::{ChainError, ChainValues};
use crate::context::RunContext;
use crate::prompt::ChatPromptTemplate;

const GRADER_SYSTEM: &str = "You are a teacher grading a quiz.";

const GRADER_PROMPT: &str = "\
You are given a question, the reference answer and a student's answer. Decide \
whether the student's answer states the same facts as the reference answer. \
Ignore differences in wording, punctuation and length; extra detail that does \
not contradict the reference is fine.

QUESTION: {query}
REFERENCE ANSWER: {answer}
STUDENT ANSWER: {result}

Finish with a single line that reads either
GRADE: CORRECT
or
GRADE: INCORRECT";

const GENERATOR_PROMPT: &str = "\
You are a teacher writing quiz questions. Read the document below and write \
one question that can be answered from it alone, together with its answer.

DOCUMENT:
{doc}

Reply in exactly this format:
QUESTION: <question>
ANSWER: <answer>";

static QA_PAIR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)QUESTION:\s*(.+?)\s*ANSWER:\s*(.+?)(?:\n[ \t]*\n|\s*\z)").unwrap());

#[derive(Debug, thiserror::Error)]
pub enum EvalError {
    #[error("{examples} examples but {predictions} predictions")]
    LengthMismatch { examples: usize, predictions: usize },

    #[error("could not read a grade for example {index} from judge output: {output:?}")]
    GradingParse { index: usize, output: String },

    #[error("could not read a question/answer pair for document {index}: {output:?}")]
    GenerationParse { index: usize, output: String },

    #[error(transparent)]
    Chain(#[from] ChainError),
}

/// A question with its reference answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Example {
    pub query: String,
    pub answer: String,
}

impl Example {
    pub fn new(query: impl Into<String>, answer: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            answer: answer.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Verdict {
    Correct,
    Incorrect,
}

impl std::fmt::Display for Verdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Correct => "CORRECT",
            Self::Incorrect => "INCORRECT",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GradedOutput {
    pub example: Example,
    pub prediction: String,
    pub verdict: Verdict,
    /// Raw judge reply, kept for auditing.
    pub judge_output: String,
}

const NEGATORS: &[&str] = &["NOT", "NO", "ISN'T", "ISNT", "NEVER"];

fn verdict_token(token: &str) -> Option<Verdict> {
    match token {
        "CORRECT" => Some(Verdict::Correct),
        "INCORRECT" => Some(Verdict::Incorrect),
        _ => None,
    }
}

/// Uppercase words, apostrophes kept so `ISN'T` survives as one word.
fn words(s: &str) -> Vec<String> {
    s.split(|c: char| !(c.is_alphabetic() || c == '\'' || c == '\u{2019}'))
        .map(|w| w.trim_matches(|c: char| c == '\'' || c == '\u{2019}').replace('\u{2019}', "'"))
        .filter(|w| !w.is_empty())
        .map(|w| w.to_uppercase())
        .collect()
}

/// Read a verdict from judge output.
///
/// After the last `GRADE:` the line must hold exactly one verdict word,
/// optionally followed by punctuation. Without a `GRADE:` marker the output
/// must mention exactly one of the two verdicts and never right after a
/// negation such as `not correct`.
#[must_use]
pub fn parse_verdict(output: &str) -> Option<Verdict> {
    let upper = output.to_uppercase();
    if let Some(pos) = upper.rfind("GRADE:") {
        let rest = upper[pos + "GRADE:".len()..]
            .trim_start_matches(|c: char| c.is_whitespace() || c == '*' || c == '_');
        let line = rest.lines().next().unwrap_or_default();
        let word_end = line
            .find(|c: char| !c.is_ascii_alphabetic())
            .unwrap_or(line.len());
        let (word, tail) = line.split_at(word_end);
        if tail.chars().any(char::is_alphanumeric) {
            return None;
        }
        return verdict_token(word);
    }

    let words = words(&upper);
    let mut found = None;
    for (i, word) in words.iter().enumerate() {
        let Some(verdict) = verdict_token(word) else {
            continue;
        };
        if i > 0 && NEGATORS.contains(&words[i - 1].as_str()) {
            return None;
        }
        match found {
            None => found = Some(verdict),
            Some(prev) if prev != verdict => return None,
            Some(_) => {}
        }
    }
    found
}

/// Grades predictions against reference answers with a judge model.
pub struct Evaluator<P> {
    provider: Arc<P>,
    prompt: ChatPromptTemplate,
}

impl<P: LlmProvider> Evaluator<P> {
    #[must_use]
    pub fn new(provider: Arc<P>) -> Self {
        let prompt =
            ChatPromptTemplate::from_messages([(Role::System, GRADER_SYSTEM), (Role::User, GRADER_PROMPT)])
                .unwrap_or_else(|e| unreachable!("grading prompt: {e}"));
        Self { provider, prompt }
    }

    /// Use a custom grading prompt with `{query}`, `{answer}` and `{result}` slots.
    #[must_use]
    pub fn with_prompt(mut self, prompt: ChatPromptTemplate) -> Self {
        self.prompt = prompt;
        self
    }

    /// # Errors
    ///
    /// Returns [`EvalError::GradingParse`] if the judge reply has no verdict, or
    /// [`EvalError::Chain`] if the judge call fails.
    pub async fn grade(
        &self,
        index: usize,
        example: &Example,
        prediction: &str,
        ctx: &RunContext,
    ) -> Result<GradedOutput, EvalError> {
        let values = ChainValues::from([
            ("query".to_owned(), example.query.clone()),
            ("answer".to_owned(), example.answer.clone()),
            ("result".to_owned(), prediction.to_owned()),
        ]);
        let messages = self.prompt.format(&values).map_err(ChainError::from)?;
        ctx.observe(|o| o.on_llm_start("evaluator", &messages));
        let output = ctx
            .guard("evaluator", async {
                self.provider
                    .chat(&messages, 0.0)
                    .await
                    .map_err(ChainError::Llm)
            })
            .await?;
        ctx.observe(|o| o.on_llm_end("evaluator", &output));

        let Some(verdict) = parse_verdict(&output) else {
            tracing::warn!(index, "judge output has no verdict");
            return Err(EvalError::GradingParse { index, output });
        };
        tracing::debug!(index, %verdict, "graded");
        Ok(GradedOutput {
            example: example.clone(),
            prediction: prediction.to_owned(),
            verdict,
            judge_output: output,
        })
    }

    /// Grade each `(example, prediction)` pair in order.
    ///
    /// # Errors
    ///
    /// Returns [`EvalError::LengthMismatch`] if the slices differ in length, and
    /// stops at the first pair that fails to grade.
    pub async fn evaluate(
        &self,
        examples: &[Example],
        predictions: &[String],
        ctx: &RunContext,
    ) -> Result<Vec<GradedOutput>, EvalError> {
        if examples.len() != predictions.len() {
            return Err(EvalError::LengthMismatch {
                examples: examples.len(),
                predictions: predictions.len(),
            });
        }
        let mut graded = Vec::with_capacity(examples.len());
        for (index, (example, prediction)) in examples.iter().zip(predictions).enumerate() {
            graded.push(self.grade(index, example, prediction, ctx).await?);
        }
        let correct = graded.iter().filter(|g| g.verdict == Verdict::Correct).count();
        tracing::info!(total = graded.len(), correct, "evaluation finished");
        Ok(graded)
    }
}

/// Counts of each verdict.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EvalSummary {
    pub correct: usize,
    pub incorrect: usize,
}

impl EvalSummary {
    #[must_use]
    pub fn from_graded(graded: &[GradedOutput]) -> Self {
        graded.iter().fold(Self::default(), |mut s, g| {
            match g.verdict {
                Verdict::Correct => s.correct += 1,
                Verdict::Incorrect => s.incorrect += 1,
            }
            s
        })
    }

    #[must_use]
    pub fn total(&self) -> usize {
        self.correct + self.incorrect
    }

    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn accuracy(&self) -> f64 {
        if self.total() == 0 {
            return 0.0;
        }
        self.correct as f64 / self.total() as f64
    }
}

/// Parse a `QUESTION: ... ANSWER: ...` reply.
#[must_use]
pub fn parse_qa_pair(output: &str) -> Option<Example> {
    let caps = QA_PAIR_RE.captures(output)?;
    let query = caps.get(1)?.as_str().trim();
    let answer = caps.get(2)?.as_str().trim();
    if query.is_empty() || answer.is_empty() {
        return None;
    }
    Some(Example::new(query, answer))
}

/// Asks a model for one question/answer pair per document.
pub struct QaGenerator<P> {
    provider: Arc<P>,
    prompt: ChatPromptTemplate,
    temperature: f32,
}

impl<P: LlmProvider> QaGenerator<P> {
    #[must_use]
    pub fn new(provider: Arc<P>) -> Self {
        let prompt = ChatPromptTemplate::from_template(GENERATOR_PROMPT)
            .unwrap_or_else(|e| unreachable!("generator prompt: {e}"));
        Self {
            provider,
            prompt,
            temperature: 0.0,
        }
    }

    #[must_use]
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    /// # Errors
    ///
    /// Returns [`EvalError::GenerationParse`] naming the first document whose
    /// reply is not a question/answer pair, or [`EvalError::Chain`] if a call fails.
    pub async fn generate(
        &self,
        documents: &[Document],
        ctx: &RunContext,
    ) -> Result<Vec<Example>, EvalError> {
        let mut examples = Vec::with_capacity(documents.len());
        for (index, doc) in documents.iter().enumerate() {
            let values = ChainValues::from([("doc".to_owned(), doc.content.clone())]);
            let messages: Vec<Message> = self.prompt.format(&values).map_err(ChainError::from)?;
            let output = ctx
                .guard("qa_generator", async {
                    self.provider
                        .chat(&messages, self.temperature)
                        .await
                        .map_err(ChainError::Llm)
                })
                .await?;
            let Some(example) = parse_qa_pair(&output) else {
                return Err(EvalError::GenerationParse { index, output });
            };
            examples.push(example);
        }
        tracing::info!(count = examples.len(), "generated QA examples");
        Ok(examples)
    }
}

#[cfg(test)]
mod tests {
    use ragline_llm::mock::MockProvider;
    use ragline_memory::DocumentMetadata;

    use super::*;

    #[test]
    fn verdict_after_grade_marker() {
        assert_eq!(parse_verdict("GRADE: CORRECT"), Some(Verdict::Correct));
        assert_eq!(parse_verdict("reasoning...\nGrade: incorrect"), Some(Verdict::Incorrect));
        assert_eq!(
            parse_verdict("Not INCORRECT at all.\nGRADE: CORRECT."),
            Some(Verdict::Correct)
        );
        assert_eq!(parse_verdict("GRADE: **INCORRECT**"), Some(Verdict::Incorrect));
    }

    #[test]
    fn negated_verdicts_are_unreadable() {
        assert_eq!(parse_verdict("GRADE: NOT CORRECT"), None);
        assert_eq!(parse_verdict("GRADE: CORRECT but incomplete"), None);
        assert_eq!(parse_verdict("The answer is not correct."), None);
        assert_eq!(parse_verdict("The student's answer is not correct."), None);
        assert_eq!(parse_verdict("This answer is NOT correct"), None);
        assert_eq!(parse_verdict("It isn't correct."), None);
        assert_eq!(parse_verdict("It isn\u{2019}t correct."), None);
        assert_eq!(parse_verdict("No correct facts here"), None);
        assert_eq!(parse_verdict("The student's answer is correct."), Some(Verdict::Correct));
    }

    #[test]
    fn verdict_without_marker() {
        assert_eq!(parse_verdict("CORRECT"), Some(Verdict::Correct));
        assert_eq!(parse_verdict("correct, correct"), Some(Verdict::Correct));
        assert_eq!(parse_verdict("CORRECT or INCORRECT?"), None);
        assert_eq!(parse_verdict("looks fine to me"), None);
        assert_eq!(parse_verdict("GRADE: maybe"), None);
    }

    #[tokio::test]
    async fn semantically_equal_answer_graded_correct() {
        let judge = Arc::new(MockProvider::with_responses(vec![
            "The student says yes, matching the reference.\nGRADE: CORRECT".into(),
        ]));
        let evaluator = Evaluator::new(judge.clone());
        let example = Example::new("Do the Cozy Comfort Pullover Set have side pockets?", "Yes");
        let graded = evaluator
            .evaluate(
                std::slice::from_ref(&example),
                &["Yes, it does have side pockets.".to_owned()],
                &RunContext::new(),
            )
            .await
            .unwrap();
        assert_eq!(graded[0].verdict, Verdict::Correct);

        let prompt = &judge.requests()[0].messages[1].content;
        assert!(prompt.contains("REFERENCE ANSWER: Yes\n"));
        assert!(prompt.contains("STUDENT ANSWER: Yes, it does have side pockets."));
    }

    #[tokio::test]
    async fn unreadable_grade_is_an_error() {
        let judge = Arc::new(MockProvider::with_responses(vec!["probably fine".into()]));
        let err = Evaluator::new(judge)
            .grade(3, &Example::new("q", "a"), "p", &RunContext::new())
            .await
            .unwrap_err();
        assert!(matches!(err, EvalError::GradingParse { index: 3, .. }));
    }

    #[tokio::test]
    async fn length_mismatch() {
        let err = Evaluator::new(Arc::new(MockProvider::default()))
            .evaluate(&[Example::new("q", "a")], &[], &RunContext::new())
            .await
            .unwrap_err();
        assert!(matches!(err, EvalError::LengthMismatch { examples: 1, predictions: 0 }));
    }

    #[test]
    fn summary_counts() {
        let g = |verdict| GradedOutput {
            example: Example::new("q", "a"),
            prediction: "p".into(),
            verdict,
            judge_output: String::new(),
        };
        let s = EvalSummary::from_graded(&[g(Verdict::Correct), g(Verdict::Incorrect), g(Verdict::Correct)]);
        assert_eq!(s.total(), 3);
        assert!((s.accuracy() - 2.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn qa_pair_parsing() {
        let ex = parse_qa_pair("QUESTION: What is the sole made of?\nANSWER: Rubber.\n").unwrap();
        assert_eq!(ex, Example::new("What is the sole made of?", "Rubber."));
        assert!(parse_qa_pair("just a sentence").is_none());
        assert!(parse_qa_pair("QUESTION: q\nANSWER:   ").is_none());
    }

    #[test]
    fn qa_pair_stops_at_blank_line() {
        let ex = parse_qa_pair(
            "QUESTION: Is the dog mat washable?\nANSWER: Yes, in a machine.\n\nLet me know if you need more questions!",
        )
        .unwrap();
        assert_eq!(ex.answer, "Yes, in a machine.");

        let multi = parse_qa_pair("QUESTION: Which colours?\nANSWER: Red\nand blue").unwrap();
        assert_eq!(multi.answer, "Red\nand blue");
    }

    #[tokio::test]
    async fn generator_produces_one_example_per_document() {
        let provider = Arc::new(MockProvider::with_responses(vec![
            "QUESTION: Is the shirt cotton?\nANSWER: Yes".into(),
            "QUESTION: Are the boots waterproof?\nANSWER: Yes".into(),
        ]));
        let docs = vec![
            Document {
                content: "name: Shirt\nmaterial: cotton".into(),
                metadata: DocumentMetadata::new("c.csv", "text/csv"),
            },
            Document {
                content: "name: Boots\nfeature: waterproof".into(),
                metadata: DocumentMetadata::new("c.csv", "text/csv"),
            },
        ];
        let examples = QaGenerator::new(provider.clone())
            .generate(&docs, &RunContext::new())
            .await
            .unwrap();
        assert_eq!(examples.len(), 2);
        assert_eq!(examples[1].query, "Are the boots waterproof?");
        assert!(provider.requests()[0].messages[0].content.contains("material: cotton"));
    }

    #[tokio::test]
    async fn generator_reports_bad_reply() {
        let provider = Arc::new(MockProvider::with_responses(vec!["no idea".into()]));
        let docs = vec![Document {
            content: "x".into(),
            metadata: DocumentMetadata::new("c.csv", "text/csv"),
        }];
        let err = QaGenerator::new(provider)
            .generate(&docs, &RunContext::new())
            .await
            .unwrap_err();
        assert!(matches!(err, EvalError::GenerationParse { index: 0, .. }));
    }
}
