use std::path::Path;
use std::sync::Arc;

use ragline_core::chain::{
    Chain, ChainError, Destination, LlmChain, RouteDecision, RouterChain, SequentialChain,
    values,
};
use ragline_core::config::Config;
use ragline_core::context::{RecordingObserver, RunContext, TraceEvent};
use ragline_core::eval::{EvalSummary, Evaluator, Example, QaGenerator, Verdict};
use ragline_core::parser::{ResponseSchema, StructuredOutputParser};
use ragline_core::prompt::PromptTemplate;
use ragline_core::retrieval::RetrievalQa;
use ragline_llm::mock::MockProvider;
use ragline_memory::{IngestionPipeline, SplitterConfig, TextSplitter, VectorIndex};

const CATALOG: &str = "\
name,description
Women's Campside Oxfords,\"Comfortable lace-up oxford in soft canvas, ideal for camping trips.\"
Recycled Waterhog Dog Mat,\"Durable dog mat made from recycled materials, machine washable.\"
Infant and Toddler Dress,\"Cotton dress with side pockets and a pretty floral print.\"
Ultra-Lofty Down Jacket,\"Warm 850 fill down jacket with a water-repellent shell.\"
Sun Shield Shirt,\"Lightweight shirt with UPF 50+ sun protection, wicks moisture.\"
";

fn write_catalog(dir: &Path) -> std::path::PathBuf {
    let path = dir.join("catalog.csv");
    std::fs::write(&path, CATALOG).unwrap();
    path
}

async fn catalog_index(
    dir: &Path,
    embedder: Arc<MockProvider>,
) -> VectorIndex<MockProvider> {
    let pipeline = IngestionPipeline::new(TextSplitter::new(SplitterConfig {
        chunk_size: 500,
        chunk_overlap: 50,
        sentence_aware: true,
    }));
    pipeline
        .build_index(&[write_catalog(dir)], embedder)
        .await
        .unwrap()
}

fn decision(destination: &str, next: &str) -> String {
    format!(
        "```json\n{{\n  \"destination\": \"{destination}\",\n  \"next_inputs\": \"{next}\"\n}}\n```"
    )
}

#[tokio::test]
async fn ask_grounds_answer_in_retrieved_rows() {
    let dir = tempfile::tempdir().unwrap();
    let provider = Arc::new(
        MockProvider::with_responses(vec!["Yes, the dress has side pockets.".into()])
            .with_hashed_embeddings(256),
    );
    let index = catalog_index(dir.path(), provider.clone()).await;
    assert_eq!(index.len(), 5);

    let qa = RetrievalQa::new(Arc::new(index), provider.clone(), 2);
    let answer = qa
        .answer_with_sources("Does the toddler dress have side pockets?", &RunContext::new())
        .await
        .unwrap();

    assert_eq!(answer.answer, "Yes, the dress has side pockets.");
    assert_eq!(answer.sources.len(), 2);
    assert!(answer.sources[0].chunk.content.contains("Infant and Toddler Dress"));
    assert_eq!(answer.sources[0].chunk.metadata.extra["row"], "2");

    let request = &provider.requests()[0];
    assert!(request.messages[0].content.contains("side pockets"));
    assert_eq!(
        request.messages[1].content,
        "Does the toddler dress have side pockets?"
    );
}

#[tokio::test]
async fn stored_chunks_retrieve_themselves() {
    let dir = tempfile::tempdir().unwrap();
    let provider = Arc::new(MockProvider::default().with_hashed_embeddings(256));
    let index = catalog_index(dir.path(), provider).await;

    for chunk in index.chunks() {
        let first = index.query(&chunk.content, 3).await.unwrap();
        let again = index.query(&chunk.content, 3).await.unwrap();
        assert_eq!(first[0].chunk.id, chunk.id);
        let ids = |hits: &[ragline_memory::ScoredChunk]| {
            hits.iter().map(|h| h.chunk.id.clone()).collect::<Vec<_>>()
        };
        assert_eq!(ids(&first), ids(&again));
    }
}

#[tokio::test]
async fn grade_pipeline_reports_accuracy() {
    let dir = tempfile::tempdir().unwrap();
    let provider = Arc::new(MockProvider::default().with_hashed_embeddings(256));
    let index = catalog_index(dir.path(), provider.clone()).await;
    let qa = RetrievalQa::new(Arc::new(index), provider.clone(), 2);
    let ctx = RunContext::new();

    let examples = vec![
        Example::new("Does the toddler dress have side pockets?", "Yes"),
        Example::new("Is the down jacket rated 850 fill?", "Yes"),
    ];
    provider.push_response("Yes, it does have side pockets.");
    provider.push_response("No, it is 600 fill.");
    let mut predictions = Vec::new();
    for example in &examples {
        predictions.push(qa.answer(&example.query, &ctx).await.unwrap());
    }

    provider.push_response("GRADE: CORRECT");
    provider.push_response("GRADE: INCORRECT");
    let graded = Evaluator::new(provider.clone())
        .evaluate(&examples, &predictions, &ctx)
        .await
        .unwrap();

    assert_eq!(graded[0].verdict, Verdict::Correct);
    assert_eq!(graded[0].prediction, "Yes, it does have side pockets.");
    assert_eq!(graded[1].verdict, Verdict::Incorrect);
    let summary = EvalSummary::from_graded(&graded);
    assert_eq!(summary.total(), 2);
    assert!((summary.accuracy() - 0.5).abs() < f64::EPSILON);

    let judge_prompt = &provider.requests()[2].messages;
    let text: String = judge_prompt.iter().map(|m| m.content.as_str()).collect();
    assert!(text.contains("Does the toddler dress have side pockets?"));
    assert!(text.contains("Yes, it does have side pockets."));
}

#[tokio::test]
async fn generated_examples_feed_the_evaluator() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_catalog(dir.path());
    let loader = ragline_memory::loader_for_path(&path).unwrap();
    let documents = loader.load(&path).await.unwrap();
    let first_two = &documents[..2];

    let provider = Arc::new(MockProvider::with_responses(vec![
        "QUESTION: What material are the Campside Oxfords?\nANSWER: Soft canvas".into(),
        "QUESTION: Is the dog mat machine washable?\nANSWER: Yes".into(),
    ]));
    let ctx = RunContext::new();
    let examples = QaGenerator::new(provider.clone())
        .generate(first_two, &ctx)
        .await
        .unwrap();
    assert_eq!(
        examples,
        vec![
            Example::new("What material are the Campside Oxfords?", "Soft canvas"),
            Example::new("Is the dog mat machine washable?", "Yes"),
        ]
    );
    assert!(provider.requests()[0].messages.iter().any(|m| m.content.contains("Campside")));
}

#[tokio::test]
async fn router_sends_math_to_math_destination() {
    let provider = Arc::new(MockProvider::with_responses(vec![
        decision("math", "What is 2+2?"),
        "4".into(),
    ]));
    let destinations = vec![
        Destination::from_template(
            provider.clone(),
            "physics",
            "Good for answering questions about physics",
            "You are a very smart physics professor.\n\nHere is a question:\n{input}",
        )
        .unwrap(),
        Destination::from_template(
            provider.clone(),
            "math",
            "Good for answering math questions",
            "You are a very good mathematician.\n\nHere is a question:\n{input}",
        )
        .unwrap(),
    ];
    let default = LlmChain::new(provider.clone(), PromptTemplate::new("{input}").unwrap());
    let router = RouterChain::new(provider.clone(), destinations, Box::new(default)).unwrap();

    let rec = Arc::new(RecordingObserver::new());
    let ctx = RunContext::new().with_observer(rec.clone());
    let out = router.run("What is 2+2?", &ctx).await.unwrap();

    assert_eq!(out, "4");
    let requests = provider.requests();
    assert_eq!(requests.len(), 2);
    assert!(
        requests[1].messages[0]
            .content
            .starts_with("You are a very good mathematician.")
    );
    assert!(rec.events().iter().any(|e| matches!(
        e,
        TraceEvent::Route {
            decision: RouteDecision::Matched { destination, .. },
            ..
        } if destination == "math"
    )));
}

#[tokio::test]
async fn four_step_review_chain_returns_requested_keys() {
    let provider = Arc::new(MockProvider::with_responses(vec![
        "I find the taste mediocre. The foam does not hold.".into(),
        "The reviewer finds the product's taste mediocre.".into(),
        "French".into(),
        "Merci pour votre avis.".into(),
    ]));
    let step = |template: &str, name: &str, out: &str| -> Box<dyn Chain> {
        Box::new(
            LlmChain::new(provider.clone(), PromptTemplate::new(template).unwrap())
                .with_name(name)
                .with_output_key(out),
        )
    };
    let chain = SequentialChain::new(
        vec![
            step("Translate the following review to english:\n\n{Review}", "translate", "English_Review"),
            step("Can you summarize the following review in 1 sentence:\n\n{English_Review}", "summarize", "summary"),
            step("What language is the following review:\n\n{Review}", "language", "language"),
            step(
                "Write a follow up response to the following summary in the specified language:\n\nSummary: {summary}\n\nLanguage: {language}",
                "followup",
                "followup_message",
            ),
        ],
        vec!["Review".into()],
        vec![
            "English_Review".into(),
            "summary".into(),
            "followup_message".into(),
        ],
    )
    .unwrap();

    let out = chain
        .call(
            values([("Review", "Je trouve le goût médiocre. La mousse ne tient pas.")]),
            &RunContext::new(),
        )
        .await
        .unwrap();

    let keys: Vec<&str> = out.keys().map(String::as_str).collect();
    assert_eq!(keys, ["English_Review", "followup_message", "summary"]);
    assert!(out.values().all(|v| !v.is_empty()));

    let last = &provider.requests()[3].messages[0].content;
    assert!(last.contains("Summary: The reviewer finds the product's taste mediocre."));
    assert!(last.contains("Language: French"));
}

#[tokio::test]
async fn structured_parser_reads_llm_chain_output() {
    let parser = StructuredOutputParser::new(vec![
        ResponseSchema::new("gift", "Was the item purchased as a gift? true or false"),
        ResponseSchema::new("delivery_days", "How many days did it take to arrive?"),
        ResponseSchema::new("price_value", "Sentences about the value or price"),
    ]);
    let provider = Arc::new(MockProvider::with_responses(vec![
        "```json\n{\"gift\": true, \"delivery_days\": 2, \"price_value\": [\"slightly more expensive\"], \"mood\": \"happy\"}\n```"
            .into(),
    ]));
    let template = PromptTemplate::new(
        "Extract the following from the text.\n\ntext: {text}\n\n{format_instructions}",
    )
    .unwrap();
    let chain = LlmChain::new(provider.clone(), template);

    let out = chain
        .call(
            values([
                ("text", "This leaf blower arrived in two days, just in time for my wife's birthday."),
                ("format_instructions", parser.format_instructions().as_str()),
            ]),
            &RunContext::new(),
        )
        .await
        .unwrap();
    let parsed = parser.parse(&out["text"]).unwrap();

    let keys: Vec<&str> = parsed.keys().map(String::as_str).collect();
    assert_eq!(keys, ["delivery_days", "gift", "price_value"]);
    assert_eq!(parsed["gift"], "true");
    assert_eq!(parsed["delivery_days"], "2");
}

#[tokio::test]
async fn cancelled_run_short_circuits() {
    let provider = Arc::new(MockProvider::default());
    let first = LlmChain::new(provider.clone(), PromptTemplate::new("{a}").unwrap())
        .with_output_key("b");
    let second = LlmChain::new(provider.clone(), PromptTemplate::new("{b}").unwrap())
        .with_output_key("c");
    let chain = SequentialChain::new(
        vec![Box::new(first), Box::new(second)],
        vec!["a".into()],
        vec!["c".into()],
    )
    .unwrap();

    let ctx = RunContext::new();
    ctx.cancel();
    let err = chain.call(values([("a", "x")]), &ctx).await.unwrap_err();
    assert!(err.is_cancelled());
    assert!(!matches!(err, ChainError::UnresolvedInput { .. }));
    assert!(provider.requests().is_empty());
}

#[test]
fn shipped_config_is_valid() {
    let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("config/default.toml");
    let config = Config::load(&path).unwrap();
    config.validate().unwrap();
    let names: Vec<&str> = config
        .router
        .destinations
        .iter()
        .map(|d| d.name.as_str())
        .collect();
    assert_eq!(names, ["physics", "math", "history", "computer science"]);
}
