//! End-to-end test of a full tier1 -> tier2 -> tier3 sequential batch run,
//! per spec §8's "full sequential batch" scenario: every job that completes
//! tier1 becomes eligible for tier2, and so on, and the aggregate totals
//! line up across tiers.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use regex::Regex;
use tiered_analysis_pipeline::{
    new_tier1_analyzer, new_tier2_analyzer, new_tier3_analyzer, CancellationToken, EventSink,
    FileEventSink, GeminiConfig, InMemoryStateStore, Job, LlmClient, ModelCatalog,
    NoopDetectionSink, PromptRegistry, Scheduler, StateStore,
};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

struct TierSequenceResponder {
    call_index: AtomicUsize,
}

fn extract_token(body: &[u8]) -> String {
    let text = String::from_utf8_lossy(body);
    let re = Regex::new(r"SEC_TOKEN_[A-Za-z0-9]+").unwrap();
    re.find(&text).expect("prompt should embed a security token").as_str().to_string()
}

impl Respond for TierSequenceResponder {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let token = extract_token(&request.body);
        let idx = self.call_index.fetch_add(1, Ordering::SeqCst);
        let analysis_results = match idx {
            0 => serde_json::json!([
                {
                    "job_id": "job-1",
                    "authenticity_check": {"title_matches_role": true, "is_authentic": true},
                    "classification": {"industry": "tech"},
                    "structured_data": {"ats_optimization": {"keywords": []}, "skills": ["rust"]}
                },
                {
                    "job_id": "job-2",
                    "authenticity_check": {"title_matches_role": true, "is_authentic": true},
                    "classification": {"industry": "tech"},
                    "structured_data": {"ats_optimization": {"keywords": []}, "skills": ["go"]}
                }
            ]),
            1 => serde_json::json!([
                {"job_id": "job-1", "stress_level_analysis": "moderate", "red_flags": [], "implicit_requirements": []},
                {"job_id": "job-2", "stress_level_analysis": "low", "red_flags": [], "implicit_requirements": []}
            ]),
            _ => serde_json::json!([
                {"job_id": "job-1", "prestige_analysis": {"score": 0.7}, "cover_letter_insight": {"angle": "growth"}},
                {"job_id": "job-2", "prestige_analysis": {"score": 0.5}, "cover_letter_insight": {"angle": "stability"}}
            ]),
        };
        let body = serde_json::json!({
            "security_token": token,
            "analysis_results": analysis_results,
        });
        ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "candidates": [{"content": {"parts": [{"text": body.to_string()}]}}],
            "usageMetadata": {"totalTokenCount": 500}
        }))
    }
}

#[tokio::test(start_paused = true)]
async fn full_sequential_batch_advances_every_job_through_all_three_tiers() {
    let server = MockServer::start().await;
    Mock::given(wiremock::matchers::method("POST"))
        .respond_with(TierSequenceResponder {
            call_index: AtomicUsize::new(0),
        })
        .mount(&server)
        .await;

    let config = GeminiConfig {
        base_url: server.uri(),
        api_key: "test-key".to_string(),
        default_model: "gemini-2.0-flash-lite-001".to_string(),
    };
    let dir = tempfile::tempdir().unwrap();
    let catalog = ModelCatalog::default_gemini_catalog();
    let client = Arc::new(
        LlmClient::new(config, catalog.clone(), dir.path(), 1_000_000, "gemini-2.0-flash-lite-001".to_string())
            .unwrap(),
    );

    let concrete_store = Arc::new(InMemoryStateStore::new());
    concrete_store
        .seed(vec![
            Job {
                id: "job-1".to_string(),
                title: "Software Engineer".to_string(),
                description: "Build things".to_string(),
                company: "Acme".to_string(),
            },
            Job {
                id: "job-2".to_string(),
                title: "Product Manager".to_string(),
                description: "Ship things".to_string(),
                company: "Acme".to_string(),
            },
        ])
        .await;
    let store: Arc<dyn StateStore> = concrete_store;

    let registry = Arc::new(PromptRegistry::new());
    let incidents: Arc<dyn EventSink> = Arc::new(FileEventSink::new(
        dir.path(),
        "security_incidents.jsonl",
        Box::new(NoopDetectionSink),
    ));

    let tier1 = new_tier1_analyzer(store.clone(), registry.clone(), client.clone(), incidents.clone());
    let tier2 = new_tier2_analyzer(store.clone(), registry.clone(), client.clone(), incidents.clone());
    let tier3 = new_tier3_analyzer(store.clone(), registry.clone(), client.clone(), incidents.clone());

    let scheduler = Scheduler::new(
        tier1,
        tier2,
        tier3,
        client,
        catalog,
        Default::default(),
        std::time::Duration::from_secs(300),
        1_000_000,
    );

    let cancel = CancellationToken::new();
    let [t1, t2, t3] = scheduler.run_full_sequential_batch(&cancel).await.unwrap();

    assert_eq!(t1.successful, 2);
    assert_eq!(t2.successful, 2);
    assert_eq!(t3.successful, 2);
    assert_eq!(t1.failed + t2.failed + t3.failed, 0);

    let status = store.processing_status().await.unwrap();
    assert_eq!(status.fully_analyzed, 2);
    assert_eq!(status.pending_t1, 0);
    assert_eq!(status.pending_t2, 0);
    assert_eq!(status.pending_t3, 0);
}
