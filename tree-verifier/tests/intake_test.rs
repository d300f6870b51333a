use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tree_verifier::intake::{validate_request, STATUS_BAD_REQUEST, STATUS_INTERNAL_ERROR, STATUS_OK};
use tree_verifier::{
    fingerprint, ImageRef, ImageSource, InMemoryFingerprintStore, IntakeHandler, KeywordPolicy,
    MockLabeler, Result, StaticImageSource, VerificationOrchestrator, VerifierError, VerifyRequest,
};

const OAK_URL: &str = "https://img.example.com/oak.jpg";
const CARTOON_URL: &str = "https://img.example.com/cartoon.png";
const CAR_URL: &str = "https://img.example.com/car.jpg";

const OAK_BYTES: &[u8] = b"oak bytes";
const CARTOON_BYTES: &[u8] = b"cartoon bytes";
const CAR_BYTES: &[u8] = b"car bytes";

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .with_test_writer()
        .try_init();
}

fn handler_with(labeler: MockLabeler) -> IntakeHandler {
    let images = StaticImageSource::new()
        .with_image(OAK_URL, OAK_BYTES)
        .with_image(CARTOON_URL, CARTOON_BYTES)
        .with_image(CAR_URL, CAR_BYTES);
    handler_over(labeler, Arc::new(InMemoryFingerprintStore::new()), Arc::new(images))
}

fn handler_over(
    labeler: MockLabeler,
    store: Arc<InMemoryFingerprintStore>,
    images: Arc<dyn ImageSource>,
) -> IntakeHandler {
    let orchestrator = VerificationOrchestrator::new(
        Arc::new(labeler),
        store,
        Arc::new(KeywordPolicy::default()),
        Duration::from_secs(5),
    );
    IntakeHandler::new(Arc::new(orchestrator), images)
}

/// Source that serves a different photo on every request to the same URL.
struct ShiftingImageSource {
    served: std::sync::atomic::AtomicUsize,
}

#[async_trait]
impl ImageSource for ShiftingImageSource {
    async fn fetch_image(&self, _url: &str) -> Result<Vec<u8>> {
        let n = self.served.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        Ok(format!("photo version {}", n).into_bytes())
    }
}

struct OversizedImageSource;

#[async_trait]
impl ImageSource for OversizedImageSource {
    async fn fetch_image(&self, _url: &str) -> Result<Vec<u8>> {
        Err(VerifierError::ImageTooLarge { size_mb: 64 })
    }
}

fn default_handler() -> IntakeHandler {
    handler_with(
        MockLabeler::new("intake".to_string())
            .with_labels_for_image(OAK_BYTES, ["Tree", "Oak leaf", "Grass"])
            .with_labels_for_image(CARTOON_BYTES, ["Cartoon", "Tree"])
            .with_labels_for_image(CAR_BYTES, ["Car", "Sky"]),
    )
}

fn body_json(body: &impl serde::Serialize) -> Value {
    serde_json::to_value(body).expect("response serializes")
}

#[tokio::test]
async fn test_missing_image_ref_is_bad_request() {
    init_tracing();
    let handler = default_handler();

    for raw in [json!({}), json!({ "imageRef": "" }), json!({ "imageRef": "   " })] {
        let response = handler.handle_body(raw.to_string().as_bytes()).await;
        assert_eq!(response.status, STATUS_BAD_REQUEST, "body: {}", raw);
        assert!(!response.body.success);
        assert_eq!(response.body.message, "No image URL provided");
    }
}

#[tokio::test]
async fn test_malformed_body_and_bad_urls_are_bad_requests() {
    let handler = default_handler();

    let response = handler.handle_body(b"{not json").await;
    assert_eq!(response.status, STATUS_BAD_REQUEST);

    for url in ["not a url", "ftp://img.example.com/oak.jpg", "file:///etc/passwd"] {
        let response = handler.handle_body(json!({ "imageRef": url }).to_string().as_bytes()).await;
        assert_eq!(response.status, STATUS_BAD_REQUEST, "url: {}", url);
        assert_eq!(response.body.message, "Invalid request");
    }
}

#[tokio::test]
async fn test_accepted_photo_returns_labels_and_matches() {
    init_tracing();
    let handler = default_handler();

    let response = handler
        .handle_body(json!({ "imageRef": OAK_URL, "species": "Oak" }).to_string().as_bytes())
        .await;
    info!("Response: {:?}", response);

    assert_eq!(response.status, STATUS_OK);
    let body = body_json(&response.body);
    assert_eq!(body["success"], true);
    assert_eq!(body["message"], "Tree/plant detected");
    assert_eq!(body["labels"], json!(["tree", "oak leaf", "grass"]));
    assert_eq!(body["matchedKeywords"], json!(["tree", "oak leaf"]));
    assert!(body.get("error").is_none());
}

#[tokio::test]
async fn test_policy_rejections_are_ok_with_success_false() {
    let handler = default_handler();

    let response = handler.handle_body(json!({ "imageRef": CARTOON_URL }).to_string().as_bytes()).await;
    assert_eq!(response.status, STATUS_OK);
    assert!(!response.body.success);
    assert_eq!(
        response.body.message,
        "Image appears to be artificial (drawing/toy/illustration)"
    );
    assert_eq!(response.body.labels, Some(vec!["cartoon".to_string(), "tree".to_string()]));
    assert!(response.body.matched_keywords.is_none());

    let response = handler.handle_body(json!({ "imageRef": CAR_URL }).to_string().as_bytes()).await;
    assert_eq!(response.status, STATUS_OK);
    assert_eq!(response.body.message, "No tree or plant detected");
    assert_eq!(response.body.verdict.as_deref(), Some("rejected_no_match"));
}

#[tokio::test]
async fn test_duplicate_submission_through_intake() {
    let handler = default_handler();
    let body = json!({ "imageRef": OAK_URL }).to_string();

    let first = handler.handle_body(body.as_bytes()).await;
    assert!(first.body.success);

    let second = handler.handle_body(body.as_bytes()).await;
    assert_eq!(second.status, STATUS_OK);
    assert!(!second.body.success);
    assert_eq!(second.body.message, "Duplicate image detected! Already submitted.");
}

#[tokio::test]
async fn test_legacy_image_url_field_is_accepted() {
    let handler = default_handler();
    let response = handler.handle_body(json!({ "imageUrl": OAK_URL }).to_string().as_bytes()).await;
    assert_eq!(response.status, STATUS_OK);
    assert!(response.body.success);
}

#[tokio::test]
async fn test_upstream_failure_is_internal_error() {
    init_tracing();
    let handler = handler_with(MockLabeler::new("down".to_string()).failing("Vision credentials not set"));

    let response = handler.handle_body(json!({ "imageRef": OAK_URL }).to_string().as_bytes()).await;
    assert_eq!(response.status, STATUS_INTERNAL_ERROR);
    let body = body_json(&response.body);
    assert_eq!(body["success"], false);
    assert_eq!(body["message"], "Vision API error");
    assert!(body["error"].as_str().unwrap_or_default().contains("Vision credentials not set"));
}

#[tokio::test]
async fn test_unfetchable_image_is_internal_error() {
    let handler = default_handler();
    let response = handler
        .handle_body(json!({ "imageRef": "https://img.example.com/missing.jpg" }).to_string().as_bytes())
        .await;
    assert_eq!(response.status, STATUS_INTERNAL_ERROR);
    assert_eq!(response.body.message, "Failed to fetch image");
}

#[tokio::test]
async fn test_labels_are_requested_for_the_fingerprinted_bytes() {
    init_tracing();
    let store = Arc::new(InMemoryFingerprintStore::new());
    let labeler = MockLabeler::new("bytes".to_string()).with_labels(["Tree"]);
    let received = labeler.received_images();
    let images = Arc::new(ShiftingImageSource {
        served: std::sync::atomic::AtomicUsize::new(0),
    });
    let handler = handler_over(labeler, store.clone(), images);

    let response = handler.handle_body(json!({ "imageRef": OAK_URL }).to_string().as_bytes()).await;
    assert!(response.body.success);

    let fetched = b"photo version 0".to_vec();
    let seen = received.lock().await.clone();
    assert_eq!(seen, vec![ImageRef::Bytes(fetched.clone())], "Labeler must see the downloaded bytes");

    let record = store
        .get(&fingerprint(&fetched))
        .await
        .expect("accepted under the fingerprint of the labeled bytes");
    assert_eq!(record.image_url.as_deref(), Some(OAK_URL));
}

#[tokio::test]
async fn test_oversized_image_is_bad_request() {
    let labeler = MockLabeler::new("unused".to_string()).with_labels(["tree"]);
    let calls = labeler.call_counter();
    let handler = handler_over(
        labeler,
        Arc::new(InMemoryFingerprintStore::new()),
        Arc::new(OversizedImageSource),
    );

    let response = handler.handle_body(json!({ "imageRef": OAK_URL }).to_string().as_bytes()).await;
    assert_eq!(response.status, STATUS_BAD_REQUEST);
    assert_eq!(response.body.message, "Image could not be accepted");
    assert!(response.body.error.unwrap_or_default().contains("64MB"));
    assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 0);
}

#[test]
fn test_validate_request_checks_location() {
    let request: VerifyRequest = serde_json::from_value(json!({
        "imageRef": OAK_URL,
        "userId": "u-1",
        "plantedOn": "2025-03-21",
        "location": { "lat": 95.0, "lng": 10.0 }
    }))
    .expect("request parses");

    assert_eq!(request.metadata.user_id.as_deref(), Some("u-1"));
    assert!(request.metadata.planted_on.is_some());
    assert!(validate_request(&request).is_err());

    let ok: VerifyRequest = serde_json::from_value(json!({
        "imageRef": OAK_URL,
        "location": { "lat": -33.9, "lng": 151.2 }
    }))
    .expect("request parses");
    assert_eq!(validate_request(&ok).expect("valid").as_str(), OAK_URL);
}
