//! HTTP-level tests for the Kalshi gateway against a mock server.
//!
//! These cover the transport policy end to end:
//! - Signed headers on every attempt, with a fresh signature per retry
//! - 5xx retried with backoff, 4xx failing immediately
//! - 429 honoring `Retry-After`
//! - Network timeouts failing fast without retry

use algo_trade_core::{ErrorClass, GatewayError, MarketGateway, OrderRequest, OrderStatus, Side};
use algo_trade_kalshi::{
    KalshiClient, KalshiClientConfig, KalshiError, RequestSigner, SignedHeaders,
};
use nonzero_ext::nonzero;
use rust_decimal_macros::dec;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use wiremock::matchers::{body_partial_json, header_exists, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

// =============================================================================
// Helper Functions
// =============================================================================

/// Signer that produces a distinct signature per call.
#[derive(Default)]
struct CountingSigner {
    calls: AtomicU64,
}

impl RequestSigner for CountingSigner {
    fn sign(
        &self,
        method: &str,
        path: &str,
        timestamp_ms: u64,
    ) -> algo_trade_kalshi::Result<SignedHeaders> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(SignedHeaders {
            access_key: "test-key".to_string(),
            signature: format!("{method}:{path}:{n}"),
            timestamp: timestamp_ms.to_string(),
        })
    }
}

fn client_for(server: &MockServer, signer: Arc<CountingSigner>) -> KalshiClient {
    let config = KalshiClientConfig::default()
        .with_base_url(server.uri())
        .with_rate_limit(nonzero!(6000u32), nonzero!(100u32))
        .with_timeout_secs(1)
        .with_base_backoff_ms(10);
    KalshiClient::with_signer(config, signer).unwrap()
}

fn market_body() -> serde_json::Value {
    serde_json::json!({
        "market": {
            "ticker": "KXBTC-TEST",
            "status": "active",
            "yes_bid": 62,
            "yes_ask": 64,
            "volume_24h": 500
        }
    })
}

// =============================================================================
// Quote Tests
// =============================================================================

#[tokio::test]
async fn test_get_quote_sends_signed_headers() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/markets/KXBTC-TEST"))
        .and(header_exists("KALSHI-ACCESS-KEY"))
        .and(header_exists("KALSHI-ACCESS-SIGNATURE"))
        .and(header_exists("KALSHI-ACCESS-TIMESTAMP"))
        .respond_with(ResponseTemplate::new(200).set_body_json(market_body()))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server, Arc::new(CountingSigner::default()));
    let quote = client.get_quote("KXBTC-TEST").await.unwrap();

    assert_eq!(quote.bid, dec!(0.62));
    assert_eq!(quote.ask, dec!(0.64));
    assert_eq!(quote.volume, dec!(500));
}

#[tokio::test]
async fn test_crossed_quote_is_client_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/markets/KXBTC-TEST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "market": { "ticker": "KXBTC-TEST", "yes_bid": 70, "yes_ask": 60 }
        })))
        .mount(&server)
        .await;

    let client = client_for(&server, Arc::new(CountingSigner::default()));
    let err = client.get_quote("KXBTC-TEST").await.unwrap_err();

    assert!(matches!(err, GatewayError::InvalidQuote { .. }));
    assert_eq!(err.class(), ErrorClass::Client);
}

// =============================================================================
// Retry Tests
// =============================================================================

#[tokio::test]
async fn test_server_error_retried_with_fresh_signatures() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/markets/KXBTC-TEST"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(2)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/markets/KXBTC-TEST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(market_body()))
        .mount(&server)
        .await;

    let signer = Arc::new(CountingSigner::default());
    let client = client_for(&server, Arc::clone(&signer));
    let quote = client.get_quote("KXBTC-TEST").await.unwrap();
    assert_eq!(quote.bid, dec!(0.62));

    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 3);
    let signatures: HashSet<String> = requests
        .iter()
        .map(|r| {
            r.headers
                .get("KALSHI-ACCESS-SIGNATURE")
                .unwrap()
                .to_str()
                .unwrap()
                .to_string()
        })
        .collect();
    assert_eq!(signatures.len(), 3, "every attempt must be re-signed");
    assert_eq!(client.rate_limiter_stats().admitted, 3);
}

#[tokio::test]
async fn test_server_error_gives_up_after_three_retries() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/markets/KXBTC-TEST"))
        .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
        .expect(4)
        .mount(&server)
        .await;

    let client = client_for(&server, Arc::new(CountingSigner::default()));
    let err = client.fetch_quote("KXBTC-TEST").await.unwrap_err();

    assert!(matches!(
        err,
        KalshiError::Api {
            status_code: 500,
            ..
        }
    ));
    let gateway: GatewayError = err.into();
    assert_eq!(gateway.class(), ErrorClass::Transient);
}

#[tokio::test]
async fn test_client_error_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/markets/KXBTC-GONE"))
        .respond_with(ResponseTemplate::new(404).set_body_string("not found"))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server, Arc::new(CountingSigner::default()));
    let err = client.get_quote("KXBTC-GONE").await.unwrap_err();

    assert!(matches!(
        err,
        GatewayError::Client {
            status_code: 404,
            ..
        }
    ));
}

#[tokio::test]
async fn test_too_many_requests_honors_retry_after() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/markets/KXBTC-TEST"))
        .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "1"))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/markets/KXBTC-TEST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(market_body()))
        .mount(&server)
        .await;

    let client = client_for(&server, Arc::new(CountingSigner::default()));
    let started = Instant::now();
    client.get_quote("KXBTC-TEST").await.unwrap();

    // The 10ms backoff schedule is replaced by the server's one second.
    assert!(started.elapsed() >= Duration::from_secs(1));
    assert_eq!(server.received_requests().await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_timeout_fails_fast_without_retry() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/markets/KXBTC-SLOW"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(market_body())
                .set_delay(Duration::from_secs(3)),
        )
        .mount(&server)
        .await;

    let client = client_for(&server, Arc::new(CountingSigner::default()));
    let err = client.get_quote("KXBTC-SLOW").await.unwrap_err();

    assert!(matches!(err, GatewayError::Timeout(_)));
    assert_eq!(server.received_requests().await.unwrap().len(), 1);
}

// =============================================================================
// Order Tests
// =============================================================================

#[tokio::test]
async fn test_place_order_posts_cents() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/portfolio/orders"))
        .and(body_partial_json(serde_json::json!({
            "ticker": "KXBTC-TEST",
            "side": "yes",
            "action": "sell",
            "type": "limit",
            "count": 10,
            "yes_price": 61
        })))
        .respond_with(ResponseTemplate::new(201).set_body_json(serde_json::json!({
            "order": { "order_id": "ord-42", "status": "resting" }
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server, Arc::new(CountingSigner::default()));
    let order = OrderRequest::sell_limit("KXBTC-TEST", Side::Yes, 10, dec!(0.61), "exit-1");
    let order_id = client.place_order(&order).await.unwrap();

    assert_eq!(order_id, "ord-42");
}

#[tokio::test]
async fn test_cancel_missing_order_returns_false() {
    let server = MockServer::start().await;
    Mock::given(method("DELETE"))
        .and(path("/portfolio/orders/ord-filled"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .and(path("/portfolio/orders/ord-live"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "order": { "order_id": "ord-live", "status": "canceled" },
            "reduced_by": 10
        })))
        .mount(&server)
        .await;

    let client = client_for(&server, Arc::new(CountingSigner::default()));
    assert!(!client.cancel_order("ord-filled").await.unwrap());
    assert!(client.cancel_order("ord-live").await.unwrap());
}

#[tokio::test]
async fn test_order_status_reports_fills() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/portfolio/orders/ord-7"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "order": {
                "order_id": "ord-7",
                "status": "resting",
                "count": 10,
                "fill_count": 4,
                "avg_fill_price": 61
            }
        })))
        .mount(&server)
        .await;

    let client = client_for(&server, Arc::new(CountingSigner::default()));
    let state = client.get_order_status("ord-7").await.unwrap();

    assert_eq!(state.status, OrderStatus::PartiallyFilled);
    assert_eq!(state.filled_quantity, 4);
    assert_eq!(state.avg_fill_price, Some(dec!(0.61)));
}

#[tokio::test]
async fn test_rejects_unsafe_identifiers_without_calling_server() {
    let server = MockServer::start().await;
    let client = client_for(&server, Arc::new(CountingSigner::default()));

    let err = client.get_order_status("../portfolio").await.unwrap_err();
    assert!(matches!(err, GatewayError::InvalidRequest(_)));
    assert!(server.received_requests().await.unwrap().is_empty());
}
