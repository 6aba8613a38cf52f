//! Integration tests for the reqwest-backed fetcher
//!
//! These tests use wiremock to create mock HTTP servers and check status
//! classification, header delivery and a full crawl cycle end-to-end.

use sumi_dispatch::config::{Config, FetchConfig};
use sumi_dispatch::crawler::{CrawlCoordinator, Fetcher, HttpFetcher, OutcomeKind, Request};
use sumi_dispatch::policy::fetch_robots;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn fetcher() -> HttpFetcher {
    let config = FetchConfig {
        timeout_secs: 5,
        connect_timeout_secs: 2,
    };
    HttpFetcher::new(&config, "TestBot/1.0").expect("Failed to build fetcher")
}

async fn status_server(status: u16) -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/status"))
        .respond_with(ResponseTemplate::new(status))
        .mount(&server)
        .await;
    server
}

#[tokio::test]
async fn test_success_returns_response() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/page"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string("<html><body>hello</body></html>")
                .insert_header("content-type", "text/html"),
        )
        .mount(&server)
        .await;

    let request = Request::get(&format!("{}/page", server.uri())).unwrap();
    let result = fetcher().fetch(&request, None).await;

    assert_eq!(result.outcome.kind, OutcomeKind::Success);
    assert_eq!(result.outcome.status, Some(200));
    let response = result.response.expect("response should be present");
    assert!(response.is_html());
    assert!(response.body.contains("hello"));
}

#[tokio::test]
async fn test_request_headers_are_sent() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/ua"))
        .and(header("user-agent", "Mozilla/5.0 (Test)"))
        .and(header("accept-language", "de-DE"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let request = Request::get(&format!("{}/ua", server.uri()))
        .unwrap()
        .with_header("User-Agent", "Mozilla/5.0 (Test)")
        .with_header("Accept-Language", "de-DE");
    let result = fetcher().fetch(&request, None).await;

    // Without the headers the mock would answer 404
    assert_eq!(result.outcome.kind, OutcomeKind::Success);
}

#[tokio::test]
async fn test_status_classification() {
    for (status, expected) in [
        (503, OutcomeKind::Transient),
        (500, OutcomeKind::Transient),
        (429, OutcomeKind::PolicyBlocked),
        (403, OutcomeKind::PolicyBlocked),
        (404, OutcomeKind::Fatal),
    ] {
        let server = status_server(status).await;
        let request = Request::get(&format!("{}/status", server.uri())).unwrap();
        let result = fetcher().fetch(&request, None).await;

        assert_eq!(result.outcome.kind, expected, "status {}", status);
        assert_eq!(result.outcome.status, Some(status));
        assert!(result.response.is_some());
    }
}

#[tokio::test]
async fn test_connection_refused_is_transient() {
    // Bind and release a port so nothing is listening on it
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let request = Request::get(&format!("http://{}/", addr)).unwrap();
    let result = fetcher().fetch(&request, None).await;

    assert_eq!(result.outcome.kind, OutcomeKind::Transient);
    assert!(result.outcome.status.is_none());
    assert!(result.response.is_none());
}

#[tokio::test]
async fn test_full_crawl_single_domain() {
    let server = MockServer::start().await;
    let base_url = server.uri();

    Mock::given(method("GET"))
        .and(path("/robots.txt"))
        .respond_with(
            ResponseTemplate::new(200).set_body_string("User-agent: *\nDisallow: /private\n"),
        )
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(format!(
                    r#"<html><head><title>Home</title></head><body>
                    <a href="{}/page1">Page 1</a>
                    <a href="/page2">Page 2</a>
                    <a href="/private/secret">Secret</a>
                    <a href="/page1#again">Page 1 again</a>
                    </body></html>"#,
                    base_url
                ))
                .insert_header("content-type", "text/html"),
        )
        .mount(&server)
        .await;

    for page in ["/page1", "/page2"] {
        Mock::given(method("GET"))
            .and(path(page))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string("<html><body>leaf</body></html>")
                    .insert_header("content-type", "text/html"),
            )
            .mount(&server)
            .await;
    }

    let mut config = Config::default();
    config.scheduler.default_delay_ms = 0;
    config.scheduler.max_depth = 2;

    let fetcher = std::sync::Arc::new(fetcher());
    let coordinator = CrawlCoordinator::builder(config)
        .fetcher(fetcher.clone())
        .build()
        .await
        .expect("Failed to build coordinator");

    let seed = Request::get(&format!("{}/", base_url)).unwrap();
    let rules = fetch_robots(fetcher.direct_client(), seed.url()).await;
    coordinator.register_robots(seed.domain(), rules);

    let stats = coordinator
        .start(&[format!("{}/", base_url)])
        .await
        .expect("Crawl failed");

    // "/", "/page1", "/page2"; the private link is refused by robots.txt
    assert_eq!(stats.completed, 3, "stats: {:?}", stats);
    assert_eq!(stats.failed, 1);
    assert_eq!(stats.queued, 0);

    let domain_stats = &stats.per_domain[seed.domain()];
    assert_eq!(domain_stats.succeeded, 3);
    assert!(domain_stats
        .recent_errors
        .iter()
        .any(|e| e.error.contains("robots.txt")));
}
