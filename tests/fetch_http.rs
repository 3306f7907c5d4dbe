// tests/fetch_http.rs
//
// HttpFetcher against a local mockito server.

use line_status::classify::is_unavailable_text;
use line_status::extract::Extractor;
use line_status::fetch::{Fetcher, HttpFetcher};
use line_status::PipelineConfig;

fn fast_cfg() -> PipelineConfig {
    PipelineConfig {
        request_timeout_ms: 2_000,
        retry_attempts: 2,
        retry_delay_ms: 0,
        ..PipelineConfig::default()
    }
}

#[tokio::test]
async fn sends_browser_headers_and_returns_body() {
    let mut server = mockito::Server::new_async().await;
    let m = server
        .mock("GET", "/direto-do-metro")
        .match_header("accept-language", "pt-BR,pt;q=0.9,en-US;q=0.8,en;q=0.7")
        .match_header("user-agent", mockito::Matcher::Regex("Mozilla/5.0".into()))
        .with_status(200)
        .with_header("content-type", "text/html; charset=utf-8")
        .with_body("<h3>Linha 1 - Azul</h3>")
        .create_async()
        .await;

    let fetcher = HttpFetcher::new(&fast_cfg()).unwrap();
    let doc = fetcher
        .fetch(&format!("{}/direto-do-metro", server.url()))
        .await
        .expect("fetch");
    assert_eq!(doc.status, 200);
    assert_eq!(doc.body, "<h3>Linha 1 - Azul</h3>");
    m.assert_async().await;
}

#[tokio::test]
async fn non_success_status_still_yields_the_body() {
    let mut server = mockito::Server::new_async().await;
    let m = server
        .mock("GET", "/status")
        .with_status(503)
        .with_body("<p>Situação: Operação Normal</p>")
        .expect(1)
        .create_async()
        .await;

    let fetcher = HttpFetcher::new(&fast_cfg()).unwrap();
    let doc = fetcher
        .fetch(&format!("{}/status", server.url()))
        .await
        .expect("non-2xx is not a transport failure");
    assert_eq!(doc.status, 503);
    assert!(doc.body.contains("Operação Normal"));
    // not retried
    m.assert_async().await;
}

#[tokio::test]
async fn follows_redirects() {
    let mut server = mockito::Server::new_async().await;
    let _old = server
        .mock("GET", "/old")
        .with_status(301)
        .with_header("location", "/new")
        .create_async()
        .await;
    let _new = server
        .mock("GET", "/new")
        .with_status(200)
        .with_body("moved")
        .create_async()
        .await;

    let fetcher = HttpFetcher::new(&fast_cfg()).unwrap();
    let doc = fetcher.fetch(&format!("{}/old", server.url())).await.unwrap();
    assert_eq!(doc.body, "moved");
    assert!(doc.url.ends_with("/new"));
}

#[tokio::test]
async fn transport_failure_reports_attempts() {
    let fetcher = HttpFetcher::new(&fast_cfg()).unwrap();
    // Nothing listens on port 9 (discard) in the test environment.
    let err = fetcher.fetch("http://127.0.0.1:9/").await.unwrap_err();
    assert_eq!(err.attempts, 2);
    assert_eq!(err.url, "http://127.0.0.1:9/");
    assert!(!err.cause.is_empty());
}

#[tokio::test]
async fn latin1_page_declared_only_in_meta_is_decoded() {
    let mut server = mockito::Server::new_async().await;
    let body: &[u8] = b"<html><head><meta charset=\"iso-8859-1\"></head><body>\
<h3>Linha 15 - Prata</h3><div><p>Situa\xe7\xe3o: Indispon\xedvel</p></div></body></html>";
    let _m = server
        .mock("GET", "/latin1")
        .with_status(200)
        .with_header("content-type", "text/html")
        .with_body(body)
        .create_async()
        .await;

    let fetcher = HttpFetcher::new(&fast_cfg()).unwrap();
    let doc = fetcher
        .fetch(&format!("{}/latin1", server.url()))
        .await
        .expect("fetch");
    assert!(doc.body.contains("Situação: Indisponível"), "{}", doc.body);

    let ex = Extractor::default().extract(&doc.body);
    let raw = ex.candidates[0].raw_status.as_deref().unwrap_or_default();
    assert_eq!(raw, "Indisponível");
    assert!(is_unavailable_text(raw));
}
