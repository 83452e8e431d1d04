use std::time::Duration;

use sitexport_engine::{
    FailureKind, FetchRequest, FetchSettings, Fetcher, ReqwestFetcher, USER_AGENT,
};
use url::Url;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn request(server: &MockServer, route: &str) -> FetchRequest {
    FetchRequest::new(Url::parse(&format!("{}{route}", server.uri())).unwrap())
}

#[tokio::test]
async fn fetcher_sends_export_headers_and_reads_cache_tags() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/articles/foo"))
        .and(header("User-Agent", USER_AGENT))
        .and(header("X-Export-Id", "7"))
        .and(header("X-Auth-Token", "secret"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_raw("<html>ok</html>", "text/html; charset=utf-8")
                .insert_header("X-Cache-Tags", "item-1  site-3"),
        )
        .expect(1)
        .mount(&server)
        .await;

    let fetcher = ReqwestFetcher::new(FetchSettings::default());
    let request = request(&server, "/articles/foo")
        .header("X-Export-Id", "7")
        .header("X-Auth-Token", "secret");

    let output = fetcher.fetch(&request).await.expect("fetch ok");
    assert_eq!(output.metadata.original_url, request.url.to_string());
    assert_eq!(output.metadata.final_url, output.metadata.original_url);
    assert_eq!(output.metadata.redirect_count, 0);
    assert_eq!(output.metadata.media_type().as_deref(), Some("text/html"));
    assert_eq!(output.metadata.cache_tags, vec!["item-1", "site-3"]);
    assert_eq!(output.bytes, b"<html>ok</html>");
}

#[tokio::test]
async fn fetcher_fails_on_http_status() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/missing"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let fetcher = ReqwestFetcher::new(FetchSettings::default());
    let err = fetcher
        .fetch(&request(&server, "/missing"))
        .await
        .unwrap_err();
    assert_eq!(err.kind, FailureKind::HttpStatus(404));
}

#[tokio::test]
async fn fetcher_times_out_on_slow_response() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/slow"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_delay(Duration::from_millis(250))
                .set_body_string("slow"),
        )
        .mount(&server)
        .await;

    let settings = FetchSettings {
        request_timeout: Duration::from_millis(50),
        ..FetchSettings::default()
    };
    let fetcher = ReqwestFetcher::new(settings);
    let err = fetcher.fetch(&request(&server, "/slow")).await.unwrap_err();
    assert_eq!(err.kind, FailureKind::Timeout);
}

#[tokio::test]
async fn fetcher_rejects_too_large_response() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/large.css"))
        .respond_with(ResponseTemplate::new(200).set_body_raw("01234567890", "text/css"))
        .mount(&server)
        .await;

    let settings = FetchSettings {
        max_bytes: 10,
        ..FetchSettings::default()
    };
    let fetcher = ReqwestFetcher::new(settings);
    let err = fetcher
        .fetch(&request(&server, "/large.css"))
        .await
        .unwrap_err();
    assert_eq!(
        err.kind,
        FailureKind::TooLarge {
            max_bytes: 10,
            actual: Some(11)
        }
    );
}

#[tokio::test]
async fn fetcher_rejects_non_http_urls() {
    let fetcher = ReqwestFetcher::new(FetchSettings::default());
    let request = FetchRequest::new(Url::parse("ftp://site.test/file.txt").unwrap());
    let err = fetcher.fetch(&request).await.unwrap_err();
    assert_eq!(err.kind, FailureKind::InvalidUrl);
}
