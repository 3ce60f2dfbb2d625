use std::collections::BTreeMap;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use httpmock::prelude::*;
use httpmock::Method::HEAD;
use serde_json::{json, Value};
use tower::ServiceExt;

use xhs_relay_api::config::{Config, PostBridgeConfig};
use xhs_relay_api::resolve::resolve_url;
use xhs_relay_api::verify::{verify_links, VIDEO};
use xhs_relay_api::{create_router, AppState};

const VARIANT_PAGE: &str = r#"<html><head><title>Post - 小红书</title></head><body>
    <img src="https://sns.xhscdn.com/foo!nd_dft_w720">
    <img src="https://sns.xhscdn.com/foo!nd_prv_w120">
</body></html>"#;

fn app(config: Config) -> axum::Router {
    create_router(AppState::new(config).unwrap())
}

/// Short links are simulated on the mock server's own host.
fn local_short_links() -> Config {
    let mut config = Config::default();
    config.short_link_hosts = vec!["127.0.0.1".to_string()];
    config
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

async fn post(router: axum::Router, uri: &str, body: Value) -> axum::response::Response {
    router
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(uri)
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap()
}

#[tokio::test]
async fn short_link_resolves_and_default_variant_wins() {
    let server = MockServer::start_async().await;
    let landing = server.url("/post/1");

    let short = server
        .mock_async(|when, then| {
            when.path("/o/abc123");
            then.status(302).header("location", landing.as_str());
        })
        .await;
    server
        .mock_async(|when, then| {
            when.path("/post/1");
            then.status(200)
                .header("content-type", "text/html; charset=utf-8")
                .body(VARIANT_PAGE);
        })
        .await;

    let input = format!("check this out {} cool", server.url("/o/abc123"));
    let response = post(app(local_short_links()), "/extract", json!({"url": input})).await;

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["success"], true);
    assert_eq!(json["imageLinks"], json!(["https://sns.xhscdn.com/foo!nd_dft_w720"]));
    assert_eq!(json["videoLinks"], json!([]));
    assert_eq!(json["resolvedUrl"], landing);
    assert!(json.get("error").is_none());
    assert!(short.hits_async().await >= 1);
}

#[tokio::test]
async fn short_link_redirected_only_on_get_uses_ranged_get() {
    let server = MockServer::start_async().await;
    let landing = server.url("/post/9");

    server
        .mock_async(|when, then| {
            when.method(HEAD).path("/o/x");
            then.status(200);
        })
        .await;
    let ranged = server
        .mock_async(|when, then| {
            when.method(GET).path("/o/x").header("range", "bytes=0-8191");
            then.status(302).header("location", landing.as_str());
        })
        .await;
    server
        .mock_async(|when, then| {
            when.path("/post/9");
            then.status(200).body(VARIANT_PAGE);
        })
        .await;

    let input = format!("分享 {}", server.url("/o/x"));
    let response = post(app(local_short_links()), "/extract", json!({"url": input})).await;

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["resolvedUrl"], landing);
    assert_eq!(json["imageLinks"], json!(["https://sns.xhscdn.com/foo!nd_dft_w720"]));
    ranged.assert_async().await;
}

#[tokio::test]
async fn head_result_is_kept_when_ranged_get_fails() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(HEAD).path("/o/y");
            then.status(200);
        })
        .await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/o/y");
            then.status(302).header("location", "http://127.0.0.1:1/gone");
        })
        .await;

    let config = local_short_links();
    let client = reqwest::Client::new();
    let url = server.url("/o/y");
    let target = resolve_url(&client, &config, &url).await;

    assert_eq!(target.canonical_url, url);
    assert!(target.resolution_error.is_none());
}

#[tokio::test]
async fn page_without_media_is_an_informational_success() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/empty");
            then.status(200)
                .header("content-type", "text/html")
                .body("<html><body><p>Nothing to see</p></body></html>");
        })
        .await;

    let response = post(
        app(Config::default()),
        "/extract",
        json!({"url": server.url("/empty")}),
    )
    .await;

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["success"], true);
    assert_eq!(json["imageLinks"], json!([]));
    assert_eq!(json["videoLinks"], json!([]));
    assert_eq!(json["error"], "No media matched. Scanned 0 URLs.");
}

#[tokio::test]
async fn upstream_error_fails_single_extraction() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.path("/gone");
            then.status(404);
        })
        .await;

    let response = post(
        app(Config::default()),
        "/extract",
        json!({"url": server.url("/gone")}),
    )
    .await;

    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    let json = body_json(response).await;
    assert_eq!(json["success"], false);
    assert_eq!(json["error"], "Upstream returned HTTP 404");
}

#[tokio::test]
async fn unreachable_short_link_does_not_panic() {
    let response = post(
        app(local_short_links()),
        "/extract",
        json!({"url": "look http://127.0.0.1:1/o/dead"}),
    )
    .await;

    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    assert_eq!(body_json(response).await["success"], false);
}

#[tokio::test]
async fn debug_mode_lists_scanned_urls() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.path("/post/2");
            then.status(200).body(VARIANT_PAGE);
        })
        .await;

    let response = post(
        app(Config::default()),
        "/extract",
        json!({"url": server.url("/post/2"), "debug": true}),
    )
    .await;

    let json = body_json(response).await;
    let scanned = json["debugUrls"].as_array().unwrap();
    assert_eq!(scanned.len(), 2);
}

#[tokio::test]
async fn batch_isolates_failing_items() {
    let server = MockServer::start_async().await;
    for (path, image) in [("/p/1", "first-image-0001"), ("/p/3", "third-image-0003")] {
        let html = format!(
            r#"<html><head><meta property="og:title" content="Note {path}"></head>
               <body><img src="https://sns.xhscdn.com/{image}"></body></html>"#
        );
        server
            .mock_async(move |when, then| {
                when.path(path);
                then.status(200).body(html);
            })
            .await;
    }
    server
        .mock_async(|when, then| {
            when.path("/p/2");
            then.status(500);
        })
        .await;

    let urls = vec![server.url("/p/1"), server.url("/p/2"), server.url("/p/3")];
    let response = post(app(Config::default()), "/extract-batch", json!({"urls": urls})).await;

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["success"], true);

    let posts = json["posts"].as_array().unwrap();
    assert_eq!(posts.len(), 3);
    assert_eq!(posts[0]["images"], json!(["https://sns.xhscdn.com/first-image-0001"]));
    assert_eq!(posts[0]["title"], "Note /p/1");
    assert_eq!(posts[1]["error"], "Upstream returned HTTP 500");
    assert_eq!(posts[1]["images"], json!([]));
    assert_eq!(posts[2]["images"], json!(["https://sns.xhscdn.com/third-image-0003"]));
    assert!(posts[2].get("error").is_none());
}

#[tokio::test]
async fn batch_accepts_free_text_with_several_links() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.path("/a");
            then.status(500);
        })
        .await;

    let text = format!("one {} two {}", server.url("/a"), server.url("/a"));
    let response = post(app(Config::default()), "/extract-batch", json!({"url": text})).await;

    let json = body_json(response).await;
    assert_eq!(json["posts"].as_array().unwrap().len(), 1);
    assert_eq!(json["success"], false);
    assert_eq!(json["error"], "All 1 URLs failed");
}

#[tokio::test]
async fn direct_mode_verifies_video_links() {
    let server = MockServer::start_async().await;
    let video = server.url("/stream/clip.mp4");
    let page = format!(r#"<html><body><video src="{video}"></video></body></html>"#);

    server
        .mock_async(|when, then| {
            when.path("/note");
            then.status(200).body(page);
        })
        .await;
    server
        .mock_async(|when, then| {
            when.path("/stream/clip.mp4");
            then.status(206)
                .header("content-type", "video/mp4")
                .body("0123456789");
        })
        .await;

    let response = post(
        app(Config::default()),
        "/extract",
        json!({"url": server.url("/note"), "verify": true}),
    )
    .await;

    let json = body_json(response).await;
    assert_eq!(json["videoLinks"], json!([video]));
    let reports = json["verification"].as_array().unwrap();
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0]["accessible"], true);
    assert_eq!(reports[0]["status"], 206);
}

#[tokio::test]
async fn verifier_reports_each_link_independently() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.path("/ok.mp4");
            then.status(200).header("content-type", "video/mp4").body("data");
        })
        .await;
    server
        .mock_async(|when, then| {
            when.path("/missing.mp4");
            then.status(404);
        })
        .await;

    let client = reqwest::Client::new();
    let urls = vec![
        server.url("/ok.mp4"),
        server.url("/missing.mp4"),
        "http://127.0.0.1:1/down.mp4".to_string(),
        server.url("/never-probed.mp4"),
    ];
    let reports = verify_links(&client, &urls, 3, VIDEO).await;

    assert_eq!(reports.len(), 3);
    assert!(reports[0].accessible);
    assert!(!reports[1].accessible);
    assert_eq!(reports[1].status, Some(404));
    assert!(!reports[2].accessible);
    assert!(reports[2]
        .error
        .as_deref()
        .unwrap()
        .starts_with("VerificationInconclusive"));
}

#[tokio::test]
async fn proxy_streams_image_with_cache_headers() {
    let server = MockServer::start_async().await;
    let image = server
        .mock_async(|when, then| {
            when.method(GET).path("/img/photo.jpg");
            then.status(200)
                .header("content-type", "image/jpeg")
                .body(vec![0xFFu8, 0xD8, 0xFF, 0xE0]);
        })
        .await;

    let mut config = Config::default();
    config.proxy_allow.clear();

    let target = server.url("/img/photo.jpg");
    let uri = format!(
        "/proxy-image?url={}",
        url::form_urlencoded::byte_serialize(target.as_bytes()).collect::<String>()
    );
    let response = app(config)
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let headers = response.headers();
    assert_eq!(headers["content-type"], "image/jpeg");
    assert_eq!(headers["access-control-allow-origin"], "*");
    assert_eq!(headers["cache-control"], "public, max-age=86400");

    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(bytes.to_vec(), vec![0xFFu8, 0xD8, 0xFF, 0xE0]);
    image.assert_async().await;
}

#[tokio::test]
async fn proxy_does_not_follow_redirects_off_the_allow_list() {
    let server = MockServer::start_async().await;
    let outside = server
        .mock_async(|when, then| {
            when.path("/elsewhere.jpg");
            then.status(200).header("content-type", "image/jpeg").body("x");
        })
        .await;
    let elsewhere = format!("http://localhost:{}/elsewhere.jpg", server.port());
    server
        .mock_async(|when, then| {
            when.path("/img/moved.jpg");
            then.status(302).header("location", elsewhere.as_str());
        })
        .await;

    let mut config = Config::default();
    config.proxy_allow = vec!["127.0.0.1".to_string()];

    let target = server.url("/img/moved.jpg");
    let uri = format!(
        "/proxy-image?url={}",
        url::form_urlencoded::byte_serialize(target.as_bytes()).collect::<String>()
    );
    let response = app(config)
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    assert_eq!(outside.hits_async().await, 0);
}

fn bridge_config(base_url: String) -> Config {
    let mut extra_headers = BTreeMap::new();
    extra_headers.insert("x-workspace".to_string(), "team-a".to_string());

    let mut config = Config::default();
    config.post_bridge = Some(PostBridgeConfig {
        base_url,
        api_key: "secret-key".to_string(),
        extra_headers,
    });
    config
}

#[tokio::test]
async fn publish_forwards_links_with_configured_credentials() {
    let server = MockServer::start_async().await;
    let upstream = server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/v1/posts")
                .header("authorization", "Bearer secret-key")
                .header("x-workspace", "team-a")
                .json_body(json!({
                    "caption": "weekend",
                    "social_accounts": [11, 12],
                    "media_urls": ["https://sns.xhscdn.com/foo!nd_dft_w720"]
                }));
            then.status(201)
                .header("content-type", "application/json")
                .json_body(json!({"id": "post_1"}));
        })
        .await;

    let response = post(
        app(bridge_config(server.base_url())),
        "/publish",
        json!({
            "caption": "weekend",
            "accountIds": [11, 12],
            "mediaUrls": ["https://sns.xhscdn.com/foo!nd_dft_w720"]
        }),
    )
    .await;

    assert_eq!(response.status(), StatusCode::CREATED);
    assert_eq!(body_json(response).await["id"], "post_1");
    upstream.assert_async().await;
}

#[tokio::test]
async fn publish_passes_upstream_errors_through() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/v1/social-accounts");
            then.status(401).body("invalid api key");
        })
        .await;

    let response = app(bridge_config(server.base_url()))
        .oneshot(Request::builder().uri("/accounts").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(body_json(response).await["error"], "invalid api key");
}
