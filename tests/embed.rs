//
// The embedding adapter: auth, CORS, custom headers, deadlines.
//
use std::collections::HashMap;
use std::time::Duration;

use bytes::Bytes;
use http::{Request, StatusCode};

use dav_engine::body::Body;
use dav_engine::{CorsConfig, DavConfig, DavHandler, DavServer, FileSystem};

fn req(method: &str, path: &str) -> http::request::Builder {
    Request::builder().method(method).uri(path)
}

fn users() -> HashMap<String, String> {
    HashMap::from([("jane".to_string(), "secret".to_string())])
}

fn authed_server() -> DavServer {
    DavServer::new(
        DavHandler::builder(FileSystem::Mem),
        DavConfig::new().auth("files", users()),
    )
}

#[tokio::test]
async fn missing_credentials_get_401() {
    let srv = authed_server();
    let res = srv.handle(req("GET", "/").body(Body::empty()).unwrap()).await;
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(
        res.headers().get("www-authenticate").unwrap(),
        "Basic realm=\"files\""
    );
}

#[tokio::test]
async fn wrong_password_gets_401() {
    let srv = authed_server();
    // jane:wrong
    let res = srv
        .handle(
            req("GET", "/")
                .header("Authorization", "Basic amFuZTp3cm9uZw==")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn valid_credentials_pass_through() {
    let srv = authed_server();
    // jane:secret
    let res = srv
        .handle(
            req("OPTIONS", "/")
                .header("Authorization", "Basic amFuZTpzZWNyZXQ=")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(res.headers().get("dav").unwrap(), "1, 2");
}

#[tokio::test]
async fn custom_headers_are_stamped() {
    let srv = DavServer::new(
        DavHandler::builder(FileSystem::Mem),
        DavConfig::new().custom_header(
            "x-powered-by".parse().unwrap(),
            "dav-engine".parse().unwrap(),
        ),
    );
    let res = srv.handle(req("OPTIONS", "/").body(Body::empty()).unwrap()).await;
    assert_eq!(res.headers().get("x-powered-by").unwrap(), "dav-engine");
}

#[tokio::test]
async fn cors_preflight_and_response_headers() {
    let srv = DavServer::new(
        DavHandler::builder(FileSystem::Mem),
        DavConfig::new().cors(CorsConfig {
            origins: vec!["http://app.example".to_string()],
            methods: vec!["GET".to_string(), "PROPFIND".to_string()],
            headers: vec!["depth".to_string()],
            credentials: false,
        }),
    );

    let res = srv
        .handle(
            req("OPTIONS", "/")
                .header("Origin", "http://app.example")
                .header("Access-Control-Request-Method", "PROPFIND")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
    assert_eq!(res.status(), StatusCode::NO_CONTENT);
    assert_eq!(
        res.headers().get("access-control-allow-origin").unwrap(),
        "http://app.example"
    );
    assert_eq!(
        res.headers().get("access-control-allow-methods").unwrap(),
        "GET, PROPFIND"
    );

    // a disallowed origin gets no CORS headers.
    let res = srv
        .handle(
            req("OPTIONS", "/")
                .header("Origin", "http://evil.example")
                .header("Access-Control-Request-Method", "GET")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
    assert!(res.headers().get("access-control-allow-origin").is_none());

    // plain requests carry the allow-origin header too.
    let res = srv
        .handle(
            req("OPTIONS", "/")
                .header("Origin", "http://app.example")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
    assert_eq!(
        res.headers().get("access-control-allow-origin").unwrap(),
        "http://app.example"
    );
}

#[tokio::test]
async fn stalled_upload_gets_408() {
    let srv = DavServer::new(
        DavHandler::builder(FileSystem::Mem),
        DavConfig::new().upload_timeout(Duration::from_millis(50)),
    );

    // a body that sends one chunk and then goes quiet.
    let stalled = Body::stream(async_stream::stream! {
        yield Ok(Bytes::from_static(b"start"));
        futures::future::pending::<()>().await;
        yield Ok(Bytes::new());
    });
    let res = srv.handle(req("PUT", "/f").body(stalled).unwrap()).await;
    assert_eq!(res.status(), StatusCode::REQUEST_TIMEOUT);

    // the aborted upload left nothing behind.
    let res = srv.handle(req("GET", "/f").body(Body::empty()).unwrap()).await;
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn locks_are_owned_by_the_principal() {
    let srv = authed_server();
    let lockinfo = r#"<?xml version="1.0"?>
        <D:lockinfo xmlns:D="DAV:">
            <D:lockscope><D:exclusive/></D:lockscope>
            <D:locktype><D:write/></D:locktype>
        </D:lockinfo>"#;
    let res = srv
        .handle(
            req("LOCK", "/f")
                .header("Authorization", "Basic amFuZTpzZWNyZXQ=")
                .body(Body::from(lockinfo))
                .unwrap(),
        )
        .await;
    assert_eq!(res.status(), StatusCode::CREATED);
    use futures::StreamExt;
    let mut body = res.into_body();
    let mut out = Vec::new();
    while let Some(chunk) = body.next().await {
        out.extend_from_slice(&chunk.unwrap());
    }
    let xml = String::from_utf8(out).unwrap();
    // no owner in the lockinfo, so the authenticated user is recorded.
    assert!(xml.contains("jane"));
}
