//
// Lock model behavior over the whole handler: depth, migration,
// purging, refresh, shared scope.
//
use futures::StreamExt;
use http::{Request, Response, StatusCode};

use dav_engine::body::Body;
use dav_engine::{DavHandler, FileSystem};

const EXCLUSIVE: &str = r#"<?xml version="1.0" encoding="utf-8"?>
    <D:lockinfo xmlns:D="DAV:">
        <D:lockscope><D:exclusive/></D:lockscope>
        <D:locktype><D:write/></D:locktype>
        <D:owner><D:href>http://example/u</D:href></D:owner>
    </D:lockinfo>"#;

const SHARED: &str = r#"<?xml version="1.0" encoding="utf-8"?>
    <d:lockinfo xmlns:d="DAV:">
        <d:lockscope><d:shared/></d:lockscope>
        <d:locktype><d:write/></d:locktype>
    </d:lockinfo>"#;

fn handler() -> DavHandler {
    DavHandler::builder(FileSystem::Mem).build()
}

fn req(method: &str, path: &str) -> http::request::Builder {
    Request::builder().method(method).uri(path)
}

async fn body_string(res: Response<Body>) -> String {
    let mut body = res.into_body();
    let mut out = Vec::new();
    while let Some(chunk) = body.next().await {
        out.extend_from_slice(&chunk.unwrap());
    }
    String::from_utf8(out).unwrap()
}

async fn lock(dav: &DavHandler, path: &str, body: &str, depth: &str) -> (StatusCode, String) {
    let res = dav
        .handle(
            req("LOCK", path)
                .header("Depth", depth)
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await;
    let status = res.status();
    let token = res
        .headers()
        .get("lock-token")
        .map(|v| v.to_str().unwrap().to_string())
        .unwrap_or_default();
    (status, token)
}

#[tokio::test]
async fn deep_lock_guards_subtree() {
    let dav = handler();
    dav.handle(req("PUT", "/a/b/c").body(Body::from("x")).unwrap()).await;

    let (status, token) = lock(&dav, "/a", EXCLUSIVE, "infinity").await;
    assert_eq!(status, StatusCode::OK);

    // modification anywhere below /a is denied without the token.
    let res = dav.handle(req("PUT", "/a/b/c").body(Body::from("y")).unwrap()).await;
    assert_eq!(res.status(), StatusCode::LOCKED);
    let res = dav.handle(req("DELETE", "/a/b").body(Body::empty()).unwrap()).await;
    assert_eq!(res.status(), StatusCode::LOCKED);

    // the token travels in the If header.
    let res = dav
        .handle(
            req("PUT", "/a/b/c")
                .header("If", format!("({token})"))
                .body(Body::from("y"))
                .unwrap(),
        )
        .await;
    assert_eq!(res.status(), StatusCode::NO_CONTENT);
}

#[tokio::test]
async fn depth_zero_lock_guards_only_itself() {
    let dav = handler();
    dav.handle(req("PUT", "/dir/f").body(Body::from("x")).unwrap()).await;

    let (status, _) = lock(&dav, "/dir", EXCLUSIVE, "0").await;
    assert_eq!(status, StatusCode::OK);

    let res = dav.handle(req("PUT", "/dir/f").body(Body::from("y")).unwrap()).await;
    assert_eq!(res.status(), StatusCode::NO_CONTENT);
}

#[tokio::test]
async fn delete_purges_locks() {
    let dav = handler();
    dav.handle(req("PUT", "/d/f").body(Body::from("x")).unwrap()).await;

    let (_, token) = lock(&dav, "/d/f", EXCLUSIVE, "0").await;

    // the token belongs to a descendant, so it rides in a tagged list.
    let res = dav
        .handle(
            req("DELETE", "/d")
                .header("If", format!("</d/f> ({token})"))
                .body(Body::empty())
                .unwrap(),
        )
        .await;
    assert_eq!(res.status(), StatusCode::NO_CONTENT);

    let res = dav.handle(req("GET", "/d/f").body(Body::empty()).unwrap()).await;
    assert_eq!(res.status(), StatusCode::NOT_FOUND);

    // no stale lock blocks a fresh one on the same path.
    dav.handle(req("PUT", "/d/f").body(Body::from("x")).unwrap()).await;
    let (status, _) = lock(&dav, "/d/f", EXCLUSIVE, "0").await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn delete_needs_descendant_tokens() {
    let dav = handler();
    dav.handle(req("PUT", "/d/f").body(Body::from("x")).unwrap()).await;
    let (_, _token) = lock(&dav, "/d/f", EXCLUSIVE, "0").await;

    // the lock is below the target, not on it, and still blocks.
    let res = dav.handle(req("DELETE", "/d").body(Body::empty()).unwrap()).await;
    assert_eq!(res.status(), StatusCode::LOCKED);
}

#[tokio::test]
async fn move_migrates_the_lock() {
    let dav = handler();
    dav.handle(req("MKCOL", "/a").body(Body::empty()).unwrap()).await;
    dav.handle(req("PUT", "/a/x").body(Body::from("x")).unwrap()).await;
    let (_, token) = lock(&dav, "/a/x", EXCLUSIVE, "0").await;

    let res = dav
        .handle(
            req("MOVE", "/a/x")
                .header("Destination", "/a/y")
                .header("If", format!("({token})"))
                .body(Body::empty())
                .unwrap(),
        )
        .await;
    assert_eq!(res.status(), StatusCode::CREATED);

    // the lock followed the resource: /a/y is locked, /a/x is free.
    let res = dav.handle(req("PUT", "/a/y").body(Body::from("y")).unwrap()).await;
    assert_eq!(res.status(), StatusCode::LOCKED);
    let res = dav.handle(req("PUT", "/a/x").body(Body::from("z")).unwrap()).await;
    assert_eq!(res.status(), StatusCode::CREATED);

    // and it is exactly the same token.
    let res = dav
        .handle(
            req("UNLOCK", "/a/y")
                .header("Lock-Token", token.as_str())
                .body(Body::empty())
                .unwrap(),
        )
        .await;
    assert_eq!(res.status(), StatusCode::NO_CONTENT);
}

#[tokio::test]
async fn unlock_errors() {
    let dav = handler();
    dav.handle(req("PUT", "/f").body(Body::from("x")).unwrap()).await;
    let (_, token) = lock(&dav, "/f", EXCLUSIVE, "0").await;

    // missing path: 404.
    let res = dav
        .handle(
            req("UNLOCK", "/nope")
                .header("Lock-Token", token.as_str())
                .body(Body::empty())
                .unwrap(),
        )
        .await;
    assert_eq!(res.status(), StatusCode::NOT_FOUND);

    // wrong token: 409.
    let res = dav
        .handle(
            req("UNLOCK", "/f")
                .header("Lock-Token", "<opaquelocktoken:deadbeef>")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
    assert_eq!(res.status(), StatusCode::CONFLICT);

    // missing header: 400.
    let res = dav.handle(req("UNLOCK", "/f").body(Body::empty()).unwrap()).await;
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn lock_refresh() {
    let dav = handler();
    dav.handle(req("PUT", "/f").body(Body::from("x")).unwrap()).await;
    let (_, token) = lock(&dav, "/f", EXCLUSIVE, "0").await;

    let res = dav
        .handle(
            req("LOCK", "/f")
                .header("If", format!("({token})"))
                .header("Timeout", "Second-600")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
    assert_eq!(res.status(), StatusCode::OK);
    let xml = body_string(res).await;
    assert!(xml.contains("Second-600"));
}

#[tokio::test]
async fn shared_locks_coexist() {
    let dav = handler();
    dav.handle(req("PUT", "/s").body(Body::from("x")).unwrap()).await;

    let (s1, t1) = lock(&dav, "/s", SHARED, "0").await;
    let (s2, t2) = lock(&dav, "/s", SHARED, "0").await;
    assert_eq!(s1, StatusCode::OK);
    assert_eq!(s2, StatusCode::OK);
    assert_ne!(t1, t2);

    // an exclusive lock cannot join them.
    let (s3, _) = lock(&dav, "/s", EXCLUSIVE, "0").await;
    assert_eq!(s3, StatusCode::LOCKED);
}

#[tokio::test]
async fn exclusive_lock_blocks_get() {
    let dav = handler();
    dav.handle(req("PUT", "/f").body(Body::from("x")).unwrap()).await;
    let (_, token) = lock(&dav, "/f", EXCLUSIVE, "0").await;

    let res = dav.handle(req("GET", "/f").body(Body::empty()).unwrap()).await;
    assert_eq!(res.status(), StatusCode::LOCKED);

    let res = dav
        .handle(
            req("GET", "/f")
                .header("If", format!("({token})"))
                .body(Body::empty())
                .unwrap(),
        )
        .await;
    assert_eq!(res.status(), StatusCode::OK);
}

#[tokio::test]
async fn lock_on_unmapped_url_creates_resource() {
    let dav = handler();
    let (status, token) = lock(&dav, "/fresh/file", EXCLUSIVE, "0").await;
    assert_eq!(status, StatusCode::CREATED);

    let res = dav
        .handle(
            req("GET", "/fresh/file")
                .header("If", format!("({token})"))
                .body(Body::empty())
                .unwrap(),
        )
        .await;
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(res.headers().get("content-length").unwrap(), "0");
}

#[tokio::test]
async fn lockdiscovery_shows_active_lock() {
    let dav = handler();
    dav.handle(req("PUT", "/f").body(Body::from("x")).unwrap()).await;
    let (_, token) = lock(&dav, "/f", EXCLUSIVE, "0").await;
    let bare = token.trim_start_matches('<').trim_end_matches('>');

    let propfind = r#"<?xml version="1.0"?>
        <propfind xmlns="DAV:"><prop><lockdiscovery/></prop></propfind>"#;
    let res = dav
        .handle(
            req("PROPFIND", "/f")
                .header("Depth", "0")
                .body(Body::from(propfind))
                .unwrap(),
        )
        .await;
    assert_eq!(res.status(), StatusCode::MULTI_STATUS);
    let xml = body_string(res).await;
    assert!(xml.contains(bare));
    assert!(xml.contains("activelock"));
}
