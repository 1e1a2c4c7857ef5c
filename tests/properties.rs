//
// Dead and live property behavior: PROPPATCH round trips, PROPFIND
// shapes, COPY semantics.
//
use futures::StreamExt;
use http::{Request, Response, StatusCode};

use dav_engine::body::Body;
use dav_engine::{DavHandler, FileSystem};

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

async fn propfind(dav: &DavHandler, path: &str, body: &str) -> (StatusCode, String) {
    let res = dav
        .handle(
            req("PROPFIND", path)
                .header("Depth", "0")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await;
    let status = res.status();
    (status, body_string(res).await)
}

const GET_AUTHOR: &str = r#"<?xml version="1.0"?>
    <D:propfind xmlns:D="DAV:" xmlns:z="urn:x">
        <D:prop><z:author/></D:prop>
    </D:propfind>"#;

#[tokio::test]
async fn proppatch_roundtrip() {
    let dav = handler();
    dav.handle(req("PUT", "/f").body(Body::from("x")).unwrap()).await;

    let set = r#"<?xml version="1.0"?>
        <D:propertyupdate xmlns:D="DAV:" xmlns:z="urn:x">
            <D:set><D:prop><z:author>Jane</z:author></D:prop></D:set>
        </D:propertyupdate>"#;
    let res = dav.handle(req("PROPPATCH", "/f").body(Body::from(set)).unwrap()).await;
    assert_eq!(res.status(), StatusCode::MULTI_STATUS);
    let xml = body_string(res).await;
    assert!(xml.contains("HTTP/1.1 200 OK"));

    let (status, xml) = propfind(&dav, "/f", GET_AUTHOR).await;
    assert_eq!(status, StatusCode::MULTI_STATUS);
    assert!(xml.contains("Jane"));
    assert!(xml.contains("HTTP/1.1 200 OK"));

    let remove = r#"<?xml version="1.0"?>
        <D:propertyupdate xmlns:D="DAV:" xmlns:z="urn:x">
            <D:remove><D:prop><z:author/></D:prop></D:remove>
        </D:propertyupdate>"#;
    let res = dav
        .handle(req("PROPPATCH", "/f").body(Body::from(remove)).unwrap())
        .await;
    assert_eq!(res.status(), StatusCode::MULTI_STATUS);

    let (_, xml) = propfind(&dav, "/f", GET_AUTHOR).await;
    assert!(xml.contains("HTTP/1.1 404 Not Found"));
    assert!(!xml.contains("Jane"));
}

#[tokio::test]
async fn proppatch_live_property_fails_everything() {
    let dav = handler();
    dav.handle(req("PUT", "/f").body(Body::from("x")).unwrap()).await;

    // setting a live property is forbidden, and the dead one in the
    // same update reports failed-dependency and is not applied.
    let update = r#"<?xml version="1.0"?>
        <D:propertyupdate xmlns:D="DAV:" xmlns:z="urn:x">
            <D:set><D:prop><z:author>Jane</z:author></D:prop></D:set>
            <D:set><D:prop><D:getetag>fake</D:getetag></D:prop></D:set>
        </D:propertyupdate>"#;
    let res = dav
        .handle(req("PROPPATCH", "/f").body(Body::from(update)).unwrap())
        .await;
    assert_eq!(res.status(), StatusCode::MULTI_STATUS);
    let xml = body_string(res).await;
    assert!(xml.contains("HTTP/1.1 403 Forbidden"));
    assert!(xml.contains("HTTP/1.1 424 Failed Dependency"));

    let (_, xml) = propfind(&dav, "/f", GET_AUTHOR).await;
    assert!(!xml.contains("Jane"));
}

#[tokio::test]
async fn propfind_allprop_includes_dead_and_live() {
    let dav = handler();
    dav.handle(req("PUT", "/f.txt").body(Body::from("hello")).unwrap()).await;
    let set = r#"<?xml version="1.0"?>
        <propertyupdate xmlns="DAV:">
            <set><prop><color xmlns="urn:x">red</color></prop></set>
        </propertyupdate>"#;
    dav.handle(req("PROPPATCH", "/f.txt").body(Body::from(set)).unwrap()).await;

    // empty body is allprop.
    let (status, xml) = propfind(&dav, "/f.txt", "").await;
    assert_eq!(status, StatusCode::MULTI_STATUS);
    assert!(xml.contains("getcontentlength"));
    assert!(xml.contains(">5<"));
    assert!(xml.contains("text/plain"));
    assert!(xml.contains("getetag"));
    assert!(xml.contains("displayname"));
    assert!(xml.contains(">f.txt<"));
    assert!(xml.contains("red"));
    assert!(xml.contains("supportedlock"));
}

#[tokio::test]
async fn propfind_propname_lists_names_only() {
    let dav = handler();
    dav.handle(req("PUT", "/f").body(Body::from("x")).unwrap()).await;
    let set = r#"<?xml version="1.0"?>
        <propertyupdate xmlns="DAV:">
            <set><prop><color xmlns="urn:x">red</color></prop></set>
        </propertyupdate>"#;
    dav.handle(req("PROPPATCH", "/f").body(Body::from(set)).unwrap()).await;

    let propname = r#"<?xml version="1.0"?>
        <propfind xmlns="DAV:"><propname/></propfind>"#;
    let (status, xml) = propfind(&dav, "/f", propname).await;
    assert_eq!(status, StatusCode::MULTI_STATUS);
    assert!(xml.contains("color"));
    assert!(!xml.contains("red"));
    assert!(xml.contains("getlastmodified"));
}

#[tokio::test]
async fn propfind_missing_resource() {
    let dav = handler();
    let (status, _) = propfind(&dav, "/nope", "").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn propfind_root_displayname() {
    let dav = handler();
    let allprop = r#"<?xml version="1.0"?>
        <propfind xmlns="DAV:"><allprop/></propfind>"#;
    let (status, xml) = propfind(&dav, "/", allprop).await;
    assert_eq!(status, StatusCode::MULTI_STATUS);
    assert!(xml.contains("<d:collection"));
    assert!(xml.contains(">/<"));
}

#[tokio::test]
async fn copy_preserves_content_and_props() {
    let dav = handler();
    dav.handle(req("PUT", "/src").body(Body::from("data")).unwrap()).await;
    let set = r#"<?xml version="1.0"?>
        <propertyupdate xmlns="DAV:" xmlns:z="urn:x">
            <set><prop><z:author>Jane</z:author></prop></set>
        </propertyupdate>"#;
    dav.handle(req("PROPPATCH", "/src").body(Body::from(set)).unwrap()).await;

    let res = dav
        .handle(
            req("COPY", "/src")
                .header("Destination", "/dst")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
    assert_eq!(res.status(), StatusCode::CREATED);
    let res = dav
        .handle(
            req("COPY", "/dst")
                .header("Destination", "/dst2")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
    assert_eq!(res.status(), StatusCode::CREATED);

    // bytes survive both hops, etags do not.
    let mut etags = Vec::new();
    for path in ["/src", "/dst", "/dst2"] {
        let res = dav.handle(req("GET", path).body(Body::empty()).unwrap()).await;
        assert_eq!(res.status(), StatusCode::OK);
        etags.push(res.headers().get("etag").unwrap().to_str().unwrap().to_string());
        assert_eq!(body_string(res).await, "data");
    }
    etags.sort();
    etags.dedup();
    assert_eq!(etags.len(), 3);

    let (_, xml) = propfind(&dav, "/dst2", GET_AUTHOR).await;
    assert!(xml.contains("Jane"));
}

#[tokio::test]
async fn copy_overwrite_false() {
    let dav = handler();
    dav.handle(req("PUT", "/src").body(Body::from("a")).unwrap()).await;
    dav.handle(req("PUT", "/dst").body(Body::from("b")).unwrap()).await;

    let res = dav
        .handle(
            req("COPY", "/src")
                .header("Destination", "/dst")
                .header("Overwrite", "F")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
    assert_eq!(res.status(), StatusCode::PRECONDITION_FAILED);

    // with the default overwrite, the copy replaces and reports 204.
    let res = dav
        .handle(
            req("COPY", "/src")
                .header("Destination", "/dst")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
    assert_eq!(res.status(), StatusCode::NO_CONTENT);
}

#[tokio::test]
async fn copy_into_own_subtree() {
    let dav = handler();
    dav.handle(req("MKCOL", "/a").body(Body::empty()).unwrap()).await;
    let res = dav
        .handle(
            req("COPY", "/a")
                .header("Destination", "/a/b")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
    assert_eq!(res.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn cross_host_destination_is_rejected() {
    let dav = handler();
    dav.handle(req("PUT", "/src").body(Body::from("a")).unwrap()).await;
    let res = dav
        .handle(
            req("MOVE", "/src")
                .header("Host", "here")
                .header("Destination", "http://elsewhere/dst")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
}
