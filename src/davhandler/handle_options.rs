use headers::HeaderMapExt;
use http::{Request, Response};

use crate::body::Body;
use crate::util::{dav_method_name, DavMethod};
use crate::DavResult;

impl crate::DavHandler {
    pub(crate) async fn handle_options(&self, req: &Request<()>) -> DavResult<Response<Body>> {
        let mut res = Response::new(Body::empty());

        let h = res.headers_mut();

        // Locking is part of the core, so class 2 is always advertised.
        h.insert("DAV", "1, 2".parse().unwrap());
        h.insert("MS-Author-Via", "DAV".parse().unwrap());
        h.insert("Accept-Ranges", "bytes".parse().unwrap());
        h.typed_insert(headers::ContentLength(0));

        let path = self.path(req);
        let is_root = path.is_root();

        // list the allowed methods, minus the ones that never apply to
        // the root collection.
        let mut v = Vec::new();
        for m in [
            DavMethod::Options,
            DavMethod::Get,
            DavMethod::Head,
            DavMethod::Put,
            DavMethod::Delete,
            DavMethod::MkCol,
            DavMethod::Copy,
            DavMethod::Move,
            DavMethod::PropFind,
            DavMethod::PropPatch,
            DavMethod::Lock,
            DavMethod::Unlock,
        ] {
            if !self.allow.includes(m) {
                continue;
            }
            if is_root && (m == DavMethod::Delete || m == DavMethod::Move) {
                continue;
            }
            v.push(dav_method_name(m));
        }

        let a = v.join(",").parse().unwrap();
        res.headers_mut().insert("allow", a);

        Ok(res)
    }
}
