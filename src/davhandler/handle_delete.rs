use http::{Request, Response, StatusCode};

use crate::body::Body;
use crate::DavResult;

impl crate::DavHandler {
    pub(crate) async fn handle_delete(&self, req: &Request<()>) -> DavResult<Response<Body>> {
        let path = self.path(req);

        if path.is_root() {
            return Err(StatusCode::FORBIDDEN.into());
        }
        // 404 before 423: the client learns nothing it couldn't probe.
        let meta = self.fs.metadata(&path).await?;

        // every lock on the target and, for a collection, anywhere in the
        // subtree must be satisfied or the whole delete fails.
        self.check_locks(req, &path, meta.is_dir()).await?;

        self.fs.remove(&path).await?;
        self.ls.delete_locks(&path);

        let mut res = Response::new(Body::empty());
        *res.status_mut() = StatusCode::NO_CONTENT;
        Ok(res)
    }
}
