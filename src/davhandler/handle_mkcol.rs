use http::{Request, Response, StatusCode};

use crate::body::Body;
use crate::fs::NodeType;
use crate::DavResult;

impl crate::DavHandler {
    pub(crate) async fn handle_mkcol(&self, req: &Request<()>) -> DavResult<Response<Body>> {
        let path = self.path(req);

        match self.fs.node_type(&path).await? {
            NodeType::Absent => {}
            // MKCOL on a mapped url.
            _ => return Err(StatusCode::METHOD_NOT_ALLOWED.into()),
        }
        if !self.has_parent(&path).await {
            return Err(StatusCode::CONFLICT.into());
        }

        // a lock on the parent (or an ancestor, deep) guards creation.
        self.check_locks(req, &path, false).await?;

        self.fs.create_collection(&path).await?;

        let mut res = Response::new(Body::empty());
        *res.status_mut() = StatusCode::CREATED;
        Ok(res)
    }
}
