use headers::HeaderMapExt;
use http::uri::Uri;
use http::{Request, Response, StatusCode};

use crate::body::Body;
use crate::davheaders;
use crate::davpath::DavPath;
use crate::errors::DavError;
use crate::fs::NodeType;
use crate::util::DavMethod;
use crate::DavResult;

impl crate::DavHandler {
    pub(crate) async fn handle_copymove(
        &self,
        req: &Request<()>,
        method: DavMethod,
    ) -> DavResult<Response<Body>> {
        let path = self.path(req);
        let meta = self.fs.metadata(&path).await?;

        let dest = self.destination(req)?;
        if dest == path || path.is_ancestor_of(&dest) {
            // a subtree cannot land inside itself.
            return Err(StatusCode::FORBIDDEN.into());
        }

        let overwrite = req
            .headers()
            .typed_get::<davheaders::Overwrite>()
            .unwrap_or(davheaders::Overwrite(true));
        let dest_type = self.fs.node_type(&dest).await?;
        let dest_exists = dest_type != NodeType::Absent;
        if dest_exists && !overwrite.0 {
            return Err(StatusCode::PRECONDITION_FAILED.into());
        }
        if !self.has_parent(&dest).await {
            return Err(StatusCode::CONFLICT.into());
        }

        // locks on the destination side: the target itself, deep when an
        // existing collection would be replaced.
        let deep_dest = dest_type == NodeType::Collection;
        self.check_locks(req, &dest, deep_dest).await?;

        if method == DavMethod::Move {
            // and on the whole source subtree, like DELETE.
            self.check_locks(req, &path, meta.is_dir()).await?;
        }

        match method {
            DavMethod::Copy => {
                self.fs.copy(&path, &dest).await?;
            }
            _ => {
                if dest_exists {
                    // the overwritten resource is destroyed, locks go with it.
                    self.ls.delete_locks(&dest);
                }
                self.fs.rename(&path, &dest).await?;
                self.ls.move_locks(&path, &dest);
            }
        }

        let mut res = Response::new(Body::empty());
        *res.status_mut() = if dest_exists {
            StatusCode::NO_CONTENT
        } else {
            StatusCode::CREATED
        };
        Ok(res)
    }

    // The Destination header, reduced to a path on this server.
    fn destination(&self, req: &Request<()>) -> DavResult<DavPath> {
        let dest = req
            .headers()
            .typed_get::<davheaders::Destination>()
            .ok_or(DavError::Status(StatusCode::BAD_REQUEST))?;
        let uri: Uri = dest
            .0
            .parse()
            .map_err(|_| DavError::Status(StatusCode::BAD_REQUEST))?;
        if let Some(authority) = uri.authority() {
            let host = req
                .headers()
                .get("host")
                .and_then(|h| h.to_str().ok())
                .unwrap_or("");
            if !host.is_empty() && !authority.as_str().eq_ignore_ascii_case(host) {
                // no cross-server destinations.
                return Err(DavError::Status(StatusCode::BAD_REQUEST));
            }
        }
        DavPath::from_uri_and_prefix(&uri, &self.prefix)
    }
}
