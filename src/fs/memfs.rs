//! Ephemeral in-memory filesystem.
//!
//! The whole tree lives under one `parking_lot::RwLock`; reads share the
//! lock, mutations take it exclusively. The lock is never held across an
//! await point: streaming reads snapshot the content (`Bytes` clones are
//! cheap), streaming writes collect the body first and commit at the end.

use std::collections::{BTreeMap, HashMap};
use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use async_stream::stream;
use bytes::Bytes;
use futures_util::{FutureExt, StreamExt};
use http::StatusCode;
use parking_lot::RwLock;

use crate::davpath::DavPath;
use crate::fs::*;

const READ_CHUNK: usize = 65536;

/// In-memory filesystem implementation.
pub(crate) struct MemFs {
    tree: RwLock<MemNode>,
    serial: AtomicU64,
}

#[derive(Clone)]
struct MemNode {
    data: MemData,
    etag: String,
    created: SystemTime,
    modified: SystemTime,
    props: HashMap<(String, String), DavProp>,
}

#[derive(Clone)]
enum MemData {
    File(Bytes),
    Dir(BTreeMap<String, MemNode>),
}

impl MemFs {
    pub(crate) fn new() -> Arc<MemFs> {
        let fs = MemFs {
            tree: RwLock::new(MemNode::new_dir("1-0")),
            serial: AtomicU64::new(1),
        };
        Arc::new(fs)
    }

    fn new_etag(&self) -> String {
        let n = self.serial.fetch_add(1, Ordering::Relaxed);
        let t = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_micros() as u64)
            .unwrap_or(0);
        format!("{n:x}-{t:x}")
    }
}

impl MemNode {
    fn new_dir(etag: &str) -> MemNode {
        let now = SystemTime::now();
        MemNode {
            data: MemData::Dir(BTreeMap::new()),
            etag: etag.to_string(),
            created: now,
            modified: now,
            props: HashMap::new(),
        }
    }

    fn new_file(etag: &str) -> MemNode {
        let now = SystemTime::now();
        MemNode {
            data: MemData::File(Bytes::new()),
            etag: etag.to_string(),
            created: now,
            modified: now,
            props: HashMap::new(),
        }
    }

    fn is_dir(&self) -> bool {
        matches!(self.data, MemData::Dir(_))
    }

    fn len(&self) -> u64 {
        match &self.data {
            MemData::File(b) => b.len() as u64,
            MemData::Dir(_) => 0,
        }
    }

    fn meta(&self) -> NodeMeta {
        NodeMeta {
            len: self.len(),
            is_collection: self.is_dir(),
            etag: self.etag.clone(),
            created: self.created,
            modified: self.modified,
        }
    }

    fn children(&self) -> Option<&BTreeMap<String, MemNode>> {
        match &self.data {
            MemData::Dir(c) => Some(c),
            MemData::File(_) => None,
        }
    }

    fn children_mut(&mut self) -> Option<&mut BTreeMap<String, MemNode>> {
        match &mut self.data {
            MemData::Dir(c) => Some(c),
            MemData::File(_) => None,
        }
    }

    fn lookup(&self, path: &DavPath) -> Option<&MemNode> {
        let mut node = self;
        for seg in segments(path) {
            node = node.children()?.get(seg)?;
        }
        Some(node)
    }

    fn lookup_mut(&mut self, path: &DavPath) -> Option<&mut MemNode> {
        let mut node = self;
        for seg in segments(path) {
            node = node.children_mut()?.get_mut(seg)?;
        }
        Some(node)
    }

    // Children map of the parent of `path`. With `create` missing
    // intermediate collections are created on the way down.
    fn parent_children_mut(
        &mut self,
        path: &DavPath,
        create: bool,
        etag: impl Fn() -> String,
    ) -> FsResult<&mut BTreeMap<String, MemNode>> {
        let segs: Vec<&str> = segments(path).collect();
        let Some((_, parents)) = segs.split_last() else {
            return Err(FsError::Forbidden);
        };
        let mut node = self;
        for seg in parents {
            let children = node.children_mut().ok_or(FsError::NotACollection)?;
            if create && !children.contains_key(*seg) {
                children.insert(seg.to_string(), MemNode::new_dir(&etag()));
            }
            node = children.get_mut(*seg).ok_or(FsError::NotACollection)?;
        }
        node.children_mut().ok_or(FsError::NotACollection)
    }

    // Fresh identity for a copied subtree.
    fn refresh_recursive(&mut self, etag: &impl Fn() -> String) {
        self.etag = etag();
        self.created = SystemTime::now();
        if let MemData::Dir(children) = &mut self.data {
            for child in children.values_mut() {
                child.refresh_recursive(etag);
            }
        }
    }
}

fn segments(path: &DavPath) -> impl Iterator<Item = &str> {
    path.as_str().split('/').filter(|s| !s.is_empty())
}

impl DavFileSystem for MemFs {
    fn node_type<'a>(&'a self, path: &'a DavPath) -> FsFuture<'a, NodeType> {
        async move {
            let tree = self.tree.read();
            Ok(match tree.lookup(path) {
                Some(n) if n.is_dir() => NodeType::Collection,
                Some(_) => NodeType::File,
                None => NodeType::Absent,
            })
        }
        .boxed()
    }

    fn metadata<'a>(&'a self, path: &'a DavPath) -> FsFuture<'a, NodeMeta> {
        async move {
            let tree = self.tree.read();
            tree.lookup(path).map(|n| n.meta()).ok_or(FsError::NotFound)
        }
        .boxed()
    }

    fn create_collection<'a>(&'a self, path: &'a DavPath) -> FsFuture<'a, ()> {
        async move {
            trace!("FS: create_collection {path:?}");
            let mut tree = self.tree.write();
            let name = path.file_name().to_string();
            let children = tree.parent_children_mut(path, true, || self.new_etag())?;
            if children.contains_key(&name) {
                return Err(FsError::Exists);
            }
            children.insert(name, MemNode::new_dir(&self.new_etag()));
            Ok(())
        }
        .boxed()
    }

    fn remove<'a>(&'a self, path: &'a DavPath) -> FsFuture<'a, ()> {
        async move {
            trace!("FS: remove {path:?}");
            if path.is_root() {
                return Err(FsError::Forbidden);
            }
            let mut tree = self.tree.write();
            let name = path.file_name().to_string();
            let children = tree.parent_children_mut(path, false, || self.new_etag())?;
            children.remove(&name).map(|_| ()).ok_or(FsError::NotFound)
        }
        .boxed()
    }

    fn copy<'a>(&'a self, from: &'a DavPath, to: &'a DavPath) -> FsFuture<'a, ()> {
        async move {
            trace!("FS: copy {from:?} {to:?}");
            let mut tree = self.tree.write();
            let mut node = tree.lookup(from).ok_or(FsError::NotFound)?.clone();
            node.refresh_recursive(&|| self.new_etag());
            let name = to.file_name().to_string();
            let children = tree.parent_children_mut(to, false, || self.new_etag())?;
            children.insert(name, node);
            Ok(())
        }
        .boxed()
    }

    fn rename<'a>(&'a self, from: &'a DavPath, to: &'a DavPath) -> FsFuture<'a, ()> {
        async move {
            trace!("FS: rename {from:?} {to:?}");
            // both halves under one write guard, so readers never observe
            // the tree with the subtree missing from both places.
            let mut tree = self.tree.write();
            let from_name = from.file_name().to_string();
            let node = {
                let children = tree.parent_children_mut(from, false, || self.new_etag())?;
                children.remove(&from_name).ok_or(FsError::NotFound)?
            };
            let to_name = to.file_name().to_string();
            match tree.parent_children_mut(to, false, || self.new_etag()) {
                Ok(children) => {
                    children.insert(to_name, node);
                    Ok(())
                }
                Err(e) => {
                    // put it back, the destination parent was bad.
                    let children = tree
                        .parent_children_mut(from, false, || self.new_etag())
                        .expect("source parent vanished");
                    children.insert(from_name, node);
                    Err(e)
                }
            }
        }
        .boxed()
    }

    fn members<'a>(&'a self, path: &'a DavPath) -> FsFuture<'a, Vec<String>> {
        async move {
            let tree = self.tree.read();
            let node = tree.lookup(path).ok_or(FsError::NotFound)?;
            let children = node.children().ok_or(FsError::NotACollection)?;
            Ok(children.keys().cloned().collect())
        }
        .boxed()
    }

    fn read_stream<'a>(
        &'a self,
        path: &'a DavPath,
        range: Option<ByteRange>,
    ) -> FsFuture<'a, BytesStream> {
        async move {
            let content = {
                let tree = self.tree.read();
                let node = tree.lookup(path).ok_or(FsError::NotFound)?;
                match &node.data {
                    MemData::File(b) => b.clone(),
                    MemData::Dir(_) => return Err(FsError::Forbidden),
                }
            };
            let slice = match range {
                Some(r) => {
                    let start = (r.start as usize).min(content.len());
                    let end = ((r.end + 1) as usize).min(content.len());
                    content.slice(start..end)
                }
                None => content,
            };
            Ok(Box::pin(stream! {
                let mut off = 0;
                while off < slice.len() {
                    let end = (off + READ_CHUNK).min(slice.len());
                    yield Ok::<_, io::Error>(slice.slice(off..end));
                    off = end;
                }
            }) as BytesStream)
        }
        .boxed()
    }

    fn write_stream<'a>(
        &'a self,
        path: &'a DavPath,
        mut body: BytesStream,
        range: Option<WriteRange>,
    ) -> FsFuture<'a, NodeMeta> {
        async move {
            trace!("FS: write_stream {path:?} range {range:?}");
            // collect first, commit under the write guard. An aborted or
            // timed out body never mutates the tree.
            let mut data: Vec<u8> = Vec::new();
            while let Some(chunk) = body.next().await {
                let chunk = chunk.map_err(|e| match e.kind() {
                    io::ErrorKind::TimedOut => FsError::Timeout,
                    _ => FsError::GeneralFailure,
                })?;
                data.extend_from_slice(&chunk);
            }

            let mut tree = self.tree.write();
            let name = path.file_name().to_string();
            let children = tree.parent_children_mut(path, true, || self.new_etag())?;
            let node = children
                .entry(name)
                .or_insert_with(|| MemNode::new_file(&self.new_etag()));
            let content = match &mut node.data {
                MemData::File(b) => b,
                MemData::Dir(_) => return Err(FsError::Exists),
            };

            match range {
                None => *content = Bytes::from(data),
                Some(r) => {
                    let mut buf = content.to_vec();
                    let window = (r.end - r.start + 1) as usize;
                    data.truncate(window);
                    let mut new_len = (r.start as usize) + window;
                    if let Some(total) = r.total {
                        new_len = new_len.max(total as usize);
                    }
                    new_len = new_len.max(buf.len());
                    buf.resize(new_len, 0);
                    buf[r.start as usize..r.start as usize + data.len()]
                        .copy_from_slice(&data);
                    *content = Bytes::from(buf);
                }
            }
            node.modified = SystemTime::now();
            node.etag = self.new_etag();
            Ok(node.meta())
        }
        .boxed()
    }

    fn get_prop<'a>(&'a self, path: &'a DavPath, prop: DavProp) -> FsFuture<'a, Vec<u8>> {
        async move {
            let tree = self.tree.read();
            let node = tree.lookup(path).ok_or(FsError::NotFound)?;
            node.props
                .get(&prop.key())
                .and_then(|p| p.xml.clone())
                .ok_or(FsError::NotFound)
        }
        .boxed()
    }

    fn get_props<'a>(
        &'a self,
        path: &'a DavPath,
        do_content: bool,
    ) -> FsFuture<'a, Vec<DavProp>> {
        async move {
            let tree = self.tree.read();
            let node = tree.lookup(path).ok_or(FsError::NotFound)?;
            let mut props: Vec<DavProp> = node
                .props
                .values()
                .map(|p| {
                    let mut p = p.clone();
                    if !do_content {
                        p.xml = None;
                    }
                    p
                })
                .collect();
            props.sort_by(|a, b| a.name.cmp(&b.name));
            Ok(props)
        }
        .boxed()
    }

    fn patch_props<'a>(
        &'a self,
        path: &'a DavPath,
        set: Vec<DavProp>,
        remove: Vec<DavProp>,
    ) -> FsFuture<'a, Vec<(StatusCode, DavProp)>> {
        async move {
            let mut tree = self.tree.write();
            let node = tree.lookup_mut(path).ok_or(FsError::NotFound)?;
            // all updates land in one critical section, so the patch is
            // atomic as observed through get_prop/get_props.
            let mut ret = Vec::new();
            for p in set {
                node.props.insert(p.key(), p.clone());
                ret.push((StatusCode::OK, strip_xml(p)));
            }
            for p in remove {
                // removing a property that is not there is a no-op success.
                node.props.remove(&p.key());
                ret.push((StatusCode::OK, strip_xml(p)));
            }
            Ok(ret)
        }
        .boxed()
    }
}

fn strip_xml(mut p: DavProp) -> DavProp {
    p.xml = None;
    p
}
