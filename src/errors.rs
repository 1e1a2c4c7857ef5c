//
// Errors.
//
use std::error::Error;
use std::fmt;
use std::io;

use http::StatusCode;

use crate::fs::FsError;

pub(crate) type DavResult<T> = Result<T, DavError>;

/// Error returned by the method handlers, mapped onto a HTTP
/// status code by the dispatcher.
#[derive(Debug)]
pub(crate) enum DavError {
    XmlParseError,
    InvalidPath,
    UnknownDavMethod,
    /// Stream-lock contention. Mapped to 503 plus a `Retry-After` header.
    Busy,
    Status(StatusCode),
    StatusClose(StatusCode),
    FsError(FsError),
    IoError(io::Error),
}

impl DavError {
    pub(crate) fn statuscode(&self) -> StatusCode {
        match self {
            DavError::XmlParseError => StatusCode::BAD_REQUEST,
            DavError::InvalidPath => StatusCode::BAD_REQUEST,
            DavError::UnknownDavMethod => StatusCode::METHOD_NOT_ALLOWED,
            DavError::Busy => StatusCode::SERVICE_UNAVAILABLE,
            DavError::Status(s) => *s,
            DavError::StatusClose(s) => *s,
            DavError::FsError(e) => fserror_to_status(*e),
            DavError::IoError(e) if e.kind() == io::ErrorKind::TimedOut => {
                StatusCode::REQUEST_TIMEOUT
            }
            DavError::IoError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    // A request that failed halfway through reading or writing a body
    // leaves the connection in an undefined state.
    pub(crate) fn must_close(&self) -> bool {
        matches!(
            self,
            DavError::StatusClose(_) | DavError::IoError(_) | DavError::UnknownDavMethod
        )
    }

    /// Seconds the client should back off, for errors that warrant it.
    pub(crate) fn retry_after(&self) -> Option<u32> {
        match self {
            DavError::Busy => Some(1),
            _ => None,
        }
    }
}

pub(crate) fn fserror_to_status(e: FsError) -> StatusCode {
    match e {
        FsError::NotFound => StatusCode::NOT_FOUND,
        FsError::Exists => StatusCode::METHOD_NOT_ALLOWED,
        FsError::Forbidden => StatusCode::FORBIDDEN,
        FsError::NotACollection => StatusCode::CONFLICT,
        FsError::Timeout => StatusCode::REQUEST_TIMEOUT,
        FsError::GeneralFailure => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl fmt::Display for DavError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DavError::XmlParseError => write!(f, "XML parse error"),
            DavError::InvalidPath => write!(f, "invalid path"),
            DavError::UnknownDavMethod => write!(f, "unknown DAV method"),
            DavError::Busy => write!(f, "resource busy"),
            DavError::Status(s) => write!(f, "{s}"),
            DavError::StatusClose(s) => write!(f, "{s}"),
            DavError::FsError(e) => write!(f, "{e:?}"),
            DavError::IoError(e) => write!(f, "{e}"),
        }
    }
}

impl Error for DavError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            DavError::IoError(e) => Some(e),
            _ => None,
        }
    }
}

impl From<StatusCode> for DavError {
    fn from(s: StatusCode) -> Self {
        DavError::Status(s)
    }
}

impl From<FsError> for DavError {
    fn from(e: FsError) -> Self {
        DavError::FsError(e)
    }
}

impl From<io::Error> for DavError {
    fn from(e: io::Error) -> Self {
        DavError::IoError(e)
    }
}

impl From<xml::writer::Error> for DavError {
    fn from(e: xml::writer::Error) -> Self {
        // emitting to memory does not fail in practice.
        DavError::IoError(io::Error::new(io::ErrorKind::Other, format!("{e:?}")))
    }
}

impl From<xmltree::ParseError> for DavError {
    fn from(_: xmltree::ParseError) -> Self {
        DavError::XmlParseError
    }
}
