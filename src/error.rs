use std::fmt;

use crate::media::BitstreamFormat;

#[derive(Debug)]
pub enum RouteError {
    NoSuchApplication(String),
    NoSuchStream(String),
    DuplicateConnector(String),
    UnauthorizedConnector(String),
    StreamNotReady(String),
    StreamRejected(String),
    UnsupportedConversion {
        from: BitstreamFormat,
        to: BitstreamFormat,
    },
    MalformedBitstream(String),
    PullTimeout(String),
    PullUnsupportedScheme(String),
    AlreadyAttached(String),
    InvalidPosition(String),
    InternalError(anyhow::Error),
}

impl RouteError {
    pub fn no_such_application<T>(t: T) -> Self
    where
        T: ToString,
    {
        RouteError::NoSuchApplication(t.to_string())
    }

    pub fn no_such_stream<T>(t: T) -> Self
    where
        T: ToString,
    {
        RouteError::NoSuchStream(t.to_string())
    }

    pub fn duplicate_connector<T>(t: T) -> Self
    where
        T: ToString,
    {
        RouteError::DuplicateConnector(t.to_string())
    }

    pub fn unauthorized_connector<T>(t: T) -> Self
    where
        T: ToString,
    {
        RouteError::UnauthorizedConnector(t.to_string())
    }

    pub fn stream_not_ready<T>(t: T) -> Self
    where
        T: ToString,
    {
        RouteError::StreamNotReady(t.to_string())
    }

    pub fn stream_rejected<T>(t: T) -> Self
    where
        T: ToString,
    {
        RouteError::StreamRejected(t.to_string())
    }

    pub fn malformed_bitstream<T>(t: T) -> Self
    where
        T: ToString,
    {
        RouteError::MalformedBitstream(t.to_string())
    }

    pub fn pull_timeout<T>(t: T) -> Self
    where
        T: ToString,
    {
        RouteError::PullTimeout(t.to_string())
    }

    pub fn pull_unsupported_scheme<T>(t: T) -> Self
    where
        T: ToString,
    {
        RouteError::PullUnsupportedScheme(t.to_string())
    }

    pub fn already_attached<T>(t: T) -> Self
    where
        T: ToString,
    {
        RouteError::AlreadyAttached(t.to_string())
    }

    pub fn invalid_position<T>(t: T) -> Self
    where
        T: ToString,
    {
        RouteError::InvalidPosition(t.to_string())
    }
}

impl fmt::Display for RouteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RouteError::NoSuchApplication(err) => write!(f, "no such application: {}", err),
            RouteError::NoSuchStream(err) => write!(f, "no such stream: {}", err),
            RouteError::DuplicateConnector(err) => write!(f, "duplicate connector: {}", err),
            RouteError::UnauthorizedConnector(err) => {
                write!(f, "unauthorized connector: {}", err)
            }
            RouteError::StreamNotReady(err) => write!(f, "stream not ready: {}", err),
            RouteError::StreamRejected(err) => write!(f, "stream rejected: {}", err),
            RouteError::UnsupportedConversion { from, to } => {
                write!(f, "unsupported conversion: {:?} -> {:?}", from, to)
            }
            RouteError::MalformedBitstream(err) => write!(f, "malformed bitstream: {}", err),
            RouteError::PullTimeout(err) => write!(f, "pull timed out: {}", err),
            RouteError::PullUnsupportedScheme(err) => {
                write!(f, "no provider for pull scheme: {}", err)
            }
            RouteError::AlreadyAttached(err) => write!(f, "tap already attached: {}", err),
            RouteError::InvalidPosition(err) => write!(f, "invalid mirror position: {}", err),
            RouteError::InternalError(err) => write!(f, "internal error: {}", err),
        }
    }
}

impl<E> From<E> for RouteError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        RouteError::InternalError(err.into())
    }
}
