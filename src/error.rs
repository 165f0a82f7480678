use std::fmt;

#[derive(Debug)]
pub enum Error {
    Io(std::io::Error),
    Corrupt(&'static str),
    NoEncoder(&'static str),
    NoDecoder(u64),
    MissingDecoder(u64),
    InvalidArgument(&'static str),
    TailFailure {
        tail: String,
        source: Box<dyn std::error::Error + Send + Sync>,
    },
    Closed,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Io(err) => write!(f, "io error: {err}"),
            Error::Corrupt(msg) => write!(f, "corrupt data: {msg}"),
            Error::NoEncoder(type_name) => write!(f, "no encoder registered for {type_name}"),
            Error::NoDecoder(tag) => write!(f, "no decoder registered for type tag {tag}"),
            Error::MissingDecoder(tag) => write!(f, "missing decoder for type tag {tag}"),
            Error::InvalidArgument(msg) => write!(f, "invalid argument: {msg}"),
            Error::TailFailure { tail, source } => write!(f, "tail '{tail}' failed: {source}"),
            Error::Closed => write!(f, "log buffer is closed"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(err) => Some(err),
            Error::TailFailure { source, .. } => Some(&**source),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(value: std::io::Error) -> Self {
        Error::Io(value)
    }
}

pub type Result<T> = std::result::Result<T, Error>;
