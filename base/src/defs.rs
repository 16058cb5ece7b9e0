use std::error::Error as StdError;
use std::fmt;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ErrorKind {
    GpuError,
    InconsistentState,
    IoError,
    MalformedData,
    UnsupportedFeature,
}

#[derive(Debug)]
pub struct Error {
    pub kind: ErrorKind,
    pub description: String,
    pub source: Option<Box<dyn StdError + Send + Sync>>,
}

impl Error {
    pub fn new(kind: ErrorKind, description: String) -> Error {
        Error {
            kind,
            description,
            source: None,
        }
    }

    pub fn with_source<E: StdError + Send + Sync + 'static>(
        kind: ErrorKind,
        description: String,
        source: E,
    ) -> Error {
        Error {
            kind,
            description,
            source: Some(Box::new(source)),
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.source {
            Some(source) => {
                write!(f, "{}: {}", self.description, source)
            }
            None => write!(f, "{}", self.description),
        }
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.source
            .as_ref()
            .map(|e| e.as_ref() as &(dyn StdError + 'static))
    }
}

pub type Result<T> = std::result::Result<T, Error>;

pub trait IntoResult<T> {
    fn res<D: FnOnce() -> String>(self, describe: D) -> Result<T>;
}

impl<T, E: StdError + Send + Sync + 'static> IntoResult<T>
    for std::result::Result<T, E>
{
    fn res<D: FnOnce() -> String>(self, describe: D) -> Result<T> {
        self.map_err(|e| {
            Error::with_source(ErrorKind::IoError, describe(), e)
        })
    }
}
