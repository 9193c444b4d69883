use std::{fmt, io, path::PathBuf};

/// Errors returned while parsing or querying a devicetree.
#[derive(Debug)]
pub enum Error {
    /// The top-level source file could not be read.
    Io { path: PathBuf, source: io::Error },
    /// Any parse, validation, lookup or conversion failure.
    ///
    /// Parse errors are prefixed with `file:line (column N): parse error:`.
    Devicetree(String),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

impl Error {
    pub(crate) fn msg(msg: impl Into<String>) -> Self {
        Error::Devicetree(msg.into())
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Io { path, source } => write!(f, "{}: {source}", path.display()),
            Error::Devicetree(msg) => f.write_str(msg),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io { source, .. } => Some(source),
            Error::Devicetree(_) => None,
        }
    }
}

/// Bails out of the current function with a [`Error::Devicetree`].
macro_rules! bail {
    ($($arg:tt)*) => {
        return Err($crate::error::Error::msg(format!($($arg)*)))
    };
}

pub(crate) use bail;
