use std::io;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug)]
pub enum Error {
    IoError(io::Error),
    /// A page-level operation failed inside the paged store.
    PageIo(&'static str, io::Error),
    /// Key encoding is variable-length or too wide for a signed 64-bit ordinal domain.
    UnsupportedDomain(String),
    /// More than one key field was configured.
    CompositeKeyUnsupported(usize),
    /// A page operation was attempted on a file that is not activated.
    NotActivated(String),
    /// A tuple arrived with a position lower than the previous one.
    OutOfOrderInput {
        previous: i64,
        current: i64,
    },
    ChecksumMismatch,
    MutexPoisoned,
    InvalidState(String),
    InvalidData(String),
    InvalidOperation(String),
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error::IoError(err)
    }
}

impl<T> From<std::sync::PoisonError<T>> for Error {
    fn from(_: std::sync::PoisonError<T>) -> Self {
        Error::MutexPoisoned
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::IoError(err) => write!(f, "I/O error: {}", err),
            Error::PageIo(context, err) => write!(f, "Page I/O failed during {}: {}", context, err),
            Error::UnsupportedDomain(msg) => write!(f, "Unsupported key domain: {}", msg),
            Error::CompositeKeyUnsupported(n) => {
                write!(f, "Unable to collect statistics on composite keys ({} fields)", n)
            }
            Error::NotActivated(name) => write!(f, "File {} is not activated", name),
            Error::OutOfOrderInput { previous, current } => write!(
                f,
                "Out of order input: position {} arrived after {}",
                current, previous
            ),
            Error::ChecksumMismatch => write!(f, "Checksum mismatch"),
            Error::MutexPoisoned => write!(f, "Mutex was poisoned"),
            Error::InvalidState(msg) => write!(f, "Invalid state: {}", msg),
            Error::InvalidData(msg) => write!(f, "Invalid data: {}", msg),
            Error::InvalidOperation(msg) => write!(f, "Invalid operation: {}", msg),
        }
    }
}

impl std::error::Error for Error {}
