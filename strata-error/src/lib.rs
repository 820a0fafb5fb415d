#![deny(missing_docs)]

//! Error handling for the Strata lake engine.
//!
//! Every fallible operation returns [`StrataResult`]. Errors carry a coarse [`ErrorKind`] so
//! callers can react to "this chunk vanished" or "this pool already exists" without matching on
//! message text.

mod ext;

use std::borrow::Cow;
use std::fmt::{Debug, Display, Formatter};
use std::ops::Deref;
use std::{fmt, io};

pub use ext::*;

/// A string that can be used as an error message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrString(Cow<'static, str>);

impl<T> From<T> for ErrString
where
    T: Into<Cow<'static, str>>,
{
    fn from(msg: T) -> Self {
        Self(msg.into())
    }
}

impl AsRef<str> for ErrString {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Deref for ErrString {
    type Target = str;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl Display for ErrString {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Display::fmt(&self.0, f)
    }
}

/// The classification of a [`StrataError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Caller misuse: a bad plan, a bad URI or a bad argument.
    Invalid,
    /// A URI or id does not exist.
    NotFound,
    /// A resource with the requested id already exists.
    Exists,
    /// The operation was blocked by concurrent state.
    Conflict,
    /// On-disk bytes violate a format invariant.
    Corruption,
    /// The query was cancelled from the top.
    Cancelled,
    /// The source does not implement the requested method.
    NotSupported,
    /// Anything else.
    Internal,
}

impl Display for ErrorKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::Invalid => "invalid",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Exists => "exists",
            ErrorKind::Conflict => "conflict",
            ErrorKind::Corruption => "corruption",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::NotSupported => "not_supported",
            ErrorKind::Internal => "internal",
        };
        f.write_str(name)
    }
}

/// The top-level error type for Strata.
#[derive(thiserror::Error)]
#[non_exhaustive]
pub enum StrataError {
    /// Caller misuse.
    #[error("{0}")]
    Invalid(ErrString),
    /// A URI or id does not exist.
    #[error("{0}")]
    NotFound(ErrString),
    /// A resource with the requested id already exists.
    #[error("{0}")]
    Exists(ErrString),
    /// Blocked by concurrent state.
    #[error("{0}")]
    Conflict(ErrString),
    /// On-disk bytes violate a format invariant.
    #[error("{0}")]
    Corruption(ErrString),
    /// The query was cancelled.
    #[error("{0}")]
    Cancelled(ErrString),
    /// The method is not supported by this source.
    #[error("{0}")]
    NotSupported(ErrString),
    /// An unclassified runtime failure.
    #[error("{0}")]
    Internal(ErrString),
    /// A wrapper for other errors, carrying additional context.
    #[error("{0}: {1}")]
    Context(ErrString, #[source] Box<StrataError>),
    /// A wrapper for IO errors.
    #[error(transparent)]
    Io(#[from] io::Error),
    /// A wrapper for object store errors.
    #[error(transparent)]
    ObjectStore(#[from] object_store::Error),
    /// A wrapper for JSON errors.
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    /// A wrapper for URL parsing errors.
    #[error(transparent)]
    Url(#[from] url::ParseError),
    /// A wrapper for jiff time errors.
    #[error(transparent)]
    Jiff(#[from] jiff::Error),
}

impl StrataError {
    /// Adds additional context to an error.
    pub fn with_context<T: Into<ErrString>>(self, msg: T) -> Self {
        StrataError::Context(msg.into(), Box::new(self))
    }

    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            StrataError::Invalid(_) | StrataError::Url(_) => ErrorKind::Invalid,
            StrataError::NotFound(_) => ErrorKind::NotFound,
            StrataError::Exists(_) => ErrorKind::Exists,
            StrataError::Conflict(_) => ErrorKind::Conflict,
            StrataError::Corruption(_) | StrataError::Json(_) => ErrorKind::Corruption,
            StrataError::Cancelled(_) => ErrorKind::Cancelled,
            StrataError::NotSupported(_) => ErrorKind::NotSupported,
            StrataError::Internal(_) | StrataError::Jiff(_) => ErrorKind::Internal,
            StrataError::Context(_, inner) => inner.kind(),
            StrataError::Io(err) => match err.kind() {
                io::ErrorKind::Other => err
                    .get_ref()
                    .and_then(|inner| inner.downcast_ref::<StrataError>())
                    .map_or(ErrorKind::Internal, StrataError::kind),
                io::ErrorKind::NotFound => ErrorKind::NotFound,
                io::ErrorKind::AlreadyExists => ErrorKind::Exists,
                io::ErrorKind::InvalidInput => ErrorKind::Invalid,
                io::ErrorKind::InvalidData | io::ErrorKind::UnexpectedEof => {
                    ErrorKind::Corruption
                }
                io::ErrorKind::Unsupported => ErrorKind::NotSupported,
                _ => ErrorKind::Internal,
            },
            StrataError::ObjectStore(err) => match err {
                object_store::Error::NotFound { .. } => ErrorKind::NotFound,
                object_store::Error::AlreadyExists { .. } => ErrorKind::Exists,
                object_store::Error::Precondition { .. } => ErrorKind::Conflict,
                object_store::Error::NotSupported { .. }
                | object_store::Error::NotImplemented => ErrorKind::NotSupported,
                _ => ErrorKind::Internal,
            },
        }
    }

    /// Returns true if this error says that the target does not exist.
    pub fn is_not_found(&self) -> bool {
        self.kind() == ErrorKind::NotFound
    }

    /// Returns true if this error is the result of cancellation.
    pub fn is_cancelled(&self) -> bool {
        self.kind() == ErrorKind::Cancelled
    }

    #[doc(hidden)]
    pub fn new(kind: ErrorKind, msg: impl Into<ErrString>) -> Self {
        let msg = msg.into();
        match kind {
            ErrorKind::Invalid => StrataError::Invalid(msg),
            ErrorKind::NotFound => StrataError::NotFound(msg),
            ErrorKind::Exists => StrataError::Exists(msg),
            ErrorKind::Conflict => StrataError::Conflict(msg),
            ErrorKind::Corruption => StrataError::Corruption(msg),
            ErrorKind::Cancelled => StrataError::Cancelled(msg),
            ErrorKind::NotSupported => StrataError::NotSupported(msg),
            ErrorKind::Internal => StrataError::Internal(msg),
        }
    }
}

impl Debug for StrataError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind(), self)
    }
}

/// A type alias for Results that return StrataErrors as their error type.
pub type StrataResult<T> = Result<T, StrataError>;

/// A trait for unwrapping a StrataResult.
pub trait StrataUnwrap {
    /// The type of the value being unwrapped.
    type Output;

    /// Returns the value of the result if it is Ok, otherwise panics with the error.
    /// Should be called only in contexts where the error condition represents a bug (programmer error).
    fn strata_unwrap(self) -> Self::Output;
}

impl<T, E> StrataUnwrap for Result<T, E>
where
    E: Into<StrataError>,
{
    type Output = T;

    #[inline(always)]
    fn strata_unwrap(self) -> Self::Output {
        self.map_err(|err| err.into())
            .unwrap_or_else(|err| strata_panic!(err))
    }
}

/// A trait for expect-ing a StrataResult or an Option.
pub trait StrataExpect {
    /// The type of the value being expected.
    type Output;

    /// Returns the value of the result if it is Ok, otherwise panics with the error.
    /// Should be called only in contexts where the error condition represents a bug (programmer error).
    fn strata_expect(self, msg: &str) -> Self::Output;
}

impl<T, E> StrataExpect for Result<T, E>
where
    E: Into<StrataError>,
{
    type Output = T;

    #[inline(always)]
    fn strata_expect(self, msg: &str) -> Self::Output {
        self.map_err(|err| err.into())
            .unwrap_or_else(|e| strata_panic!(e.with_context(msg.to_string())))
    }
}

impl<T> StrataExpect for Option<T> {
    type Output = T;

    #[inline(always)]
    fn strata_expect(self, msg: &str) -> Self::Output {
        self.unwrap_or_else(|| {
            let err = StrataError::Internal(msg.to_string().into());
            strata_panic!(err)
        })
    }
}

/// Extension for attaching context to a fallible result.
pub trait WithContext<T> {
    /// Wrap the error, if any, with a message.
    fn with_context<M: Into<ErrString>, F: FnOnce() -> M>(self, msg: F) -> StrataResult<T>;
}

impl<T, E: Into<StrataError>> WithContext<T> for Result<T, E> {
    fn with_context<M: Into<ErrString>, F: FnOnce() -> M>(self, msg: F) -> StrataResult<T> {
        self.map_err(|e| e.into().with_context(msg()))
    }
}

/// A convenient macro for creating a [`StrataError`].
///
/// The kind prefix is optional and defaults to `Internal`:
///
/// ```
/// use strata_error::{strata_err, ErrorKind};
/// let err = strata_err!(NotFound: "no such pool {}", "logs");
/// assert_eq!(err.kind(), ErrorKind::NotFound);
/// assert_eq!(err.to_string(), "no such pool logs");
/// ```
#[macro_export]
macro_rules! strata_err {
    (Invalid: $($tts:tt)*) => {
        $crate::StrataError::new($crate::ErrorKind::Invalid, format!($($tts)*))
    };
    (NotFound: $($tts:tt)*) => {
        $crate::StrataError::new($crate::ErrorKind::NotFound, format!($($tts)*))
    };
    (Exists: $($tts:tt)*) => {
        $crate::StrataError::new($crate::ErrorKind::Exists, format!($($tts)*))
    };
    (Conflict: $($tts:tt)*) => {
        $crate::StrataError::new($crate::ErrorKind::Conflict, format!($($tts)*))
    };
    (Corruption: $($tts:tt)*) => {
        $crate::StrataError::new($crate::ErrorKind::Corruption, format!($($tts)*))
    };
    (Cancelled: $($tts:tt)*) => {
        $crate::StrataError::new($crate::ErrorKind::Cancelled, format!($($tts)*))
    };
    (NotSupported: $($tts:tt)*) => {
        $crate::StrataError::new($crate::ErrorKind::NotSupported, format!($($tts)*))
    };
    (Context: $msg:literal, $err:expr) => {
        $crate::StrataError::with_context($err, $msg)
    };
    ($($tts:tt)*) => {
        $crate::StrataError::new($crate::ErrorKind::Internal, format!($($tts)*))
    };
}

/// A convenient macro for returning a [`StrataError`].
#[macro_export]
macro_rules! strata_bail {
    ($($tt:tt)+) => {
        return Err($crate::strata_err!($($tt)+))
    };
}

/// A convenient macro for panicking with a [`StrataError`] in the presence of a programmer error
/// (e.g., an invariant has been violated).
#[macro_export]
macro_rules! strata_panic {
    ($fmt:literal $(, $arg:expr)* $(,)?) => {
        $crate::strata_panic!($crate::strata_err!($fmt, $($arg),*))
    };
    ($err:expr) => {{
        #[allow(clippy::panic)]
        {
            let err: $crate::StrataError = $err;
            panic!("{}", err)
        }
    }};
}

#[cfg(test)]
mod tests {
    use std::io;

    use super::*;

    #[test]
    fn kind_follows_context() {
        let err = strata_err!(Corruption: "bad frame at {}", 12).with_context("reading chunk");
        assert_eq!(err.kind(), ErrorKind::Corruption);
        assert_eq!(err.to_string(), "reading chunk: bad frame at 12");
    }

    #[test]
    fn io_not_found_is_not_found() {
        let err: StrataError = io::Error::new(io::ErrorKind::NotFound, "gone").into();
        assert!(err.is_not_found());
    }

    #[test]
    fn bail_returns_error() {
        fn inner() -> StrataResult<()> {
            strata_bail!(Exists: "pool {} exists", "p");
        }
        let err = inner().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Exists);
    }

    #[test]
    fn default_kind_is_internal() {
        assert_eq!(strata_err!("boom").kind(), ErrorKind::Internal);
    }
}
