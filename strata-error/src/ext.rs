use crate::StrataResult;

/// Extension trait for StrataResult
pub trait ResultExt<T>: private::Sealed {
    /// Flatten a nested [`StrataResult`]. Helper function until <https://github.com/rust-lang/rust/issues/70142> is stabilized.
    fn flatten(self) -> StrataResult<T>;
}

mod private {
    use crate::StrataResult;

    pub trait Sealed {}

    impl<T> Sealed for StrataResult<StrataResult<T>> {}
}

impl<T> ResultExt<T> for StrataResult<StrataResult<T>> {
    fn flatten(self) -> StrataResult<T> {
        match self {
            Ok(Ok(v)) => Ok(v),
            Ok(Err(e)) | Err(e) => Err(e),
        }
    }
}

/// Extension trait for ignoring a "not found" error, used where removing something that is
/// already gone counts as success.
pub trait IgnoreNotFound {
    /// Turn a not-found error into success.
    fn ignore_not_found(self) -> StrataResult<()>;
}

impl IgnoreNotFound for StrataResult<()> {
    fn ignore_not_found(self) -> StrataResult<()> {
        match self {
            Err(err) if err.is_not_found() => Ok(()),
            other => other,
        }
    }
}
