use std::io;

pub use courier_shared::error::{Error, ErrorCode, Result, StorageError, SystemError};

/// Map a filesystem failure while reading the store file.
pub(crate) fn read_error(e: &io::Error) -> Error {
    match e.kind() {
        io::ErrorKind::NotFound => SystemError::FileNotExists.into(),
        io::ErrorKind::InvalidData | io::ErrorKind::UnexpectedEof => SystemError::ReadFileFail.into(),
        _ => SystemError::OpenFileFail.into(),
    }
}

/// Map a filesystem failure while writing the store file.
pub(crate) fn write_error(e: &io::Error) -> Error {
    match e.kind() {
        io::ErrorKind::NotFound => SystemError::DirNotExists.into(),
        io::ErrorKind::PermissionDenied => SystemError::OpenFileFail.into(),
        _ => SystemError::OutputOperationFail.into(),
    }
}
