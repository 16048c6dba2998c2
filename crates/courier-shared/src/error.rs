//! Error taxonomy shared by every courier component.
//!
//! Each concern owns a closed `#[repr(i32)]` enumeration whose `Display`
//! text doubles as its message table.  The numeric spaces never overlap, so
//! an [`ErrorCode`] can travel as a plain `(category, value)` pair and still
//! be turned back into the typed error on the other side.

use std::fmt;

use thiserror::Error;

/// Value shared by every category for "no error".
pub const SUCCESS_CODE: i32 = 0;

const SUCCESS_TEXT: &str = "Operation completed successfully";

const SYSTEM_BASE: i32 = 0x1000;
const STORAGE_BASE: i32 = 0x2000;
const NET_BASE: i32 = 0x3000;

/// Declares a concern enum with sequential codes starting at `$base`,
/// plus the lookup helpers every category needs.
macro_rules! error_codes {
    (
        $(#[$meta:meta])*
        $vis:vis enum $name:ident = $base:expr;
        $first:ident => $first_msg:tt,
        $($variant:ident => $msg:tt,)*
    ) => {
        $(#[$meta])*
        #[derive(Error, Debug, Clone, Copy, PartialEq, Eq, Hash)]
        #[repr(i32)]
        $vis enum $name {
            #[error($first_msg)]
            $first = $base,
            $(
                #[error($msg)]
                $variant,
            )*
        }

        impl $name {
            /// Every defined code, in declaration order.
            pub const ALL: &'static [$name] = &[$name::$first, $($name::$variant,)*];

            /// Numeric value of this code.
            pub fn code(self) -> i32 {
                self as i32
            }

            /// Reverse lookup; `None` for success and unknown values.
            pub fn from_code(code: i32) -> Option<Self> {
                Self::ALL.iter().copied().find(|e| e.code() == code)
            }
        }
    };
}

// ---------------------------------------------------------------------------
// System errors
// ---------------------------------------------------------------------------

error_codes! {
    /// General errors not tied to a particular subsystem.
    pub enum SystemError = SYSTEM_BASE;
    InvalidArgument => "Invalid argument",
    IncorrectVersion => "Incorrect version",
    IncorrectData => "Incorrect data",
    OperationNotSupported => "Operation not supported",
    InputOperationFail => "Input operation failed",
    OutputOperationFail => "Output operation failed",
    FileNotExists => "File does not exist",
    DirNotExists => "Directory does not exist",
    ObjectNotFile => "Object is not a file",
    ObjectNotDir => "Object is not a directory",
    FileNotOpen => "File is not open",
    OpenFileFail => "Failed to open file",
    ReadFileFail => "Failed to read file",
    ContainerEmpty => "Container is empty",
    NotInContainer => "Object is not in the container",
    AlreadyInContainer => "Object is already in the container",
    IndexOutOfRange => "Index is out of the container range",
}

// ---------------------------------------------------------------------------
// Storage errors
// ---------------------------------------------------------------------------

error_codes! {
    /// Errors reported by storage backends.
    pub enum StorageError = STORAGE_BASE;
    NotOpen => "Storage is not open",
    // users
    UserUUIDAlreadyRegistered => "A user with this UUID is already registered",
    UserLoginAlreadyRegistered => "A user with this login is already registered",
    UserPasswordIncorrect => "Incorrect user password",
    UserNotExists => "User does not exist",
    UserAlreadyExists => "User already exists",
    UserUUIDCorrupted => "User UUID is corrupted",
    UserRegistrationDateCorrupted => "User registration date is corrupted",
    UserLoginCorrupted => "User login is corrupted",
    UserPasswordHashCorrupted => "User password hash is corrupted",
    UserNameCorrupted => "User name is corrupted",
    UserSexCorrupted => "User sex is corrupted",
    UserBirthdayCorrupted => "User birthday is corrupted",
    UserContactsCorrupted => "User contacts are corrupted",
    UserGroupsCorrupted => "User groups are corrupted",
    UserContactRelationAlreadyExists => "User contact relation already exists",
    UserContactRelationNotExists => "User contact relation does not exist",
    UserContactAlreadyExists => "User contact already exists",
    UserContactNotExists => "User contact does not exist",
    UserGroupsRelationAlreadyExists => "User groups relation already exists",
    UserGroupsRelationNotExists => "User groups relation does not exist",
    // groups
    GroupUUIDAlreadyRegistered => "A group with this UUID is already registered",
    GroupNotExists => "Group does not exist",
    GroupAlreadyExists => "Group already exists",
    GroupUUIDCorrupted => "Group UUID is corrupted",
    GroupRegistrationDateCorrupted => "Group registration date is corrupted",
    GroupNameCorrupted => "Group name is corrupted",
    GroupUsersCorrupted => "Group users are corrupted",
    GroupUserRelationAlreadyExists => "Group user relation already exists",
    GroupUserRelationNotExists => "Group user relation does not exist",
    // messages
    MessageNotExists => "Message does not exist",
    MessageAlreadyExists => "Message already exists",
    MessageUUIDCorrupted => "Message UUID is corrupted",
    MessageGroupUUIDCorrupted => "Message group UUID is corrupted",
    MessageCreateTimeCorrupted => "Message creation time is corrupted",
    MessageTypeCorrupted => "Message type is corrupted",
    MessageDataCorrupted => "Message data is corrupted",
}

// ---------------------------------------------------------------------------
// Network errors
// ---------------------------------------------------------------------------

error_codes! {
    /// Errors reported by the transport layer.
    pub enum NetError = NET_BASE;
    TimeOut => "Operation timed out",
    NotConnected => "Connection is not established",
    ClientNotFound => "Client not found",
    ClientIdAlreadyExists => "A client with this ID already exists",
    CreateConnectionFail => "Failed to create connection",
    StartListenFail => "Failed to start listening",
    ConnectionRefused => "Connection refused by peer",
    RemoteHostClosed => "Remote host closed the connection",
    HostNotFound => "Host not found",
    SocketAccess => "Socket access denied",
    SocketResource => "Socket resources exhausted",
    SocketTimeout => "Socket operation timed out",
    DatagramTooLarge => "Datagram is too large",
    Network => "Network error",
    AddressInUse => "Address already in use",
    AddressNotAvailable => "Address not available",
    UnsupportedOperation => "Unsupported socket operation",
    ProxyAuthenticationRequired => "Proxy requires authentication",
    SslHandshakeFailed => "SSL handshake failed",
    Temporary => "Temporary error, retry later",
}

// ---------------------------------------------------------------------------
// Unified error
// ---------------------------------------------------------------------------

/// Any courier error, regardless of the category it came from.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Error {
    #[error(transparent)]
    System(#[from] SystemError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Net(#[from] NetError),
}

impl Error {
    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::System(_) => ErrorCategory::System,
            Error::Storage(_) => ErrorCategory::Storage,
            Error::Net(_) => ErrorCategory::Net,
        }
    }

    pub fn code(&self) -> ErrorCode {
        let value = match self {
            Error::System(e) => e.code(),
            Error::Storage(e) => e.code(),
            Error::Net(e) => e.code(),
        };
        ErrorCode::new(self.category(), value)
    }
}

impl PartialEq<SystemError> for Error {
    fn eq(&self, other: &SystemError) -> bool {
        matches!(self, Error::System(e) if e == other)
    }
}

impl PartialEq<StorageError> for Error {
    fn eq(&self, other: &StorageError) -> bool {
        matches!(self, Error::Storage(e) if e == other)
    }
}

impl PartialEq<NetError> for Error {
    fn eq(&self, other: &NetError) -> bool {
        matches!(self, Error::Net(e) if e == other)
    }
}

/// Convenience alias used throughout the workspace.
pub type Result<T> = std::result::Result<T, Error>;

// ---------------------------------------------------------------------------
// Numeric view
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    System,
    Storage,
    Net,
}

impl ErrorCategory {
    pub const ALL: [ErrorCategory; 3] =
        [ErrorCategory::System, ErrorCategory::Storage, ErrorCategory::Net];

    pub fn name(self) -> &'static str {
        match self {
            ErrorCategory::System => "system",
            ErrorCategory::Storage => "storage",
            ErrorCategory::Net => "network",
        }
    }

    /// Human-readable text for `value` within this category.
    pub fn message(self, value: i32) -> String {
        if value == SUCCESS_CODE {
            return SUCCESS_TEXT.to_string();
        }
        match self.resolve(value) {
            Some(err) => err.to_string(),
            None => format!("Unknown {} error with code: {value:#x}", self.name()),
        }
    }

    fn resolve(self, value: i32) -> Option<Error> {
        match self {
            ErrorCategory::System => SystemError::from_code(value).map(Error::from),
            ErrorCategory::Storage => StorageError::from_code(value).map(Error::from),
            ErrorCategory::Net => NetError::from_code(value).map(Error::from),
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A `(category, value)` pair.  Value `0` means success in every category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ErrorCode {
    pub category: ErrorCategory,
    pub value: i32,
}

impl ErrorCode {
    pub fn new(category: ErrorCategory, value: i32) -> Self {
        Self { category, value }
    }

    pub fn success(category: ErrorCategory) -> Self {
        Self::new(category, SUCCESS_CODE)
    }

    pub fn is_ok(&self) -> bool {
        self.value == SUCCESS_CODE
    }

    pub fn is_err(&self) -> bool {
        !self.is_ok()
    }

    pub fn message(&self) -> String {
        self.category.message(self.value)
    }

    /// Typed error for this code, `None` for success or an undefined value.
    pub fn to_error(self) -> Option<Error> {
        if self.is_ok() {
            return None;
        }
        self.category.resolve(self.value)
    }

    /// Numeric view of an operation outcome.
    pub fn of<T>(result: &Result<T>) -> Self {
        match result {
            Ok(_) => Self::success(ErrorCategory::System),
            Err(e) => e.code(),
        }
    }
}

impl From<Error> for ErrorCode {
    fn from(e: Error) -> Self {
        e.code()
    }
}

impl From<ErrorCode> for bool {
    /// `true` when the code carries an error, `false` for success.
    fn from(code: ErrorCode) -> bool {
        code.is_err()
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{} {:#x}] {}", self.category, self.value, self.message())
    }
}
