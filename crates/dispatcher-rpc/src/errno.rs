//! FreeBSD errno table.
//!
//! The dispatcher reports failures with FreeBSD errno codes. The client uses
//! this table to build its own synthetic failures (timeouts, connection
//! resets) and to render server codes symbolically.

/// One errno entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Errno {
    pub name: &'static str,
    pub code: i32,
    pub description: &'static str,
}

const fn errno(name: &'static str, code: i32, description: &'static str) -> Errno {
    Errno {
        name,
        code,
        description,
    }
}

static TABLE: &[Errno] = &[
    errno("EPERM", 1, "Operation not permitted"),
    errno("ENOENT", 2, "No such file or directory"),
    errno("ESRCH", 3, "No such process"),
    errno("EINTR", 4, "Interrupted system call"),
    errno("EIO", 5, "Input/output error"),
    errno("ENXIO", 6, "Device not configured"),
    errno("E2BIG", 7, "Argument list too long"),
    errno("ENOEXEC", 8, "Exec format error"),
    errno("EBADF", 9, "Bad file descriptor"),
    errno("ECHILD", 10, "No child processes"),
    errno("EDEADLK", 11, "Resource deadlock avoided"),
    errno("ENOMEM", 12, "Cannot allocate memory"),
    errno("EACCES", 13, "Permission denied"),
    errno("EFAULT", 14, "Bad address"),
    errno("ENOTBLK", 15, "Block device required"),
    errno("EBUSY", 16, "Device busy"),
    errno("EEXIST", 17, "File exists"),
    errno("EXDEV", 18, "Cross-device link"),
    errno("ENODEV", 19, "Operation not supported by device"),
    errno("ENOTDIR", 20, "Not a directory"),
    errno("EISDIR", 21, "Is a directory"),
    errno("EINVAL", 22, "Invalid argument"),
    errno("ENFILE", 23, "Too many open files in system"),
    errno("EMFILE", 24, "Too many open files"),
    errno("ENOTTY", 25, "Inappropriate ioctl for device"),
    errno("ETXTBSY", 26, "Text file busy"),
    errno("EFBIG", 27, "File too large"),
    errno("ENOSPC", 28, "No space left on device"),
    errno("ESPIPE", 29, "Illegal seek"),
    errno("EROFS", 30, "Read-only file system"),
    errno("EMLINK", 31, "Too many links"),
    errno("EPIPE", 32, "Broken pipe"),
    errno("EDOM", 33, "Numerical argument out of domain"),
    errno("ERANGE", 34, "Result too large"),
    errno("EAGAIN", 35, "Resource temporarily unavailable"),
    errno("EINPROGRESS", 36, "Operation now in progress"),
    errno("EALREADY", 37, "Operation already in progress"),
    errno("ENOTSOCK", 38, "Socket operation on non-socket"),
    errno("EDESTADDRREQ", 39, "Destination address required"),
    errno("EMSGSIZE", 40, "Message too long"),
    errno("EPROTOTYPE", 41, "Protocol wrong type for socket"),
    errno("ENOPROTOOPT", 42, "Protocol not available"),
    errno("EPROTONOSUPPORT", 43, "Protocol not supported"),
    errno("ESOCKTNOSUPPORT", 44, "Socket type not supported"),
    errno("EOPNOTSUPP", 45, "Operation not supported"),
    errno("EPFNOSUPPORT", 46, "Protocol family not supported"),
    errno("EAFNOSUPPORT", 47, "Address family not supported by protocol family"),
    errno("EADDRINUSE", 48, "Address already in use"),
    errno("EADDRNOTAVAIL", 49, "Can't assign requested address"),
    errno("ENETDOWN", 50, "Network is down"),
    errno("ENETUNREACH", 51, "Network is unreachable"),
    errno("ENETRESET", 52, "Network dropped connection on reset"),
    errno("ECONNABORTED", 53, "Software caused connection abort"),
    errno("ECONNRESET", 54, "Connection reset by peer"),
    errno("ENOBUFS", 55, "No buffer space available"),
    errno("EISCONN", 56, "Socket is already connected"),
    errno("ENOTCONN", 57, "Socket is not connected"),
    errno("ESHUTDOWN", 58, "Can't send after socket shutdown"),
    errno("ETOOMANYREFS", 59, "Too many references: can't splice"),
    errno("ETIMEDOUT", 60, "Operation timed out"),
    errno("ECONNREFUSED", 61, "Connection refused"),
    errno("ELOOP", 62, "Too many levels of symbolic links"),
    errno("ENAMETOOLONG", 63, "File name too long"),
    errno("EHOSTDOWN", 64, "Host is down"),
    errno("EHOSTUNREACH", 65, "No route to host"),
    errno("ENOTEMPTY", 66, "Directory not empty"),
    errno("EPROCLIM", 67, "Too many processes"),
    errno("EUSERS", 68, "Too many users"),
    errno("EDQUOT", 69, "Disc quota exceeded"),
    errno("ESTALE", 70, "Stale NFS file handle"),
    errno("ENOLCK", 77, "No locks available"),
    errno("ENOSYS", 78, "Function not implemented"),
    errno("EFTYPE", 79, "Inappropriate file type or format"),
    errno("EAUTH", 80, "Authentication error"),
    errno("ENEEDAUTH", 81, "Need authenticator"),
    errno("ENOMSG", 83, "No message of desired type"),
    errno("EOVERFLOW", 84, "Value too large to be stored in data type"),
    errno("ECANCELED", 85, "Operation canceled"),
    errno("ENOTSUP", 45, "Operation not supported"),
];

/// Look up an errno by symbolic name.
#[must_use]
pub fn lookup(name: &str) -> Option<Errno> {
    TABLE.iter().find(|entry| entry.name == name).copied()
}

/// Symbolic name for a numeric code. Aliased codes resolve to the first entry.
#[must_use]
pub fn name_of(code: i32) -> Option<&'static str> {
    TABLE
        .iter()
        .find(|entry| entry.code == code)
        .map(|entry| entry.name)
}
