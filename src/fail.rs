//! Crate-wide error type. Variants that wrap a syscall carry the raw errno
//! value observed when the call returned.

use custom_error::custom_error;

custom_error! {pub Fail
    Invalid{details: &'static str}          = "invalid argument: {details}",
    Unsupported{details: &'static str}      = "operation not supported: {details}",
    SocketCreate{errno: i32}                = "socket creation failed (errno {errno})",
    SocketOpt{name: i32, errno: i32}        = "socket option {name} failed (errno {errno})",
    Bind{errno: i32}                        = "bind failed (errno {errno})",
    Listen{errno: i32}                      = "listen failed (errno {errno})",
    Accept{errno: i32}                      = "accept failed (errno {errno})",
    Connect{errno: i32}                     = "connect failed (errno {errno})",
    Recv{errno: i32}                        = "receive failed (errno {errno})",
    Send{errno: i32}                        = "send failed (errno {errno})",
    MsgSize{len: usize}                     = "datagram payload ({len} bytes) exceeds the maximum message size",
    PeerClosed{}                            = "peer closed the connection",
    ReadinessError{}                        = "descriptor signaled an error event",
    PollFailed{errno: i32}                  = "readiness wait failed (errno {errno})",
    AlreadyRegistered{fd: i32}              = "descriptor {fd} is already in the readiness set",
    NotRegistered{fd: i32}                  = "descriptor {fd} is not in the readiness set",
    AddrParse{details: &'static str}        = "address resolution failed: {details}",
    NotConnected{}                          = "endpoint is not connected",
    Signal{errno: i32}                      = "signal registration failed (errno {errno})"
}

/// Partition of errno values into flow-fatal and retryable, shared by the
/// stream and datagram receive/send paths. Everything not listed here is
/// retryable (EAGAIN, EINTR, EFAULT, ENOBUFS, network down/unreachable, ...).
pub fn is_errno_fatal(errno: i32) -> bool {
    match errno {
        libc::EBADF | libc::ECONNRESET | libc::EHOSTUNREACH | libc::EPIPE | libc::ENOTSOCK => true,
        _ => false,
    }
}

impl Fail {
    /// True for errors that terminate a flow but leave the process healthy.
    pub fn is_flow_fatal(&self) -> bool {
        match self {
            Fail::Recv { .. }
            | Fail::Send { .. }
            | Fail::MsgSize { .. }
            | Fail::PeerClosed {}
            | Fail::ReadinessError {}
            | Fail::PollFailed { .. } => true,
            _ => false,
        }
    }
}
