use std::io::{Error, ErrorKind};

// errno values shared by Linux and the BSDs
const ENOMEM: i32 = 12;
const ENFILE: i32 = 23;
const EMFILE: i32 = 24;

/// Whether the process or system ran out of descriptors or memory
///
/// The listener itself is fine; accepting again after a short pause succeeds
/// once connections are released.
pub fn is_resource_exhaustion(e: &Error) -> bool {
    e.kind() == ErrorKind::OutOfMemory
        || (cfg!(unix) && matches!(e.raw_os_error(), Some(ENOMEM | ENFILE | EMFILE)))
}

/// Whether an `accept()` failure leaves the listener usable
///
/// Covers errors about the single incoming connection and resource
/// exhaustion. Anything else ends the accept loop.
pub fn is_transient_accept_error(e: &Error) -> bool {
    matches!(
        e.kind(),
        ErrorKind::ConnectionAborted
            | ErrorKind::ConnectionReset
            | ErrorKind::ConnectionRefused
            | ErrorKind::Interrupted
            | ErrorKind::WouldBlock
            | ErrorKind::TimedOut
    ) || is_resource_exhaustion(e)
}
