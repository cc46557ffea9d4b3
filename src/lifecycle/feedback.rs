//! Supervisor feedback channel.
//!
//! The supervisor hands us one end of a pipe or socket. It never writes to
//! it during normal operation, so the descriptor turning readable (data or
//! EOF) means the supervisor is gone.

use std::fs::File;
use std::io::{self, Write};
use std::os::fd::{FromRawFd, OwnedFd, RawFd};

use nix::fcntl::{fcntl, FcntlArg, OFlag};
use tokio::io::unix::AsyncFd;

use crate::protocol::encode_array;

#[derive(Debug)]
pub struct FeedbackChannel {
    fd: AsyncFd<OwnedFd>,
}

impl FeedbackChannel {
    /// Take ownership of a descriptor inherited from the supervisor.
    ///
    /// Must be called inside a tokio runtime context.
    pub fn from_inherited(raw: RawFd) -> io::Result<Self> {
        // Reject descriptors that are not open before taking ownership.
        let flags = fcntl(raw, FcntlArg::F_GETFL).map_err(io::Error::from)?;
        // SAFETY: the descriptor is open (F_GETFL succeeded) and the
        // supervisor hands it to us exclusively; nothing else in this
        // process owns it.
        let owned = unsafe { OwnedFd::from_raw_fd(raw) };
        let flags = OFlag::from_bits_truncate(flags) | OFlag::O_NONBLOCK;
        fcntl(raw, FcntlArg::F_SETFL(flags)).map_err(io::Error::from)?;
        Self::new(owned)
    }

    /// Wrap an already non-blocking descriptor.
    pub fn new(fd: OwnedFd) -> io::Result<Self> {
        Ok(Self { fd: AsyncFd::new(fd)? })
    }

    /// Resolves once the supervisor end becomes readable or closes.
    pub async fn closed(&self) -> io::Result<()> {
        let _ready = self.fd.readable().await?;
        Ok(())
    }

    /// Tell the supervisor that startup is complete.
    pub fn report_initialized(&self) -> io::Result<()> {
        let message = encode_array(&["initialized"])
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
        let mut file = File::from(self.fd.get_ref().try_clone()?);
        write_fully(&mut file, &message)
    }
}

// The descriptor is non-blocking; the message is tiny, so retry on
// WouldBlock instead of registering for writability.
fn write_fully(out: &mut impl Write, mut buf: &[u8]) -> io::Result<()> {
    while !buf.is_empty() {
        match out.write(buf) {
            Ok(0) => return Err(io::ErrorKind::WriteZero.into()),
            Ok(n) => buf = &buf[n..],
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => std::thread::yield_now(),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(())
}
