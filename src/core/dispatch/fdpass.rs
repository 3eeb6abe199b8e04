// src/core/dispatch/fdpass.rs

//! Unix-domain ancillary-data fd passing (spec §4.3): the dispatcher hands
//! an accepted client socket to a worker process over the worker's
//! per-slot listening socket. `nix`'s `sendmsg`/`recvmsg` are synchronous
//! syscalls, so every call here runs inside `spawn_blocking`.

use crate::core::errors::BrokerError;
use nix::sys::socket::{ControlMessage, ControlMessageOwned, MsgFlags, recvmsg, sendmsg};
use nix::sys::uio::IoSlice;
use std::io::IoSliceMut;
use std::os::fd::{AsRawFd, BorrowedFd, FromRawFd, OwnedFd, RawFd};
use std::os::unix::net::UnixStream;

/// Sends `payload` over `conn`, attaching `fd` as ancillary `SCM_RIGHTS`
/// data, so the receiving process inherits a duplicate of the descriptor.
pub async fn send_fd(conn: UnixStream, fd: RawFd, payload: Vec<u8>) -> Result<(), BrokerError> {
    tokio::task::spawn_blocking(move || {
        let borrowed = unsafe { BorrowedFd::borrow_raw(fd) };
        let fds = [borrowed];
        let cmsg = [ControlMessage::ScmRights(&fds)];
        let iov = [IoSlice::new(&payload)];
        sendmsg::<()>(conn.as_raw_fd(), &iov, &cmsg, MsgFlags::empty(), None)
            .map_err(|e| BrokerError::Communication(format!("sendmsg failed: {e}")))?;
        Ok(())
    })
    .await
    .map_err(|e| BrokerError::Internal(format!("fd-pass task panicked: {e}")))?
}

/// Receives a payload plus one passed file descriptor over `conn`.
pub async fn recv_fd(
    conn: UnixStream,
    max_payload: usize,
) -> Result<(Vec<u8>, OwnedFd), BrokerError> {
    tokio::task::spawn_blocking(move || {
        let mut buf = vec![0u8; max_payload];
        let mut cmsg_buf = nix::cmsg_space!([RawFd; 1]);
        let mut iov = [IoSliceMut::new(&mut buf)];
        let msg = recvmsg::<()>(
            conn.as_raw_fd(),
            &mut iov,
            Some(&mut cmsg_buf),
            MsgFlags::empty(),
        )
        .map_err(|e| BrokerError::Communication(format!("recvmsg failed: {e}")))?;

        let received_fd = msg
            .cmsgs()
            .map_err(|e| BrokerError::Communication(format!("bad ancillary data: {e}")))?
            .find_map(|cmsg| match cmsg {
                ControlMessageOwned::ScmRights(fds) => fds.first().copied(),
                _ => None,
            })
            .ok_or_else(|| BrokerError::Communication("no fd received".into()))?;

        buf.truncate(msg.bytes);
        let owned = unsafe { OwnedFd::from_raw_fd(received_fd) };
        Ok((buf, owned))
    })
    .await
    .map_err(|e| BrokerError::Internal(format!("fd-pass task panicked: {e}")))?
}
