//! Blocking stream socket over raw libc calls.
//!
//! The address family follows the `IpAddress` version. Reads and writes
//! are allowed to be short; EOF is `Ok(0)`. Move-only: dropping a live
//! socket closes it best-effort.

use crate::ip::IpAddress;
use log::debug;
use veil_core::error::{Error, ErrorCode, Result, ResultExt};

pub struct Socket {
    fd: libc::c_int,
    ip: IpAddress,
    port: u16,
}

impl Socket {
    /// Creates the descriptor; `open` performs the connect.
    pub fn create(ip: IpAddress, port: u16) -> Result<Socket> {
        let family = if ip.is_ipv6() { libc::AF_INET6 } else { libc::AF_INET };
        let fd = unsafe { libc::socket(family, libc::SOCK_STREAM, 0) };
        if fd < 0 {
            let errno = last_errno();
            debug!("socket() failed for {}:{} ({})", ip, port, Error::posix(errno));
            return Err(Error::posix(errno)).or_code(ErrorCode::SocketCreateFailedOpen);
        }
        Ok(Socket { fd, ip, port })
    }

    /// Blocking connect.
    pub fn open(&mut self) -> Result<()> {
        if self.fd < 0 {
            return Err(Error::internal(ErrorCode::SocketOpenFailedState));
        }
        let status = match self.ip {
            IpAddress::V4(octets) => {
                let mut addr: libc::sockaddr_in = unsafe { std::mem::zeroed() };
                addr.sin_family = libc::AF_INET as libc::sa_family_t;
                addr.sin_port = self.port.to_be();
                addr.sin_addr.s_addr = u32::from_ne_bytes(octets);
                unsafe {
                    libc::connect(
                        self.fd,
                        &addr as *const libc::sockaddr_in as *const libc::sockaddr,
                        std::mem::size_of::<libc::sockaddr_in>() as libc::socklen_t,
                    )
                }
            }
            IpAddress::V6(octets) => {
                let mut addr: libc::sockaddr_in6 = unsafe { std::mem::zeroed() };
                addr.sin6_family = libc::AF_INET6 as libc::sa_family_t;
                addr.sin6_port = self.port.to_be();
                addr.sin6_addr.s6_addr = octets;
                unsafe {
                    libc::connect(
                        self.fd,
                        &addr as *const libc::sockaddr_in6 as *const libc::sockaddr,
                        std::mem::size_of::<libc::sockaddr_in6>() as libc::socklen_t,
                    )
                }
            }
        };
        if status != 0 {
            let errno = last_errno();
            debug!("connect() to {}:{} failed ({})", self.ip, self.port, Error::posix(errno));
            return Err(Error::posix(errno)).or_code(ErrorCode::SocketOpenFailedConnect);
        }
        Ok(())
    }

    /// Blocking read. Short reads are normal; EOF is `Ok(0)`.
    pub fn read(&mut self, buffer: &mut [u8]) -> Result<isize> {
        if self.fd < 0 {
            return Err(Error::internal(ErrorCode::SocketReadFailedState));
        }
        let received = unsafe {
            libc::recv(self.fd, buffer.as_mut_ptr() as *mut libc::c_void, buffer.len(), 0)
        };
        if received < 0 {
            let errno = last_errno();
            debug!("recv() failed ({})", Error::posix(errno));
            return Err(Error::posix(errno)).or_code(ErrorCode::SocketReadFailedRecv);
        }
        Ok(received)
    }

    /// Blocking write. May write fewer bytes than requested.
    pub fn write(&mut self, buffer: &[u8]) -> Result<u32> {
        if self.fd < 0 {
            return Err(Error::internal(ErrorCode::SocketWriteFailedState));
        }
        #[cfg(target_os = "linux")]
        let flags = libc::MSG_NOSIGNAL;
        #[cfg(not(target_os = "linux"))]
        let flags = 0;
        let sent = unsafe {
            libc::send(self.fd, buffer.as_ptr() as *const libc::c_void, buffer.len(), flags)
        };
        if sent < 0 {
            let errno = last_errno();
            debug!("send() failed ({})", Error::posix(errno));
            return Err(Error::posix(errno)).or_code(ErrorCode::SocketWriteFailedSend);
        }
        Ok(sent as u32)
    }

    /// Writes the whole buffer, looping over short writes.
    pub fn write_all(&mut self, mut buffer: &[u8]) -> Result<()> {
        while !buffer.is_empty() {
            let written = self.write(buffer)? as usize;
            if written == 0 {
                return Err(Error::internal(ErrorCode::SocketWriteFailedSend));
            }
            buffer = &buffer[written..];
        }
        Ok(())
    }

    pub fn close(&mut self) -> Result<()> {
        if self.fd < 0 {
            return Ok(());
        }
        let status = unsafe { libc::close(self.fd) };
        self.fd = -1;
        if status != 0 {
            return Err(Error::posix(last_errno())).or_code(ErrorCode::SocketCloseFailed);
        }
        Ok(())
    }

    pub fn ip(&self) -> IpAddress {
        self.ip
    }

    pub fn port(&self) -> u16 {
        self.port
    }
}

impl Drop for Socket {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

fn last_errno() -> i32 {
    std::io::Error::last_os_error().raw_os_error().unwrap_or(0)
}
