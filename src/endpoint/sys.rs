//! Thin syscall wrappers. Every function performs exactly one non-blocking
//! kernel call and reports failure as the raw errno value; classification
//! into fatal and retryable happens in the callers.

use super::addr::SockAddr;

use std::mem;
use std::os::unix::io::RawFd;

pub fn errno() -> i32 {
    std::io::Error::last_os_error().raw_os_error().unwrap_or(0)
}

fn send_flags() -> i32 {
    #[cfg(target_os = "linux")]
    {
        libc::MSG_DONTWAIT | libc::MSG_NOSIGNAL
    }
    #[cfg(not(target_os = "linux"))]
    {
        libc::MSG_DONTWAIT
    }
}

pub fn socket(family: i32, socktype: i32) -> Result<RawFd, i32> {
    let fd = unsafe { libc::socket(family, socktype, 0) };
    if fd < 0 {
        return Err(errno());
    }
    Ok(fd)
}

pub fn set_nonblocking(fd: RawFd) -> Result<(), i32> {
    unsafe {
        let flags = libc::fcntl(fd, libc::F_GETFL);
        if flags < 0 {
            return Err(errno());
        }
        if libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) < 0 {
            return Err(errno());
        }
    }
    Ok(())
}

pub fn close(fd: RawFd) -> Result<(), i32> {
    if unsafe { libc::close(fd) } != 0 {
        return Err(errno());
    }
    Ok(())
}

pub fn dup(fd: RawFd) -> Result<RawFd, i32> {
    let fd2 = unsafe { libc::dup(fd) };
    if fd2 < 0 {
        return Err(errno());
    }
    Ok(fd2)
}

pub fn bind(fd: RawFd, addr: &SockAddr) -> Result<(), i32> {
    if unsafe { libc::bind(fd, addr.as_sockaddr(), addr.len()) } != 0 {
        return Err(errno());
    }
    Ok(())
}

pub fn listen(fd: RawFd, backlog: i32) -> Result<(), i32> {
    if unsafe { libc::listen(fd, backlog) } != 0 {
        return Err(errno());
    }
    Ok(())
}

/// Accepts a pending connection; the new descriptor is returned already
/// non-blocking along with the peer address.
pub fn accept(fd: RawFd) -> Result<(RawFd, SockAddr), i32> {
    let mut storage: libc::sockaddr_storage = unsafe { mem::zeroed() };
    let mut len = mem::size_of::<libc::sockaddr_storage>() as libc::socklen_t;
    let newfd = unsafe {
        libc::accept(fd, &mut storage as *mut _ as *mut libc::sockaddr, &mut len)
    };
    if newfd < 0 {
        return Err(errno());
    }
    if let Err(e) = set_nonblocking(newfd) {
        let _ = close(newfd);
        return Err(e);
    }
    Ok((newfd, SockAddr::from_storage(storage, len)))
}

pub fn connect(fd: RawFd, addr: &SockAddr) -> Result<(), i32> {
    if unsafe { libc::connect(fd, addr.as_sockaddr(), addr.len()) } != 0 {
        return Err(errno());
    }
    Ok(())
}

pub fn shutdown(fd: RawFd, how: i32) -> Result<(), i32> {
    if unsafe { libc::shutdown(fd, how) } != 0 {
        return Err(errno());
    }
    Ok(())
}

pub fn recv(fd: RawFd, buf: &mut [u8]) -> Result<usize, i32> {
    let n = unsafe {
        libc::recv(fd, buf.as_mut_ptr() as *mut libc::c_void, buf.len(), libc::MSG_DONTWAIT)
    };
    if n < 0 {
        return Err(errno());
    }
    Ok(n as usize)
}

pub fn send(fd: RawFd, buf: &[u8]) -> Result<usize, i32> {
    let n = unsafe {
        libc::send(fd, buf.as_ptr() as *const libc::c_void, buf.len(), send_flags())
    };
    if n < 0 {
        return Err(errno());
    }
    Ok(n as usize)
}

pub fn recvfrom(fd: RawFd, buf: &mut [u8]) -> Result<(usize, SockAddr), i32> {
    let mut storage: libc::sockaddr_storage = unsafe { mem::zeroed() };
    let mut len = mem::size_of::<libc::sockaddr_storage>() as libc::socklen_t;
    let n = unsafe {
        libc::recvfrom(
            fd,
            buf.as_mut_ptr() as *mut libc::c_void,
            buf.len(),
            libc::MSG_DONTWAIT,
            &mut storage as *mut _ as *mut libc::sockaddr,
            &mut len,
        )
    };
    if n < 0 {
        return Err(errno());
    }
    Ok((n as usize, SockAddr::from_storage(storage, len)))
}

pub fn sendto(fd: RawFd, buf: &[u8], addr: &SockAddr) -> Result<usize, i32> {
    let n = unsafe {
        libc::sendto(
            fd,
            buf.as_ptr() as *const libc::c_void,
            buf.len(),
            send_flags(),
            addr.as_sockaddr(),
            addr.len(),
        )
    };
    if n < 0 {
        return Err(errno());
    }
    Ok(n as usize)
}

pub fn getsockname(fd: RawFd) -> Result<SockAddr, i32> {
    let mut storage: libc::sockaddr_storage = unsafe { mem::zeroed() };
    let mut len = mem::size_of::<libc::sockaddr_storage>() as libc::socklen_t;
    if unsafe { libc::getsockname(fd, &mut storage as *mut _ as *mut libc::sockaddr, &mut len) }
        != 0
    {
        return Err(errno());
    }
    Ok(SockAddr::from_storage(storage, len))
}

pub fn getpeername(fd: RawFd) -> Result<SockAddr, i32> {
    let mut storage: libc::sockaddr_storage = unsafe { mem::zeroed() };
    let mut len = mem::size_of::<libc::sockaddr_storage>() as libc::socklen_t;
    if unsafe { libc::getpeername(fd, &mut storage as *mut _ as *mut libc::sockaddr, &mut len) }
        != 0
    {
        return Err(errno());
    }
    Ok(SockAddr::from_storage(storage, len))
}

pub fn setsockopt_int(fd: RawFd, level: i32, name: i32, value: i32) -> Result<(), i32> {
    let ret = unsafe {
        libc::setsockopt(
            fd,
            level,
            name,
            &value as *const i32 as *const libc::c_void,
            mem::size_of::<i32>() as libc::socklen_t,
        )
    };
    if ret != 0 {
        return Err(errno());
    }
    Ok(())
}

pub fn getsockopt_int(fd: RawFd, level: i32, name: i32) -> Result<i32, i32> {
    let mut value: i32 = 0;
    let mut len = mem::size_of::<i32>() as libc::socklen_t;
    let ret = unsafe {
        libc::getsockopt(fd, level, name, &mut value as *mut i32 as *mut libc::c_void, &mut len)
    };
    if ret != 0 {
        return Err(errno());
    }
    Ok(value)
}

/// Kernel TCP telemetry, Linux only.
#[cfg(target_os = "linux")]
pub fn tcp_info(fd: RawFd) -> Result<libc::tcp_info, i32> {
    let mut info: libc::tcp_info = unsafe { mem::zeroed() };
    let mut len = mem::size_of::<libc::tcp_info>() as libc::socklen_t;
    let ret = unsafe {
        libc::getsockopt(
            fd,
            libc::IPPROTO_TCP,
            libc::TCP_INFO,
            &mut info as *mut _ as *mut libc::c_void,
            &mut len,
        )
    };
    if ret != 0 {
        return Err(errno());
    }
    Ok(info)
}

/// Path MTU of a connected socket, Linux only.
#[cfg(target_os = "linux")]
pub fn path_mtu(fd: RawFd) -> Result<i32, i32> {
    getsockopt_int(fd, libc::IPPROTO_IP, libc::IP_MTU)
}
