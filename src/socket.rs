//! Byte-level access to a Bluetooth controller.

use std::io;

/// A bound HCI transport that exchanges whole packets, packet type indicator included.
///
/// Reads and writes are non-blocking in the [`nb`] sense: they return
/// [`WouldBlock`](nb::Error::WouldBlock) instead of waiting.
pub trait HciSocket {
    /// Binds the raw channel of an adapter, shared with the kernel's own stack. Returns the
    /// adapter that was bound.
    fn bind_raw(&mut self, device_id: Option<u16>) -> io::Result<u16>;

    /// Binds the user channel of an adapter for exclusive access. Returns the adapter that was
    /// bound.
    fn bind_user(&mut self, device_id: Option<u16>) -> io::Result<u16>;

    /// Installs a kernel-side packet filter (the `HCI_FILTER` socket option).
    fn set_filter(&mut self, filter: &[u8]) -> io::Result<()>;

    /// Reports whether the bound adapter is up.
    fn is_dev_up(&mut self) -> io::Result<bool>;

    /// Writes one packet.
    fn write(&mut self, packet: &[u8]) -> nb::Result<(), io::Error>;

    /// Reads one packet into `buffer` and returns its length.
    fn read(&mut self, buffer: &mut [u8]) -> nb::Result<usize, io::Error>;
}

#[cfg(target_os = "linux")]
pub use self::linux::LinuxHciSocket;

#[cfg(target_os = "linux")]
mod linux {
    use std::io;
    use std::mem;
    use std::os::unix::io::{AsRawFd, RawFd};

    use libc::{c_int, c_void};

    use super::HciSocket;

    const BTPROTO_HCI: c_int = 1;
    const SOL_HCI: c_int = 0;
    const HCI_FILTER: c_int = 2;

    const HCI_CHANNEL_RAW: u16 = 0;
    const HCI_CHANNEL_USER: u16 = 1;

    const HCI_UP: u32 = 0;
    const HCI_MAX_DEV: usize = 16;

    const HCIGETDEVLIST: u32 = 0x8004_48d2;
    const HCIGETDEVINFO: u32 = 0x8004_48d3;

    #[repr(C)]
    struct SockaddrHci {
        hci_family: libc::sa_family_t,
        hci_dev: u16,
        hci_channel: u16,
    }

    #[repr(C)]
    #[derive(Copy, Clone)]
    struct HciDevReq {
        dev_id: u16,
        dev_opt: u32,
    }

    #[repr(C)]
    struct HciDevListReq {
        dev_num: u16,
        dev_req: [HciDevReq; HCI_MAX_DEV],
    }

    #[repr(C)]
    struct HciDevInfo {
        dev_id: u16,
        name: [u8; 8],
        bdaddr: [u8; 6],
        flags: u32,
        dev_type: u8,
        features: [u8; 8],
        pkt_type: u32,
        link_policy: u32,
        link_mode: u32,
        acl_mtu: u16,
        acl_pkts: u16,
        sco_mtu: u16,
        sco_pkts: u16,
        stat: [u32; 10],
    }

    /// `AF_BLUETOOTH`/`BTPROTO_HCI` socket, opened non-blocking.
    pub struct LinuxHciSocket {
        fd: RawFd,
        device_id: Option<u16>,
    }

    impl LinuxHciSocket {
        /// Opens an unbound HCI socket.
        ///
        /// # Errors
        ///
        /// The OS error, typically when Bluetooth support is missing from the kernel.
        pub fn new() -> io::Result<LinuxHciSocket> {
            let fd = unsafe {
                libc::socket(
                    libc::AF_BLUETOOTH,
                    libc::SOCK_RAW | libc::SOCK_CLOEXEC | libc::SOCK_NONBLOCK,
                    BTPROTO_HCI,
                )
            };
            if fd < 0 {
                return Err(io::Error::last_os_error());
            }

            Ok(LinuxHciSocket {
                fd,
                device_id: None,
            })
        }

        fn bind(&mut self, device_id: u16, channel: u16) -> io::Result<u16> {
            let addr = SockaddrHci {
                hci_family: libc::AF_BLUETOOTH as libc::sa_family_t,
                hci_dev: device_id,
                hci_channel: channel,
            };
            let result = unsafe {
                libc::bind(
                    self.fd,
                    &addr as *const SockaddrHci as *const libc::sockaddr,
                    mem::size_of::<SockaddrHci>() as libc::socklen_t,
                )
            };
            if result < 0 {
                return Err(io::Error::last_os_error());
            }

            debug!("bound hci{} on channel {}", device_id, channel);
            self.device_id = Some(device_id);
            Ok(device_id)
        }

        /// Picks the first adapter whose up state matches `up`, falling back to adapter 0.
        fn device_for(&self, up: bool) -> io::Result<u16> {
            let mut list = HciDevListReq {
                dev_num: HCI_MAX_DEV as u16,
                dev_req: [HciDevReq {
                    dev_id: 0,
                    dev_opt: 0,
                }; HCI_MAX_DEV],
            };
            let result = unsafe {
                libc::ioctl(
                    self.fd,
                    HCIGETDEVLIST as _,
                    &mut list as *mut HciDevListReq as *mut c_void,
                )
            };
            if result < 0 {
                return Err(io::Error::last_os_error());
            }

            let count = usize::from(list.dev_num).min(HCI_MAX_DEV);
            Ok(list.dev_req[..count]
                .iter()
                .find(|req| (req.dev_opt & (1 << HCI_UP) != 0) == up)
                .map_or(0, |req| req.dev_id))
        }
    }

    impl HciSocket for LinuxHciSocket {
        fn bind_raw(&mut self, device_id: Option<u16>) -> io::Result<u16> {
            let device_id = match device_id {
                Some(id) => id,
                None => self.device_for(true)?,
            };
            self.bind(device_id, HCI_CHANNEL_RAW)
        }

        fn bind_user(&mut self, device_id: Option<u16>) -> io::Result<u16> {
            let device_id = match device_id {
                Some(id) => id,
                None => self.device_for(false)?,
            };
            self.bind(device_id, HCI_CHANNEL_USER)
        }

        fn set_filter(&mut self, filter: &[u8]) -> io::Result<()> {
            let result = unsafe {
                libc::setsockopt(
                    self.fd,
                    SOL_HCI,
                    HCI_FILTER,
                    filter.as_ptr() as *const c_void,
                    filter.len() as libc::socklen_t,
                )
            };
            if result < 0 {
                return Err(io::Error::last_os_error());
            }
            Ok(())
        }

        fn is_dev_up(&mut self) -> io::Result<bool> {
            let mut info: HciDevInfo = unsafe { mem::zeroed() };
            info.dev_id = self.device_id.unwrap_or(0);
            let result = unsafe {
                libc::ioctl(
                    self.fd,
                    HCIGETDEVINFO as _,
                    &mut info as *mut HciDevInfo as *mut c_void,
                )
            };
            if result < 0 {
                return Err(io::Error::last_os_error());
            }
            Ok(info.flags & (1 << HCI_UP) != 0)
        }

        fn write(&mut self, packet: &[u8]) -> nb::Result<(), io::Error> {
            let written =
                unsafe { libc::write(self.fd, packet.as_ptr() as *const c_void, packet.len()) };
            if written < 0 {
                return Err(would_block_or(io::Error::last_os_error()));
            }
            Ok(())
        }

        fn read(&mut self, buffer: &mut [u8]) -> nb::Result<usize, io::Error> {
            let read =
                unsafe { libc::read(self.fd, buffer.as_mut_ptr() as *mut c_void, buffer.len()) };
            if read < 0 {
                return Err(would_block_or(io::Error::last_os_error()));
            }
            Ok(read as usize)
        }
    }

    impl AsRawFd for LinuxHciSocket {
        fn as_raw_fd(&self) -> RawFd {
            self.fd
        }
    }

    impl Drop for LinuxHciSocket {
        fn drop(&mut self) {
            unsafe {
                libc::close(self.fd);
            }
        }
    }

    fn would_block_or(error: io::Error) -> nb::Error<io::Error> {
        match error.kind() {
            io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted => nb::Error::WouldBlock,
            _ => nb::Error::Other(error),
        }
    }
}
