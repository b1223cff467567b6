//! Winsock socket primitives.

use std::io;
use std::net::{SocketAddr, ToSocketAddrs};
use std::os::windows::io::{AsRawSocket, RawSocket};
use std::time::Duration;

use socket2::Socket;
use tracing::{info, warn};
use windows::Win32::Foundation::{FreeLibrary, HANDLE, HMODULE};
use windows::Win32::Media::{timeBeginPeriod, timeEndPeriod};
use windows::Win32::Networking::WinSock::{
    FD_SET, SOCKET, TIMEVAL, WSACleanup, WSADATA, WSAECONNRESET, WSAStartup, select, setsockopt,
};
use windows::Win32::System::LibraryLoader::{GetProcAddress, LoadLibraryA};
use windows::core::{GUID, s};

use crate::config::AddressFamily;
use crate::error::{ErrorCode, GENERIC_FAILURE, LinkError};
use crate::net::poll::{PollEvents, PollFd};

pub(crate) type RawHandle = RawSocket;

pub(crate) fn raw_handle(socket: &Socket) -> RawHandle {
    socket.as_raw_socket()
}

// ── Poll ─────────────────────────────────────────────────────────
//
// WSAPoll misreports failed connects, so poll is emulated with
// select(). A failed non-blocking connect shows up in the exception
// set rather than the write set.

fn fd_set_insert(set: &mut FD_SET, handle: RawHandle) {
    let count = set.fd_count as usize;
    if count < set.fd_array.len() {
        set.fd_array[count] = SOCKET(handle as usize);
        set.fd_count += 1;
    }
}

fn fd_set_contains(set: &FD_SET, handle: RawHandle) -> bool {
    set.fd_array[..set.fd_count as usize]
        .iter()
        .any(|s| s.0 == handle as usize)
}

fn empty_fd_set() -> FD_SET {
    FD_SET {
        fd_count: 0,
        fd_array: [SOCKET(0); 64],
    }
}

pub(crate) fn poll(fds: &mut [PollFd], timeout: Option<Duration>) -> io::Result<usize> {
    let mut read_fds = empty_fd_set();
    let mut write_fds = empty_fd_set();
    let mut except_fds = empty_fd_set();

    for fd in fds.iter_mut() {
        fd.revents = PollEvents::empty();
        if fd.events.contains(PollEvents::IN) {
            fd_set_insert(&mut read_fds, fd.handle);
        }
        if fd.events.contains(PollEvents::OUT) {
            fd_set_insert(&mut write_fds, fd.handle);
            fd_set_insert(&mut except_fds, fd.handle);
        }
    }

    let tv = timeout.map(|d| TIMEVAL {
        tv_sec: i32::try_from(d.as_secs()).unwrap_or(i32::MAX),
        tv_usec: d.subsec_micros() as i32,
    });

    // SAFETY: every set and the timeval live across the call.
    let rc = unsafe {
        select(
            0,
            Some(&mut read_fds),
            Some(&mut write_fds),
            Some(&mut except_fds),
            tv.as_ref().map(|t| t as *const TIMEVAL),
        )
    };
    if rc < 0 {
        return Err(io::Error::last_os_error());
    }
    if rc == 0 {
        return Ok(0);
    }

    for fd in fds.iter_mut() {
        if fd_set_contains(&read_fds, fd.handle) {
            fd.revents |= PollEvents::RDNORM;
        }
        if fd_set_contains(&write_fds, fd.handle) {
            fd.revents |= PollEvents::WRNORM;
        }
        if fd_set_contains(&except_fds, fd.handle) {
            fd.revents |= PollEvents::ERR;
        }
    }
    Ok(rc as usize)
}

// ── Socket options ───────────────────────────────────────────────

const IPPROTO_IP: i32 = 0;
const IPPROTO_IPV6: i32 = 41;
const IP_MTU_DISCOVER: i32 = 71;
const IPV6_MTU_DISCOVER: i32 = 71;
const IP_PMTUDISC_DONT: i32 = 2;

pub(crate) fn configure_new_socket(_socket: &Socket) {}

/// Windows has no TCP_MAXSEG, but disabling path MTU discovery pins
/// the MSS to the protocol minimum.
pub(crate) fn clamp_segment_size(socket: &Socket, mss: u32) -> io::Result<()> {
    let (level, name) = if mss == crate::net::socket::TCP_V4_MSS {
        (IPPROTO_IP, IP_MTU_DISCOVER)
    } else {
        (IPPROTO_IPV6, IPV6_MTU_DISCOVER)
    };
    let value = IP_PMTUDISC_DONT.to_ne_bytes();
    // SAFETY: the option buffer is a live 4-byte integer.
    let rc = unsafe {
        setsockopt(
            SOCKET(socket.as_raw_socket() as usize),
            level,
            name,
            Some(&value),
        )
    };
    if rc != 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(())
    }
}

/// SO_RCVTIMEO leaves a Winsock socket in an indeterminate state after
/// it fires, so it is never used for recoverable timeouts.
pub(crate) fn set_nonfatal_recv_timeout(_socket: &Socket, _timeout: Duration) -> Result<(), LinkError> {
    Err(LinkError::Unsupported("non-fatal receive timeout"))
}

// ── Name resolution ──────────────────────────────────────────────

/// Resolve through the standard library's `getaddrinfo`.
///
/// Winsock's AI_ADDRCONFIG ignores loopback-only hosts inconsistently,
/// so the family filter is applied afterwards instead. The Winsock
/// error survives as the io error's OS code.
pub(crate) fn lookup_host(
    host: &str,
    family: AddressFamily,
) -> Result<Vec<SocketAddr>, (ErrorCode, io::Error)> {
    let addrs = (host, 0u16)
        .to_socket_addrs()
        .map_err(|e| (e.raw_os_error().unwrap_or(GENERIC_FAILURE), e))?;
    Ok(addrs.filter(|a| family.accepts(&a.ip())).collect())
}

// ── Error classification ─────────────────────────────────────────

pub(crate) fn is_icmp_unreachable(err: &io::Error) -> bool {
    err.raw_os_error() == Some(WSAECONNRESET.0)
}

pub(crate) fn is_connect_in_progress(err: &io::Error) -> bool {
    err.kind() == io::ErrorKind::WouldBlock
}

// ── Process-wide state ───────────────────────────────────────────

pub(crate) fn init_sockets() -> io::Result<()> {
    let mut data = WSADATA::default();
    // SAFETY: `data` is a valid out-parameter.
    let rc = unsafe { WSAStartup(0x0002, &mut data) };
    if rc != 0 {
        return Err(io::Error::from_raw_os_error(rc));
    }
    Ok(())
}

pub(crate) fn cleanup_sockets() {
    // SAFETY: balanced with the WSAStartup in `init_sockets`.
    unsafe {
        WSACleanup();
    }
}

// ── Low-latency mode ─────────────────────────────────────────────
//
// wlanapi.dll is absent on some Server SKUs, so it is loaded at
// runtime rather than linked.

const WLAN_API_VERSION_2_0: u32 = 0x0000_0002;
const WLAN_INTERFACE_STATE_CONNECTED: i32 = 1;
const WLAN_INTF_OPCODE_MEDIA_STREAMING_MODE: i32 = 3;

#[repr(C)]
struct WlanInterfaceInfo {
    interface_guid: GUID,
    description: [u16; 256],
    state: i32,
}

#[repr(C)]
struct WlanInterfaceInfoList {
    number_of_items: u32,
    index: u32,
    interface_info: [WlanInterfaceInfo; 1],
}

type WlanOpenHandleFn =
    unsafe extern "system" fn(u32, *const core::ffi::c_void, *mut u32, *mut HANDLE) -> u32;
type WlanCloseHandleFn = unsafe extern "system" fn(HANDLE, *const core::ffi::c_void) -> u32;
type WlanEnumInterfacesFn = unsafe extern "system" fn(
    HANDLE,
    *const core::ffi::c_void,
    *mut *mut WlanInterfaceInfoList,
) -> u32;
type WlanFreeMemoryFn = unsafe extern "system" fn(*const core::ffi::c_void);
type WlanSetInterfaceFn = unsafe extern "system" fn(
    HANDLE,
    *const GUID,
    i32,
    u32,
    *const core::ffi::c_void,
    *const core::ffi::c_void,
) -> u32;

struct WlanApi {
    library: HMODULE,
    open_handle: WlanOpenHandleFn,
    close_handle: WlanCloseHandleFn,
    enum_interfaces: WlanEnumInterfacesFn,
    free_memory: WlanFreeMemoryFn,
    set_interface: WlanSetInterfaceFn,
}

impl WlanApi {
    fn load() -> Option<Self> {
        // SAFETY: loading a system library by name.
        let library = match unsafe { LoadLibraryA(s!("wlanapi.dll")) } {
            Ok(h) => h,
            Err(_) => {
                info!("WLAN API is not supported on this OS");
                return None;
            }
        };

        // SAFETY: each symbol is transmuted to its documented signature.
        let api = unsafe {
            let open = GetProcAddress(library, s!("WlanOpenHandle"));
            let close = GetProcAddress(library, s!("WlanCloseHandle"));
            let enumerate = GetProcAddress(library, s!("WlanEnumInterfaces"));
            let free = GetProcAddress(library, s!("WlanFreeMemory"));
            let set = GetProcAddress(library, s!("WlanSetInterface"));
            match (open, close, enumerate, free, set) {
                (Some(open), Some(close), Some(enumerate), Some(free), Some(set)) => Some(Self {
                    library,
                    open_handle: std::mem::transmute::<_, WlanOpenHandleFn>(open),
                    close_handle: std::mem::transmute::<_, WlanCloseHandleFn>(close),
                    enum_interfaces: std::mem::transmute::<_, WlanEnumInterfacesFn>(enumerate),
                    free_memory: std::mem::transmute::<_, WlanFreeMemoryFn>(free),
                    set_interface: std::mem::transmute::<_, WlanSetInterfaceFn>(set),
                }),
                _ => None,
            }
        };

        if api.is_none() {
            warn!("wlanapi.dll is missing expected exports");
            // SAFETY: the library was loaded above and nothing references it.
            let _ = unsafe { FreeLibrary(library) };
        }
        api
    }
}

/// Timer resolution raised and, where possible, connected wireless
/// interfaces switched to media-streaming mode. Closing the WLAN
/// handle reverts the interface setting.
pub(crate) struct LowLatencyState {
    timer_period_raised: bool,
    wlan: Option<(WlanApi, HANDLE)>,
    tuned: usize,
}

// SAFETY: the WLAN client handle is only touched through `&mut self`.
unsafe impl Send for LowLatencyState {}

impl LowLatencyState {
    pub(crate) fn enter() -> Self {
        // SAFETY: plain multimedia timer call, balanced in `exit`.
        let timer_period_raised = unsafe { timeBeginPeriod(1) } == 0;
        let mut state = Self {
            timer_period_raised,
            wlan: None,
            tuned: 0,
        };

        let Some(api) = WlanApi::load() else {
            return state;
        };

        let mut negotiated = 0u32;
        let mut handle = HANDLE::default();
        // SAFETY: out-parameters are valid for the duration of the call.
        if unsafe { (api.open_handle)(WLAN_API_VERSION_2_0, std::ptr::null(), &mut negotiated, &mut handle) } != 0 {
            // SAFETY: no handle was opened.
            let _ = unsafe { FreeLibrary(api.library) };
            return state;
        }

        let mut list: *mut WlanInterfaceInfoList = std::ptr::null_mut();
        // SAFETY: `handle` is open; `list` receives an allocation we free below.
        if unsafe { (api.enum_interfaces)(handle, std::ptr::null(), &mut list) } != 0 || list.is_null() {
            // SAFETY: closing the handle we opened.
            unsafe {
                (api.close_handle)(handle, std::ptr::null());
                let _ = FreeLibrary(api.library);
            }
            return state;
        }

        // SAFETY: the list holds `number_of_items` contiguous entries.
        unsafe {
            let count = (*list).number_of_items as usize;
            let entries = std::ptr::addr_of!((*list).interface_info) as *const WlanInterfaceInfo;
            for i in 0..count {
                let entry = &*entries.add(i);
                if entry.state != WLAN_INTERFACE_STATE_CONNECTED {
                    continue;
                }
                let enabled: i32 = 1;
                let rc = (api.set_interface)(
                    handle,
                    &entry.interface_guid,
                    WLAN_INTF_OPCODE_MEDIA_STREAMING_MODE,
                    std::mem::size_of::<i32>() as u32,
                    &enabled as *const i32 as *const core::ffi::c_void,
                    std::ptr::null(),
                );
                if rc == 0 {
                    info!("WLAN interface {i} is now in low latency mode");
                    state.tuned += 1;
                }
            }
            (api.free_memory)(list as *const core::ffi::c_void);
        }

        state.wlan = Some((api, handle));
        state
    }

    pub(crate) fn exit(&mut self) {
        if let Some((api, handle)) = self.wlan.take() {
            // SAFETY: closing our own handle and releasing our library reference.
            unsafe {
                (api.close_handle)(handle, std::ptr::null());
                let _ = FreeLibrary(api.library);
            }
        }
        if std::mem::take(&mut self.timer_period_raised) {
            // SAFETY: balanced with timeBeginPeriod in `enter`.
            unsafe {
                timeEndPeriod(1);
            }
        }
        self.tuned = 0;
    }

    pub(crate) fn tuned_interfaces(&self) -> usize {
        self.tuned
    }
}
