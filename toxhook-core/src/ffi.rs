//! C ABI: one hook per engine callback, with the toxcore callback signatures.
//! Register each `toxhook_on_*` with the engine and pass the pointer from
//! [`into_user_data`] as the callback's `user_data`.

use std::ffi::c_void;
use std::panic::{self, AssertUnwindSafe};
use std::slice;

use crate::trampoline::{RawInvocation, Trampoline};

/// Bumped when a hook signature changes.
pub const ABI_VERSION: u32 = 1;

/// Returns [`ABI_VERSION`]. Also keeps the staticlib exporting at least one plain symbol.
#[no_mangle]
pub extern "C" fn toxhook_abi_version() -> u32 {
    ABI_VERSION
}

/// Move a trampoline to the heap and return it as callback user data.
/// Release it with [`toxhook_user_data_free`] once the engine no longer calls back.
pub fn into_user_data(trampoline: Trampoline) -> *mut c_void {
    Box::into_raw(Box::new(trampoline)) as *mut c_void
}

/// Free user data created by [`into_user_data`]. No-op if null.
#[no_mangle]
pub extern "C" fn toxhook_user_data_free(user_data: *mut c_void) {
    if user_data.is_null() {
        return;
    }
    let _ = unsafe { Box::from_raw(user_data as *mut Trampoline) };
}

/// Borrow an engine buffer for the duration of the callback. Null means empty.
unsafe fn bytes<'a>(ptr: *const u8, len: usize) -> &'a [u8] {
    if ptr.is_null() || len == 0 {
        &[]
    } else {
        slice::from_raw_parts(ptr, len)
    }
}

fn forward(user_data: *mut c_void, raw: RawInvocation<'_>) {
    if user_data.is_null() {
        tracing::error!("engine callback without user data, dropping {raw:?}");
        return;
    }
    let trampoline = unsafe { &*(user_data as *const Trampoline) };
    // Unwinding into C is undefined behaviour.
    if panic::catch_unwind(AssertUnwindSafe(|| trampoline.invoke_or_park(raw))).is_err() {
        tracing::error!("panic while queueing engine callback");
    }
}

#[no_mangle]
pub extern "C" fn toxhook_on_self_connection_status(
    _tox: *mut c_void,
    connection: u32,
    user_data: *mut c_void,
) {
    forward(user_data, RawInvocation::SelfConnectionStatus { connection });
}

#[no_mangle]
pub extern "C" fn toxhook_on_friend_name(
    _tox: *mut c_void,
    friend: u32,
    name: *const u8,
    length: usize,
    user_data: *mut c_void,
) {
    let name = unsafe { bytes(name, length) };
    forward(user_data, RawInvocation::FriendName { friend, name });
}

#[no_mangle]
pub extern "C" fn toxhook_on_friend_status_message(
    _tox: *mut c_void,
    friend: u32,
    message: *const u8,
    length: usize,
    user_data: *mut c_void,
) {
    let message = unsafe { bytes(message, length) };
    forward(user_data, RawInvocation::FriendStatusMessage { friend, message });
}

#[no_mangle]
pub extern "C" fn toxhook_on_friend_status(
    _tox: *mut c_void,
    friend: u32,
    status: u32,
    user_data: *mut c_void,
) {
    forward(user_data, RawInvocation::FriendStatus { friend, status });
}

#[no_mangle]
pub extern "C" fn toxhook_on_friend_connection_status(
    _tox: *mut c_void,
    friend: u32,
    connection: u32,
    user_data: *mut c_void,
) {
    forward(
        user_data,
        RawInvocation::FriendConnectionStatus { friend, connection },
    );
}

#[no_mangle]
pub extern "C" fn toxhook_on_friend_typing(
    _tox: *mut c_void,
    friend: u32,
    typing: bool,
    user_data: *mut c_void,
) {
    forward(user_data, RawInvocation::FriendTyping { friend, typing });
}

#[no_mangle]
pub extern "C" fn toxhook_on_friend_read_receipt(
    _tox: *mut c_void,
    friend: u32,
    message_id: u32,
    user_data: *mut c_void,
) {
    forward(
        user_data,
        RawInvocation::FriendReadReceipt { friend, message_id },
    );
}

/// `public_key` points at `TOX_PUBLIC_KEY_SIZE` bytes.
#[no_mangle]
pub extern "C" fn toxhook_on_friend_request(
    _tox: *mut c_void,
    public_key: *const u8,
    message: *const u8,
    length: usize,
    user_data: *mut c_void,
) {
    let public_key = unsafe { bytes(public_key, crate::event::PUBLIC_KEY_SIZE) };
    let message = unsafe { bytes(message, length) };
    forward(
        user_data,
        RawInvocation::FriendRequest {
            public_key,
            message,
        },
    );
}

#[no_mangle]
pub extern "C" fn toxhook_on_friend_message(
    _tox: *mut c_void,
    friend: u32,
    kind: u32,
    message: *const u8,
    length: usize,
    user_data: *mut c_void,
) {
    let message = unsafe { bytes(message, length) };
    forward(
        user_data,
        RawInvocation::FriendMessage {
            friend,
            kind,
            message,
        },
    );
}

#[no_mangle]
pub extern "C" fn toxhook_on_file_recv_control(
    _tox: *mut c_void,
    friend: u32,
    file: u32,
    control: u32,
    user_data: *mut c_void,
) {
    forward(
        user_data,
        RawInvocation::FileRecvControl {
            friend,
            file,
            control,
        },
    );
}

#[no_mangle]
pub extern "C" fn toxhook_on_file_chunk_request(
    _tox: *mut c_void,
    friend: u32,
    file: u32,
    position: u64,
    length: usize,
    user_data: *mut c_void,
) {
    forward(
        user_data,
        RawInvocation::FileChunkRequest {
            friend,
            file,
            position,
            length: length as u64,
        },
    );
}

#[no_mangle]
pub extern "C" fn toxhook_on_file_recv(
    _tox: *mut c_void,
    friend: u32,
    file: u32,
    kind: u32,
    file_size: u64,
    filename: *const u8,
    filename_length: usize,
    user_data: *mut c_void,
) {
    let filename = unsafe { bytes(filename, filename_length) };
    forward(
        user_data,
        RawInvocation::FileRecv {
            friend,
            file,
            kind,
            file_size,
            filename,
        },
    );
}

#[no_mangle]
pub extern "C" fn toxhook_on_file_recv_chunk(
    _tox: *mut c_void,
    friend: u32,
    file: u32,
    position: u64,
    data: *const u8,
    length: usize,
    user_data: *mut c_void,
) {
    let data = unsafe { bytes(data, length) };
    forward(
        user_data,
        RawInvocation::FileRecvChunk {
            friend,
            file,
            position,
            data,
        },
    );
}

#[no_mangle]
pub extern "C" fn toxhook_on_friend_lossy_packet(
    _tox: *mut c_void,
    friend: u32,
    data: *const u8,
    length: usize,
    user_data: *mut c_void,
) {
    let data = unsafe { bytes(data, length) };
    forward(user_data, RawInvocation::FriendLossyPacket { friend, data });
}

#[no_mangle]
pub extern "C" fn toxhook_on_friend_lossless_packet(
    _tox: *mut c_void,
    friend: u32,
    data: *const u8,
    length: usize,
    user_data: *mut c_void,
) {
    let data = unsafe { bytes(data, length) };
    forward(user_data, RawInvocation::FriendLosslessPacket { friend, data });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::event::{Event, FileId, FriendId, PUBLIC_KEY_SIZE};
    use std::ptr;
    use crate::trampoline::Parked;
    use std::sync::atomic::AtomicBool;
    use std::sync::mpsc::{sync_channel, Receiver};
    use std::sync::{Arc, Mutex};

    fn user_data() -> (*mut c_void, Receiver<Event>, Arc<Mutex<Parked>>) {
        let (tx, rx) = sync_channel(16);
        let parked = Arc::new(Mutex::new(Parked::default()));
        let t = Trampoline::new(tx, 16, parked.clone(), Arc::new(AtomicBool::new(true)));
        (into_user_data(t), rx, parked)
    }

    #[test]
    fn chunk_hook_copies_engine_buffer() {
        let (ud, rx, _) = user_data();
        let mut buf = vec![1u8, 2, 3];
        toxhook_on_file_recv_chunk(ptr::null_mut(), 2, 7, 64, buf.as_ptr(), buf.len(), ud);
        buf.fill(0);
        assert_eq!(
            rx.try_recv().unwrap(),
            Event::FileRecvChunk {
                friend: FriendId(2),
                file: FileId(7),
                position: 64,
                data: vec![1, 2, 3],
            }
        );
        toxhook_user_data_free(ud);
    }

    #[test]
    fn null_buffer_is_empty_payload() {
        let (ud, rx, _) = user_data();
        toxhook_on_friend_lossless_packet(ptr::null_mut(), 1, ptr::null(), 10, ud);
        assert_eq!(
            rx.try_recv().unwrap(),
            Event::FriendLosslessPacket {
                friend: FriendId(1),
                data: Vec::new(),
            }
        );
        toxhook_user_data_free(ud);
    }

    #[test]
    fn friend_request_reads_fixed_key() {
        let (ud, rx, parked) = user_data();
        let key = [0xABu8; PUBLIC_KEY_SIZE];
        let msg = b"hi";
        toxhook_on_friend_request(ptr::null_mut(), key.as_ptr(), msg.as_ptr(), msg.len(), ud);
        match rx.try_recv().unwrap() {
            Event::FriendRequest { public_key, message } => {
                assert_eq!(public_key.as_bytes(), &key);
                assert_eq!(message, b"hi");
            }
            other => panic!("unexpected {other:?}"),
        }

        // A missing key cannot be decoded: parked, not queued.
        toxhook_on_friend_request(ptr::null_mut(), ptr::null(), msg.as_ptr(), msg.len(), ud);
        assert!(rx.try_recv().is_err());
        let (errors, _) = parked.lock().unwrap().take();
        assert_eq!(errors[0].kind(), ErrorKind::InvalidArgument);
        toxhook_user_data_free(ud);
    }

    #[test]
    fn null_user_data_is_ignored() {
        toxhook_on_friend_typing(ptr::null_mut(), 0, true, ptr::null_mut());
        toxhook_user_data_free(ptr::null_mut());
        assert_eq!(toxhook_abi_version(), ABI_VERSION);
    }
}
