//! Bot behaviour: accept every friend request, echo messages back, auto-accept incoming
//! files into the download directory and thank the sender once a file is complete.

use std::collections::HashMap;
use std::fs::File;
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use anyhow::Context;
use toxhook_core::{
    Connection, EngineGateway, Event, EventKind, EventRouter, FileControl, FileId, FriendId,
    MessageType,
};

use crate::gateway::Presence;

/// Open download files, keyed like the transfer table.
pub struct Downloads {
    dir: PathBuf,
    open: HashMap<(FriendId, FileId), (PathBuf, File)>,
}

impl Downloads {
    pub fn new(dir: PathBuf) -> Self {
        Self {
            dir,
            open: HashMap::new(),
        }
    }

    fn start(&mut self, friend: FriendId, file: FileId, filename: &[u8]) -> anyhow::Result<()> {
        std::fs::create_dir_all(&self.dir)
            .with_context(|| format!("creating {}", self.dir.display()))?;
        let path = self
            .dir
            .join(format!("{}_{}_{}", friend, file, safe_name(filename)));
        let f = File::create(&path).with_context(|| format!("creating {}", path.display()))?;
        self.open.insert((friend, file), (path, f));
        Ok(())
    }

    /// Write a chunk at its position; an empty chunk closes the file. Returns the path once
    /// finished.
    fn write(
        &mut self,
        friend: FriendId,
        file: FileId,
        position: u64,
        data: &[u8],
    ) -> anyhow::Result<Option<PathBuf>> {
        if data.is_empty() {
            let Some((path, mut f)) = self.open.remove(&(friend, file)) else {
                return Ok(None);
            };
            f.flush()?;
            return Ok(Some(path));
        }
        let (path, f) = self
            .open
            .get_mut(&(friend, file))
            .with_context(|| format!("no open download for friend {friend} file {file}"))?;
        f.seek(SeekFrom::Start(position))
            .and_then(|_| f.write_all(data))
            .with_context(|| format!("writing {}", path.display()))?;
        Ok(None)
    }

    fn abandon(&mut self, friend: FriendId, file: FileId) -> Option<PathBuf> {
        self.open.remove(&(friend, file)).map(|(path, _)| path)
    }

    /// Close every download from `friend`, returning the partial files left behind.
    fn abandon_friend(&mut self, friend: FriendId) -> Vec<PathBuf> {
        let keys: Vec<_> = self.open.keys().filter(|(f, _)| *f == friend).copied().collect();
        let mut paths: Vec<PathBuf> = keys
            .into_iter()
            .filter_map(|(f, file)| self.abandon(f, file))
            .collect();
        paths.sort();
        paths
    }
}

const THANKS: &[u8] = b"Thanks!";

/// Last path component of an engine-supplied filename.
fn safe_name(filename: &[u8]) -> String {
    let name = String::from_utf8_lossy(filename);
    Path::new(name.as_ref())
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .filter(|n| !n.is_empty())
        .unwrap_or_else(|| "unnamed".to_string())
}

/// Register every handler on `router`.
pub fn install<G: EngineGateway>(
    router: &EventRouter<G>,
    download_dir: PathBuf,
    presence: Presence,
) -> toxhook_core::Result<()> {
    router.subscribe(EventKind::SelfConnectionStatus, (), |_, ev| {
        if let Event::SelfConnectionStatus { status } = ev {
            tracing::info!(?status, "self connection");
        }
        Ok(())
    })?;

    let downloads = Arc::new(Mutex::new(Downloads::new(download_dir)));
    let commands = router.commands();

    router.subscribe(
        EventKind::FriendConnectionStatus,
        (presence, downloads.clone()),
        |(presence, downloads), ev| {
            if let Event::FriendConnectionStatus { friend, status } = *ev {
                presence.set(friend, status);
                tracing::info!(%friend, ?status, "friend connection");
                if status == Connection::None {
                    for path in lock(downloads).abandon_friend(friend) {
                        tracing::info!(%friend, "went offline, leaving partial {}", path.display());
                    }
                }
            }
            Ok(())
        },
    )?;

    router.subscribe(EventKind::FriendRequest, commands.clone(), |commands, ev| {
        if let Event::FriendRequest {
            public_key,
            message,
        } = ev
        {
            tracing::info!(
                key = %public_key,
                message = %String::from_utf8_lossy(message),
                "friend request, accepting"
            );
            commands.add_friend_norequest(*public_key)?;
        }
        Ok(())
    })?;

    router.subscribe(EventKind::FriendMessage, commands.clone(), |commands, ev| {
        if let Event::FriendMessage {
            friend,
            kind,
            message,
        } = ev
        {
            let text = String::from_utf8_lossy(message);
            match kind {
                MessageType::Normal => tracing::info!(%friend, "message: {text}"),
                MessageType::Action => tracing::info!(%friend, "action: {text}"),
            }
            commands.send_message(*friend, *kind, message.clone())?;
        }
        Ok(())
    })?;

    router.subscribe(
        EventKind::FileRecv,
        (downloads.clone(), commands.clone()),
        |(downloads, commands), ev| {
            if let Event::FileRecv {
                friend,
                file,
                filename,
                file_size,
                ..
            } = ev
            {
                lock(downloads).start(*friend, *file, filename)?;
                commands.accept(*friend, *file)?;
                tracing::info!(%friend, %file, file_size, "accepting file");
            }
            Ok(())
        },
    )?;

    router.subscribe(
        EventKind::FileRecvChunk,
        (downloads.clone(), commands),
        |(downloads, commands), ev| {
            if let Event::FileRecvChunk {
                friend,
                file,
                position,
                data,
            } = ev
            {
                if let Some(path) = lock(downloads).write(*friend, *file, *position, data)? {
                    tracing::info!(%friend, %file, "written {}", path.display());
                    commands.send_message(*friend, MessageType::Normal, THANKS.to_vec())?;
                }
            }
            Ok(())
        },
    )?;

    router.subscribe(EventKind::FileRecvControl, downloads, |downloads, ev| {
        if let Event::FileRecvControl {
            friend,
            file,
            control: FileControl::Cancel,
        } = *ev
        {
            if let Some(path) = lock(downloads).abandon(friend, file) {
                tracing::info!(%friend, %file, "cancelled, leaving partial {}", path.display());
            }
        }
        Ok(())
    })?;

    Ok(())
}

fn lock(downloads: &Mutex<Downloads>) -> std::sync::MutexGuard<'_, Downloads> {
    downloads.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::LoggingGateway;
    use toxhook_core::{Config, RawInvocation, SessionStatus, TraceReader, TraceWriter};

    fn scratch_dir(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("toxhook-{tag}-{}", std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        dir
    }

    #[test]
    fn safe_name_strips_directories() {
        assert_eq!(safe_name(b"../../etc/passwd"), "passwd");
        assert_eq!(safe_name(b"photo.jpg"), "photo.jpg");
        assert_eq!(safe_name(b""), "unnamed");
        assert_eq!(safe_name(b".."), "unnamed");
    }

    #[test]
    fn replayed_trace_writes_download() {
        let dir = scratch_dir("download");
        let presence = Presence::default();
        let mut router = EventRouter::new(LoggingGateway::new(presence.clone()), Config::default());
        install(&router, dir.clone(), presence.clone()).unwrap();

        let mut w = TraceWriter::new();
        for raw in [
            RawInvocation::FriendConnectionStatus {
                friend: 0,
                connection: 2,
            },
            RawInvocation::FileRecv {
                friend: 0,
                file: 1,
                kind: 0,
                file_size: 11,
                filename: b"hello.txt",
            },
            RawInvocation::FileRecvChunk {
                friend: 0,
                file: 1,
                position: 0,
                data: b"hello ",
            },
            RawInvocation::FileRecvChunk {
                friend: 0,
                file: 1,
                position: 6,
                data: b"world",
            },
            RawInvocation::FileRecvChunk {
                friend: 0,
                file: 1,
                position: 11,
                data: b"",
            },
        ] {
            w.record(&raw).unwrap();
        }
        let trace = w.into_bytes();

        let t = router.trampoline();
        for raw in TraceReader::new(&trace) {
            t.invoke(raw.unwrap()).unwrap();
        }
        let drained = router.drain_pending();
        assert!(drained.errors.is_empty(), "{:?}", drained.errors);
        // The accept, then the thank-you once the file is complete.
        assert_eq!(drained.commands, 2);
        assert_eq!(router.gateway().messages_sent(), 1);

        assert!(presence.get(FriendId(0)).is_online());
        assert_eq!(
            router.session(FriendId(0), FileId(1)).unwrap().status(),
            SessionStatus::Completed
        );
        let written = std::fs::read(dir.join("0_1_hello.txt")).unwrap();
        assert_eq!(written, b"hello world");
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn requests_are_accepted_and_messages_echoed() {
        let presence = Presence::default();
        let mut router = EventRouter::new(LoggingGateway::new(presence.clone()), Config::default());
        install(&router, scratch_dir("social"), presence).unwrap();

        let t = router.trampoline();
        t.invoke(RawInvocation::FriendRequest {
            public_key: &[7; 32],
            message: b"let me in",
        })
        .unwrap();
        t.invoke(RawInvocation::FriendConnectionStatus {
            friend: 0,
            connection: 1,
        })
        .unwrap();
        t.invoke(RawInvocation::FriendMessage {
            friend: 0,
            kind: 0,
            message: b"ping",
        })
        .unwrap();
        let drained = router.drain_pending();
        assert!(drained.errors.is_empty(), "{:?}", drained.errors);
        assert_eq!(drained.commands, 2);
        assert_eq!(router.gateway().friends(), &[toxhook_core::PublicKey([7; 32])]);
        assert_eq!(router.gateway().messages_sent(), 1);
    }

    #[test]
    fn offline_friend_loses_open_downloads() {
        let dir = scratch_dir("offline");
        let presence = Presence::default();
        let mut router = EventRouter::new(LoggingGateway::new(presence.clone()), Config::default());
        let cancels = Arc::new(Mutex::new(0));
        router
            .subscribe(EventKind::FileRecvControl, cancels.clone(), |cancels, ev| {
                if let Event::FileRecvControl {
                    control: FileControl::Cancel,
                    ..
                } = ev
                {
                    *cancels.lock().unwrap() += 1;
                }
                Ok(())
            })
            .unwrap();
        install(&router, dir.clone(), presence).unwrap();

        let t = router.trampoline();
        t.invoke(RawInvocation::FriendConnectionStatus {
            friend: 3,
            connection: 2,
        })
        .unwrap();
        t.invoke(RawInvocation::FileRecv {
            friend: 3,
            file: 0,
            kind: 0,
            file_size: 8,
            filename: b"half.bin",
        })
        .unwrap();
        t.invoke(RawInvocation::FileRecvChunk {
            friend: 3,
            file: 0,
            position: 0,
            data: b"half",
        })
        .unwrap();
        t.invoke(RawInvocation::FriendConnectionStatus {
            friend: 3,
            connection: 0,
        })
        .unwrap();
        let drained = router.drain_pending();
        assert!(drained.errors.is_empty(), "{:?}", drained.errors);

        assert_eq!(
            router.session(FriendId(3), FileId(0)).unwrap().status(),
            SessionStatus::Cancelled
        );
        assert_eq!(*cancels.lock().unwrap(), 1);
        // Partial data stays on disk; no thank-you for an unfinished file.
        assert_eq!(std::fs::read(dir.join("3_0_half.bin")).unwrap(), b"half");
        assert_eq!(router.gateway().messages_sent(), 0);
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn chunks_land_at_their_position() {
        let dir = scratch_dir("seek");
        let mut downloads = Downloads::new(dir.clone());
        downloads.start(FriendId(1), FileId(2), b"out").unwrap();
        downloads.write(FriendId(1), FileId(2), 3, b"def").unwrap();
        downloads.write(FriendId(1), FileId(2), 0, b"abc").unwrap();
        let path = downloads.write(FriendId(1), FileId(2), 6, b"").unwrap().unwrap();
        assert_eq!(std::fs::read(path).unwrap(), b"abcdef");
        assert!(downloads.abandon_friend(FriendId(1)).is_empty());
        let _ = std::fs::remove_dir_all(&dir);
    }
}
