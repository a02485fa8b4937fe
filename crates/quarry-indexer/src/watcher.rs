use crate::FileEvent;
use anyhow::Result;
use notify::{Config as NotifyConfig, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{Receiver, RecvTimeoutError, Sender, channel};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

/// Recursive file watcher that collapses raw notification bursts into one
/// debounced `FileEvent` per path. Dropping the watcher ends the stream.
pub struct FileWatcher {
    _watcher: RecommendedWatcher,
    _debouncer: JoinHandle<()>,
}

impl FileWatcher {
    pub fn watch(root: &Path, debounce: Duration) -> Result<(Self, Receiver<FileEvent>)> {
        let (raw_tx, raw_rx) = channel();
        let mut watcher = RecommendedWatcher::new(raw_tx, NotifyConfig::default())?;
        watcher.watch(root, RecursiveMode::Recursive)?;

        let (tx, rx) = channel();
        let debouncer = std::thread::spawn(move || debounce_loop(raw_rx, tx, debounce));

        Ok((
            Self {
                _watcher: watcher,
                _debouncer: debouncer,
            },
            rx,
        ))
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Pending {
    Created,
    Modified,
    Deleted,
}

fn debounce_loop(
    raw: Receiver<notify::Result<notify::Event>>,
    out: Sender<FileEvent>,
    window: Duration,
) {
    let mut pending: HashMap<PathBuf, (Pending, Instant)> = HashMap::new();

    loop {
        match raw.recv_timeout(window) {
            Ok(Ok(event)) => {
                let kind = match event.kind {
                    EventKind::Create(_) => Pending::Created,
                    EventKind::Modify(_) | EventKind::Any => Pending::Modified,
                    EventKind::Remove(_) => Pending::Deleted,
                    _ => continue,
                };
                for path in event.paths {
                    let now = Instant::now();
                    pending
                        .entry(path)
                        .and_modify(|(existing, at)| {
                            *existing = merge(*existing, kind);
                            *at = now;
                        })
                        .or_insert((kind, now));
                }
            }
            Ok(Err(_)) => continue,
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => {
                for (path, (kind, _)) in pending.drain() {
                    let _ = out.send(to_event(kind, path));
                }
                return;
            }
        }

        let now = Instant::now();
        let matured: Vec<PathBuf> = pending
            .iter()
            .filter(|(_, (_, at))| now.duration_since(*at) >= window)
            .map(|(path, _)| path.clone())
            .collect();
        for path in matured {
            if let Some((kind, _)) = pending.remove(&path)
                && out.send(to_event(kind, path)).is_err()
            {
                return;
            }
        }
    }
}

/// A create followed by modifications is still a create; a delete wins over
/// everything that preceded it.
fn merge(existing: Pending, incoming: Pending) -> Pending {
    match (existing, incoming) {
        (_, Pending::Deleted) => Pending::Deleted,
        (Pending::Created, _) => Pending::Created,
        (_, incoming) => incoming,
    }
}

fn to_event(kind: Pending, path: PathBuf) -> FileEvent {
    match kind {
        Pending::Created => FileEvent::Created(path),
        Pending::Modified => FileEvent::Modified(path),
        Pending::Deleted => FileEvent::Deleted(path),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_prefers_delete_then_create() {
        assert_eq!(merge(Pending::Created, Pending::Modified), Pending::Created);
        assert_eq!(merge(Pending::Modified, Pending::Deleted), Pending::Deleted);
        assert_eq!(merge(Pending::Created, Pending::Deleted), Pending::Deleted);
        assert_eq!(
            merge(Pending::Modified, Pending::Modified),
            Pending::Modified
        );
    }

    #[test]
    fn watcher_reports_new_files() {
        let tmp = tempfile::tempdir().expect("tmp");
        let (watcher, rx) =
            FileWatcher::watch(tmp.path(), Duration::from_millis(100)).expect("watch");

        let file = tmp.path().join("fresh.swift");
        std::thread::sleep(Duration::from_millis(50));
        std::fs::write(&file, "struct Fresh {}\n").expect("write");

        // Directory-level noise may arrive first; wait for the file itself.
        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let event = rx.recv_timeout(remaining).expect("debounced event");
            if event.path() == file.as_path() {
                assert!(matches!(
                    event,
                    FileEvent::Created(_) | FileEvent::Modified(_)
                ));
                break;
            }
        }
        drop(watcher);
    }

    #[test]
    fn dropping_the_watcher_closes_the_stream() {
        let tmp = tempfile::tempdir().expect("tmp");
        let (watcher, rx) =
            FileWatcher::watch(tmp.path(), Duration::from_millis(50)).expect("watch");
        drop(watcher);
        // The debouncer flushes whatever is pending, then disconnects.
        loop {
            match rx.recv_timeout(Duration::from_secs(5)) {
                Err(RecvTimeoutError::Disconnected) => break,
                Ok(_) => continue,
                Err(other) => panic!("stream did not close: {other:?}"),
            }
        }
    }
}
