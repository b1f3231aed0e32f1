use std::path::Path;

use futures::executor::block_on;
use log::{debug, info};
use notify::event::{ModifyKind, RenameMode};
use notify::{
    Config as NotifyConfig, Event as NotifyEvent, EventHandler, EventKind, RecommendedWatcher,
    RecursiveMode, Result as NotifyResult, Watcher as INotifyWatcher,
};
use tokio::sync::mpsc::{channel, Receiver, Sender};

use crate::errors::InjectorError;

const FILES_WATCHER_QUEUE_SIZE: usize = 64;

struct TokioSenderHandler {
    pub sender: Sender<NotifyResult<NotifyEvent>>,
}

impl EventHandler for TokioSenderHandler {
    fn handle_event(&mut self, event: NotifyResult<NotifyEvent>) {
        debug!("Got iNotify event: {:?}", event);
        block_on(async {
            let _ = self.sender.send(event).await;
        });
    }
}

/// Watches the directory holding the certificate files. Secret volumes are
/// updated by swapping a symlink, so the files themselves are never watched.
pub struct FilesWatcher {
    watcher: RecommendedWatcher,
    receiver: Receiver<NotifyResult<NotifyEvent>>,
}

impl FilesWatcher {
    pub fn new(dir: &Path) -> Result<Self, InjectorError> {
        let (tx, rx) = channel::<NotifyResult<NotifyEvent>>(FILES_WATCHER_QUEUE_SIZE);
        let mut watcher =
            RecommendedWatcher::new(TokioSenderHandler { sender: tx }, NotifyConfig::default())
                .map_err(|e| InjectorError::WatchSetupFailed(e.to_string()))?;
        watcher
            .watch(dir, RecursiveMode::NonRecursive)
            .map_err(|e| InjectorError::WatchSetupFailed(format!("{:?}: {}", dir, e)))?;
        info!("Watching for changes on path: {:?}", dir);
        Ok(FilesWatcher {
            watcher,
            receiver: rx,
        })
    }

    /// Splits the watcher from its event queue. Dropping the returned
    /// watcher stops the watch and closes the queue.
    pub fn into_parts(self) -> (RecommendedWatcher, Receiver<NotifyResult<NotifyEvent>>) {
        (self.watcher, self.receiver)
    }
}

/// Writes and creations qualify, and so does a rename into place, which is
/// how the `..data` symlink swap of a Secret volume shows up.
pub fn is_reload_trigger(event: &NotifyEvent) -> bool {
    match event.kind {
        EventKind::Create(_) => true,
        EventKind::Modify(ModifyKind::Data(_)) | EventKind::Modify(ModifyKind::Any) => true,
        EventKind::Modify(ModifyKind::Name(RenameMode::To))
        | EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => true,
        _ => false,
    }
}

/// Directory to watch for a certificate file.
pub fn watch_dir(cert_path: &Path) -> &Path {
    match cert_path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    }
}
