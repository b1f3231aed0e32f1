use std::future::Future;
use std::time::Duration;

use log::{debug, error, info, warn};
use notify::{Event as NotifyEvent, Result as NotifyResult};
use tokio::sync::mpsc::Receiver;
use tokio::time::{sleep_until, Instant};

use crate::certs::CertificateReloader;
use crate::files_watcher::is_reload_trigger;

/// A single resettable timer. Triggering while a reload is pending moves the
/// deadline instead of scheduling a second reload.
#[derive(Debug)]
pub struct Debouncer {
    quiet_period: Duration,
    pending_reload: Option<Instant>,
}

impl Debouncer {
    pub fn new(quiet_period: Duration) -> Self {
        Debouncer {
            quiet_period,
            pending_reload: None,
        }
    }

    pub fn trigger(&mut self) {
        self.pending_reload = Some(Instant::now() + self.quiet_period);
    }

    pub fn is_pending(&self) -> bool {
        self.pending_reload.is_some()
    }

    /// Resolves when the quiet period elapsed without another trigger.
    /// Never resolves while nothing is pending. Cancel safe.
    pub async fn fired(&mut self) {
        match self.pending_reload {
            Some(deadline) => {
                sleep_until(deadline).await;
                self.pending_reload = None;
            }
            None => futures::future::pending().await,
        }
    }
}

/// Owns the only write path into the certificate store. Runs until
/// `shutdown` resolves. Without an event queue (or once it closes) the loop
/// only waits for shutdown.
pub async fn run_reload_loop<R, F>(
    events: Option<Receiver<NotifyResult<NotifyEvent>>>,
    mut debouncer: Debouncer,
    reloader: &R,
    shutdown: F,
) where
    R: CertificateReloader,
    F: Future<Output = ()>,
{
    let mut watching = events.is_some();
    let mut events = events;
    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            _ = debouncer.fired() => {
                if let Err(e) = reloader.reload() {
                    error!("reload cert error: {}", e);
                }
            }
            event = async {
                match events.as_mut() {
                    Some(rx) => rx.recv().await,
                    None => None,
                }
            }, if watching => {
                match event {
                    Some(Ok(event)) if is_reload_trigger(&event) => {
                        if debouncer.is_pending() {
                            debug!("Postponing certificate reload after {:?}", event);
                        } else {
                            debug!("Scheduling certificate reload after {:?}", event);
                        }
                        debouncer.trigger();
                    }
                    Some(Ok(event)) => {
                        debug!("Ignoring iNotify event: {:?}", event);
                    }
                    Some(Err(e)) => {
                        warn!("iNotify error: {:?}", e);
                    }
                    None => {
                        warn!("File watcher stopped, certificates will not be reloaded");
                        watching = false;
                    }
                }
            }
            _ = &mut shutdown => {
                info!("Stopping certificate reload loop");
                break;
            }
        }
    }
}
