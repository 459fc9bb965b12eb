use std::sync::mpsc::{Receiver, Sender};
use std::sync::{Mutex, MutexGuard};

use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};

use super::channel::{BackgroundCommand, ForegroundCommand};
use crate::query::{ForegroundResult, Query};

fn lock_receiver(
    receiver: &Mutex<Receiver<BackgroundCommand>>,
) -> MutexGuard<'_, Receiver<BackgroundCommand>> {
    match receiver.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Body of one worker thread: run background phases until told to stop.
pub(crate) fn run_background_worker(
    receiver: &Mutex<Receiver<BackgroundCommand>>,
    foreground: &UnboundedSender<ForegroundCommand>,
) {
    loop {
        // Guard is released before the query runs so other workers can pick up work.
        let command = lock_receiver(receiver).recv();
        match command {
            Ok(BackgroundCommand::Run(mut query)) => {
                query.process_background();
                if let Err(returned) = foreground.send(ForegroundCommand::Complete(query)) {
                    tracing::warn!("foreground loop closed; dropping query");
                    drop(returned);
                }
            }
            Ok(BackgroundCommand::Shutdown) | Err(_) => break,
        }
    }
}

fn reschedule(background: &Sender<BackgroundCommand>, query: Box<Query>) {
    if let Err(returned) = background.send(BackgroundCommand::Run(query)) {
        tracing::warn!("worker threads closed; dropping query");
        drop(returned);
    }
}

/// The foreground loop: every caller-visible step of every query happens here, one at a time.
pub(crate) async fn run_foreground_loop(
    mut receiver: UnboundedReceiver<ForegroundCommand>,
    background: Sender<BackgroundCommand>,
) {
    while let Some(command) = receiver.recv().await {
        match command {
            ForegroundCommand::Complete(mut query) => match query.process_foreground() {
                ForegroundResult::Reschedule => reschedule(&background, query),
                ForegroundResult::SupplyData => {
                    let background = background.clone();
                    tokio::task::spawn_blocking(move || {
                        query.supply_stream_data();
                        reschedule(&background, query);
                    });
                }
                ForegroundResult::Discard => drop(query),
            },
            ForegroundCommand::Shutdown => break,
        }
    }
    tracing::debug!("foreground loop stopped");
}
