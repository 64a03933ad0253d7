//! Decode-Worker fuer Sequencer
//!
//! Die Netzwerk-Loops dekodieren nie selbst. Sie reichen einen Sequencer
//! ueber einen Kanal an einen kleinen Pool von Worker-Threads weiter, die
//! [`PlaybackSequencer::execute_pending`] aufrufen. Ob ein Sequencer
//! eingeplant werden muss, entscheidet [`PlaybackSequencer::enqueue_audio`].

use std::sync::Arc;
use std::thread::JoinHandle;

use crossbeam_channel::{unbounded, Sender};
use tracing::{debug, info, warn};

use crate::error::{AudioError, AudioResult};
use crate::sequencer::PlaybackSequencer;

/// Pool von Decode-Threads
pub struct DecodeEventLoop {
    sender: Option<Sender<Arc<PlaybackSequencer>>>,
    workers: Vec<JoinHandle<()>>,
}

impl DecodeEventLoop {
    /// Startet `threads` Worker (mindestens einen)
    pub fn starten(threads: usize) -> AudioResult<Self> {
        let (sender, empfaenger) = unbounded::<Arc<PlaybackSequencer>>();
        let mut workers = Vec::with_capacity(threads.max(1));

        for index in 0..threads.max(1) {
            let empfaenger = empfaenger.clone();
            let handle = std::thread::Builder::new()
                .name(format!("audio decode #{index}"))
                .spawn(move || {
                    for sequencer in empfaenger.iter() {
                        sequencer.execute_pending();
                    }
                    debug!(worker = index, "Decode-Worker beendet");
                })
                .map_err(|e| AudioError::Konfiguration(format!("Decode-Thread: {e}")))?;
            workers.push(handle);
        }

        info!(threads = workers.len(), "Decode-Worker gestartet");
        Ok(Self {
            sender: Some(sender),
            workers,
        })
    }

    /// Plant die Ausfuehrung eines Sequencers ein
    ///
    /// Laeuft der Pool nicht mehr, wird direkt im aufrufenden Thread ausgefuehrt.
    pub fn planen(&self, sequencer: Arc<PlaybackSequencer>) {
        match &self.sender {
            Some(sender) => {
                if let Err(e) = sender.send(sequencer) {
                    warn!("Decode-Worker nicht erreichbar, fuehre direkt aus");
                    e.into_inner().execute_pending();
                }
            }
            None => sequencer.execute_pending(),
        }
    }

    /// Anzahl laufender Worker
    pub fn worker_anzahl(&self) -> usize {
        self.workers.len()
    }

    /// Schliesst den Kanal und wartet auf alle Worker
    pub fn stoppen(&mut self) {
        self.sender.take();
        for handle in self.workers.drain(..) {
            if handle.join().is_err() {
                warn!("Decode-Worker ist abgestuerzt");
            }
        }
    }
}

impl Drop for DecodeEventLoop {
    fn drop(&mut self) {
        self.stoppen();
    }
}
