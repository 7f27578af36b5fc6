//! Shared helpers for integration tests.

#![allow(dead_code)]

pub mod socket_guard;

use std::path::Path;
use std::sync::{Arc, Mutex};

use streamfetch_core::download::HookError;
use streamfetch_core::{DownloadEngine, DownloadOptions, HttpClient, ProgressEvent, ProgressStatus};

/// Events recorded by [`engine_with_recorder`].
#[derive(Debug, Clone, Default)]
pub struct Recorded(Arc<Mutex<Vec<ProgressEvent>>>);

impl Recorded {
    pub fn events(&self) -> Vec<ProgressEvent> {
        self.0.lock().expect("recorder lock poisoned").clone()
    }

    pub fn finished(&self) -> Vec<ProgressEvent> {
        self.events()
            .into_iter()
            .filter(|e| e.status == ProgressStatus::Finished)
            .collect()
    }
}

/// Engine with the logging hook off and a hook that records every event.
pub fn engine_with_recorder(options: DownloadOptions) -> (DownloadEngine, Recorded) {
    let options = DownloadOptions {
        noprogress: true,
        ..options
    };
    let mut engine =
        DownloadEngine::new(HttpClient::new(), options).expect("options should be valid");
    let recorded = Recorded::default();
    let sink = recorded.clone();
    engine.add_progress_hook(move |event: &ProgressEvent| -> Result<(), HookError> {
        sink.0.lock().expect("recorder lock poisoned").push(event.clone());
        Ok(())
    });
    (engine, recorded)
}

/// Deterministic test payload.
pub fn payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

pub fn part_path(target: &Path) -> std::path::PathBuf {
    let mut name = target.as_os_str().to_owned();
    name.push(".part");
    name.into()
}
