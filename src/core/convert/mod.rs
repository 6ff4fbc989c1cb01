//! # Converter Module
//!
//! Turns raw decode buffers into display-ready [`PresentImage`]s on a
//! dedicated worker thread, decoupling buffer lifetimes from the decode
//! pool. On failure (or null input) it emits the empty placeholder plus
//! the original error. It never touches any cache.

use crate::core::decode::DecodedBuffer;
use crate::events::PresentImage;
use crossbeam_channel::{unbounded, Receiver, Sender};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use tracing::warn;

/// One buffer handed off for conversion.
#[derive(Debug)]
pub struct ConvertJob {
    /// Canonical key for the source path.
    pub key: String,
    pub path: PathBuf,
    pub buffer: Option<DecodedBuffer>,
    pub error: Option<String>,
}

/// A finished conversion. `image` is the empty placeholder when
/// `error` is set.
#[derive(Debug, Clone)]
pub struct Converted {
    pub key: String,
    pub path: PathBuf,
    pub image: PresentImage,
    pub error: Option<String>,
}

/// Callback invoked on the converter thread for each finished job.
pub type ConvertCallback = Arc<dyn Fn(Converted) + Send + Sync>;

enum ConvertMsg {
    Job(ConvertJob),
    Shutdown,
}

/// Dedicated pixel-to-presentation conversion worker.
pub struct Converter {
    tx: Sender<ConvertMsg>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl Converter {
    /// Spawn the converter thread.
    pub fn spawn(on_converted: ConvertCallback) -> Self {
        let (tx, rx) = unbounded();
        let handle = thread::Builder::new()
            .name("pix-convert".into())
            .spawn(move || convert_loop(rx, on_converted))
            .expect("failed to spawn converter thread");

        Self {
            tx,
            handle: Mutex::new(Some(handle)),
        }
    }

    /// Queue a buffer for conversion. Non-blocking.
    pub fn submit(&self, job: ConvertJob) {
        let _ = self.tx.send(ConvertMsg::Job(job));
    }

    /// Stop the worker and wait for it to finish queued jobs.
    pub fn shutdown(&self) {
        let _ = self.tx.send(ConvertMsg::Shutdown);
        if let Ok(mut guard) = self.handle.lock() {
            if let Some(handle) = guard.take() {
                if handle.join().is_err() {
                    warn!("converter thread panicked on shutdown");
                }
            }
        }
    }
}

fn convert_loop(rx: Receiver<ConvertMsg>, on_converted: ConvertCallback) {
    for msg in rx.iter() {
        match msg {
            ConvertMsg::Job(job) => on_converted(convert(job)),
            ConvertMsg::Shutdown => return,
        }
    }
}

/// Convert one buffer. Ownership of the pixel data moves across the
/// thread handoff, so exactly one buffer copy exists at any time.
fn convert(job: ConvertJob) -> Converted {
    let ConvertJob {
        key,
        path,
        buffer,
        error,
    } = job;

    let buffer = match buffer {
        Some(buffer) => buffer,
        None => {
            return Converted {
                key,
                path,
                image: PresentImage::empty(),
                error: Some(error.unwrap_or_else(|| "decode produced no buffer".to_string())),
            };
        }
    };

    match buffer {
        DecodedBuffer::Pixels { rgba, width, height } => {
            if rgba.len() != (width as usize) * (height as usize) * 4 {
                return Converted {
                    key,
                    path,
                    image: PresentImage::empty(),
                    error: Some("pixel buffer does not match dimensions".to_string()),
                };
            }
            Converted {
                key,
                path,
                image: PresentImage {
                    width,
                    height,
                    rgba,
                },
                error: None,
            }
        }
        // Encoded thumbnail bytes can also be presented; decode them here
        // so the engine can serve thumbnails as images when asked.
        DecodedBuffer::Encoded { bytes, .. } => match image::load_from_memory(&bytes) {
            Ok(decoded) => {
                let rgba = decoded.to_rgba8();
                let (width, height) = rgba.dimensions();
                Converted {
                    key,
                    path,
                    image: PresentImage {
                        width,
                        height,
                        rgba: rgba.into_raw(),
                    },
                    error: None,
                }
            }
            Err(e) => Converted {
                key,
                path,
                image: PresentImage::empty(),
                error: Some(e.to_string()),
            },
        },
    }
}
