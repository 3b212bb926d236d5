//! Shared test utilities for the thumbdrop test suite.
//!
//! Provides synthetic image generators and [`MemoryStore`], an in-memory
//! remote with fault injection for publisher and upload tests.
//!
//! # Usage
//!
//! ```rust
//! use crate::test_helpers::*;
//!
//! let jpeg = noise_jpeg(2400, 1800, 95);
//! let store = MemoryStore::new().failing_put("/o/f/thumbnails/tn_a.jpg");
//!
//! // ... run an upload against `store` ...
//!
//! assert!(store.contains("/o/f/a.jpg"));
//! assert!(!store.contains("/o/f/thumbnails/tn_a.jpg"));
//! ```

use crate::remote::{RemoteError, RemoteSession, RemoteStore};
use image::{ImageEncoder, RgbImage};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

// =========================================================================
// Synthetic images
// =========================================================================

/// Smooth RGB gradient. Compresses well.
pub fn gradient_image(width: u32, height: u32) -> RgbImage {
    RgbImage::from_fn(width, height, |x, y| {
        image::Rgb([
            (x * 255 / width.max(1)) as u8,
            (y * 255 / height.max(1)) as u8,
            128,
        ])
    })
}

/// Per-pixel pseudo-random noise. Compresses badly, so even modest
/// dimensions produce large JPEGs.
pub fn noise_image(width: u32, height: u32) -> RgbImage {
    let mut state: u32 = 0x9E37_79B9;
    let mut next = move || {
        state ^= state << 13;
        state ^= state >> 17;
        state ^= state << 5;
        state
    };
    RgbImage::from_fn(width, height, |_, _| {
        let v = next();
        image::Rgb([v as u8, (v >> 8) as u8, (v >> 16) as u8])
    })
}

pub fn encode_jpeg(img: &RgbImage, quality: u8) -> Vec<u8> {
    let mut buf = Vec::new();
    image::codecs::jpeg::JpegEncoder::new_with_quality(&mut buf, quality)
        .write_image(
            img.as_raw(),
            img.width(),
            img.height(),
            image::ExtendedColorType::Rgb8,
        )
        .unwrap();
    buf
}

pub fn gradient_jpeg(width: u32, height: u32, quality: u8) -> Vec<u8> {
    encode_jpeg(&gradient_image(width, height), quality)
}

pub fn noise_jpeg(width: u32, height: u32, quality: u8) -> Vec<u8> {
    encode_jpeg(&noise_image(width, height), quality)
}

pub fn gradient_png(width: u32, height: u32) -> Vec<u8> {
    let img = gradient_image(width, height);
    let mut buf = Vec::new();
    image::codecs::png::PngEncoder::new(&mut buf)
        .write_image(
            img.as_raw(),
            width,
            height,
            image::ExtendedColorType::Rgb8,
        )
        .unwrap();
    buf
}

// =========================================================================
// In-memory remote store
// =========================================================================

#[derive(Debug, Default)]
struct MemoryState {
    dirs: BTreeSet<String>,
    files: BTreeMap<String, Vec<u8>>,
    ops: Vec<String>,
    connects: usize,
    closes: usize,
    mkdirs_in_flight: usize,
    max_mkdirs_in_flight: usize,
    puts_in_flight: usize,
    max_puts_in_flight: usize,
    sessions_open: usize,
    max_sessions_open: usize,
}

#[derive(Debug, Clone, Default)]
struct Faults {
    unreachable: bool,
    fail_dirs: HashSet<String>,
    fail_puts: HashSet<String>,
    put_delay: Duration,
    mkdir_delay: Duration,
}

/// Remote store kept in memory, with scripted failures.
///
/// Directory creation is non-recursive like a real remote: a put or mkdir
/// whose parent is missing fails.
#[derive(Debug, Clone)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
    faults: Faults,
    atomic: bool,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            state: Arc::default(),
            faults: Faults::default(),
            atomic: true,
        }
    }

    /// Every `connect` fails.
    pub fn unreachable(mut self) -> Self {
        self.faults.unreachable = true;
        self
    }

    pub fn failing_dir(mut self, path: &str) -> Self {
        self.faults.fail_dirs.insert(path.to_string());
        self
    }

    pub fn failing_put(mut self, path: &str) -> Self {
        self.faults.fail_puts.insert(path.to_string());
        self
    }

    pub fn with_put_delay(mut self, delay: Duration) -> Self {
        self.faults.put_delay = delay;
        self
    }

    pub fn with_mkdir_delay(mut self, delay: Duration) -> Self {
        self.faults.mkdir_delay = delay;
        self
    }

    /// Pre-create a directory.
    pub fn with_dir(self, path: &str) -> Self {
        self.state.lock().unwrap().dirs.insert(path.to_string());
        self
    }

    /// Report `mkdir` as unsafe under concurrency.
    pub fn non_atomic(mut self) -> Self {
        self.atomic = false;
        self
    }

    pub fn contains(&self, path: &str) -> bool {
        let state = self.state.lock().unwrap();
        state.files.contains_key(path) || state.dirs.contains(path)
    }

    pub fn file(&self, path: &str) -> Option<Vec<u8>> {
        self.state.lock().unwrap().files.get(path).cloned()
    }

    pub fn dirs(&self) -> Vec<String> {
        self.state.lock().unwrap().dirs.iter().cloned().collect()
    }

    pub fn files(&self) -> Vec<String> {
        self.state.lock().unwrap().files.keys().cloned().collect()
    }

    /// `mkdir <path>` / `put <path>` in call order.
    pub fn ops(&self) -> Vec<String> {
        self.state.lock().unwrap().ops.clone()
    }

    pub fn connects(&self) -> usize {
        self.state.lock().unwrap().connects
    }

    pub fn closes(&self) -> usize {
        self.state.lock().unwrap().closes
    }

    pub fn max_concurrent_mkdirs(&self) -> usize {
        self.state.lock().unwrap().max_mkdirs_in_flight
    }

    pub fn max_concurrent_puts(&self) -> usize {
        self.state.lock().unwrap().max_puts_in_flight
    }

    pub fn max_open_sessions(&self) -> usize {
        self.state.lock().unwrap().max_sessions_open
    }
}

impl RemoteStore for MemoryStore {
    type Session = MemorySession;

    fn connect(&self) -> Result<MemorySession, RemoteError> {
        if self.faults.unreachable {
            return Err(RemoteError::Connect("memory store unreachable".into()));
        }
        {
            let mut state = self.state.lock().unwrap();
            state.connects += 1;
            state.sessions_open += 1;
            state.max_sessions_open = state.max_sessions_open.max(state.sessions_open);
        }
        Ok(MemorySession {
            state: Arc::clone(&self.state),
            faults: self.faults.clone(),
            open: true,
        })
    }

    fn atomic_mkdir(&self) -> bool {
        self.atomic
    }
}

#[derive(Debug)]
pub struct MemorySession {
    state: Arc<Mutex<MemoryState>>,
    faults: Faults,
    open: bool,
}

fn parent_of(path: &str) -> &str {
    match path.rfind('/') {
        Some(0) | None => "/",
        Some(pos) => &path[..pos],
    }
}

impl RemoteSession for MemorySession {
    fn ensure_dir(&mut self, path: &str) -> Result<(), RemoteError> {
        if !self.open {
            return Err(RemoteError::SessionClosed);
        }
        {
            let mut state = self.state.lock().unwrap();
            state.ops.push(format!("mkdir {path}"));
            state.mkdirs_in_flight += 1;
            state.max_mkdirs_in_flight = state.max_mkdirs_in_flight.max(state.mkdirs_in_flight);
        }
        std::thread::sleep(self.faults.mkdir_delay);

        let mut state = self.state.lock().unwrap();
        state.mkdirs_in_flight -= 1;
        let parent = parent_of(path);
        if self.faults.fail_dirs.contains(path) {
            return Err(RemoteError::Failed(format!("mkdir {path} refused")));
        }
        if parent != "/" && !state.dirs.contains(parent) {
            return Err(RemoteError::Failed(format!("no parent for {path}")));
        }
        state.dirs.insert(path.to_string());
        Ok(())
    }

    fn put_file(&mut self, local: &Path, remote: &str) -> Result<(), RemoteError> {
        if !self.open {
            return Err(RemoteError::SessionClosed);
        }
        {
            let mut state = self.state.lock().unwrap();
            state.ops.push(format!("put {remote}"));
            state.puts_in_flight += 1;
            state.max_puts_in_flight = state.max_puts_in_flight.max(state.puts_in_flight);
        }
        std::thread::sleep(self.faults.put_delay);
        self.state.lock().unwrap().puts_in_flight -= 1;

        if self.faults.fail_puts.contains(remote) {
            return Err(RemoteError::Failed(format!("put {remote} refused")));
        }
        let bytes = std::fs::read(local)?;
        let mut state = self.state.lock().unwrap();
        if !state.dirs.contains(parent_of(remote)) {
            return Err(RemoteError::Failed(format!("no directory for {remote}")));
        }
        state.files.insert(remote.to_string(), bytes);
        Ok(())
    }

    fn close(&mut self) {
        if self.open {
            let mut state = self.state.lock().unwrap();
            state.closes += 1;
            state.sessions_open -= 1;
        }
        self.open = false;
    }
}

/// Write `bytes` to `dir/name` and return the path.
pub fn write_file(dir: &Path, name: &str, bytes: &[u8]) -> std::path::PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, bytes).unwrap();
    path
}

/// Every regular file under `dir`, recursively.
pub fn files_under(dir: &Path) -> Vec<std::path::PathBuf> {
    let mut files = Vec::new();
    let Ok(entries) = std::fs::read_dir(dir) else {
        return files;
    };
    for entry in entries.map(Result::unwrap) {
        let path = entry.path();
        if path.is_dir() {
            files.extend(files_under(&path));
        } else {
            files.push(path);
        }
    }
    files
}
