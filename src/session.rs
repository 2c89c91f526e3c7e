use crate::cache::{CacheStats, DecryptionCache};
use crate::crypto::PassphraseCipher;
use crate::grades::GradeRow;
use crate::resolve::{Decryptor, Generation, GenerationToken, Resolution};
use crate::roster::RosterSnapshot;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::info;

pub const DEFAULT_CACHE_CAPACITY: usize = 2048;
pub const DEFAULT_WORKER_THREADS: usize = 4;

#[derive(Debug, Clone)]
pub struct GradeBatch {
    pub id: String,
    pub parsed_at: DateTime<Utc>,
    pub source: Option<String>,
    pub rows: Vec<GradeRow>,
}

impl GradeBatch {
    pub fn student_ids(&self) -> Vec<String> {
        self.rows.iter().map(|r| r.student_id.clone()).collect()
    }
}

/// Latest committed resolution plus whether a newer one is in flight.
#[derive(Debug, Clone, Default)]
pub struct ResolutionState {
    pub generation: u64,
    pub pending: bool,
    pub encrypted_detected: bool,
    pub passphrase_required: bool,
    pub prompt_issued: bool,
    pub failed: usize,
    pub mapping: HashMap<String, String>,
}

/// Everything a host session accumulates between `session.clear` calls.
pub struct Session {
    cipher: Arc<PassphraseCipher>,
    decryptor: Arc<Decryptor>,
    generation: Generation,
    resolution: Arc<Mutex<ResolutionState>>,
    pub batch: Option<GradeBatch>,
    pub roster: Option<RosterSnapshot>,
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl Session {
    pub fn new() -> Self {
        let cipher = Arc::new(PassphraseCipher::new());
        let cache = Arc::new(Mutex::new(DecryptionCache::new(DEFAULT_CACHE_CAPACITY)));
        let decryptor = Decryptor::new(cipher.clone(), cache, DEFAULT_WORKER_THREADS);
        Self {
            cipher,
            decryptor: Arc::new(decryptor),
            generation: Generation::new(),
            resolution: Arc::new(Mutex::new(ResolutionState::default())),
            batch: None,
            roster: None,
        }
    }

    pub fn cipher(&self) -> &PassphraseCipher {
        &self.cipher
    }

    pub fn is_encrypted(&self, value: &str) -> bool {
        self.decryptor.is_encrypted(value)
    }

    pub fn configure(&self, cache_capacity: usize, workers: usize) {
        self.decryptor
            .cache()
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .set_capacity(cache_capacity);
        self.decryptor.set_workers(workers);
    }

    /// `(len, capacity, stats)` of the decryption cache.
    pub fn cache_usage(&self) -> (usize, usize, CacheStats) {
        let cache = self
            .decryptor
            .cache()
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        (cache.len(), cache.capacity(), cache.stats())
    }

    pub fn resolution(&self) -> ResolutionState {
        lock_state(&self.resolution).clone()
    }

    pub fn current_generation(&self) -> u64 {
        self.generation.current()
    }

    /// Starts a resolution that supersedes any in flight. With `wait` the
    /// call returns after committing; otherwise it runs on a background
    /// thread and `resolution()` reports `pending` until it lands.
    pub fn start_resolution(&self, values: Vec<String>, passphrase: Option<String>, wait: bool) -> u64 {
        // Empty counts as absent, both for decryption and for prompting.
        let passphrase = passphrase.filter(|p| !p.is_empty());
        let token = self.generation.begin();
        let generation = token.id();
        {
            let mut state = lock_state(&self.resolution);
            state.generation = generation;
            state.pending = true;
        }

        let decryptor = Arc::clone(&self.decryptor);
        let resolution = Arc::clone(&self.resolution);
        let job = move || {
            let mut prompted = false;
            let result = decryptor.resolve_identifiers(
                &values,
                passphrase.as_deref(),
                &token,
                || prompted = true,
            );
            if prompted {
                info!(generation = token.id(), "encrypted identifiers detected; passphrase prompt needed");
            }
            commit(&resolution, &token, result, passphrase.is_some(), prompted);
        };

        if wait {
            job();
        } else {
            std::thread::spawn(job);
        }
        generation
    }

    pub fn clear(&mut self) {
        // Orphan any in-flight resolution before dropping its inputs.
        self.generation.begin();
        self.decryptor
            .cache()
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
        self.decryptor.reset();
        *lock_state(&self.resolution) = ResolutionState::default();
        self.batch = None;
        self.roster = None;
    }
}

fn lock_state(state: &Mutex<ResolutionState>) -> MutexGuard<'_, ResolutionState> {
    state.lock().unwrap_or_else(|e| e.into_inner())
}

fn commit(
    state: &Mutex<ResolutionState>,
    token: &GenerationToken,
    result: Option<Resolution>,
    had_passphrase: bool,
    prompted: bool,
) {
    let mut state = lock_state(state);
    // Checked under the lock so a newer start_resolution cannot interleave.
    if !token.is_current() {
        return;
    }
    let Some(r) = result else {
        return;
    };
    state.pending = false;
    state.encrypted_detected = r.encrypted_detected;
    state.passphrase_required = r.encrypted_detected && (!had_passphrase || r.failed > 0);
    state.prompt_issued = prompted;
    state.failed = r.failed;
    state.mapping = r.mapping;
}
