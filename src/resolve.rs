use crate::cache::{decryption_cache_key, DecryptionCache};
use crate::crypto::IdCipher;
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{debug, info};

/// Monotonic resolution counter. Beginning a resolution supersedes every
/// earlier token; results carrying a stale token are never committed.
#[derive(Debug, Clone, Default)]
pub struct Generation {
    current: Arc<AtomicU64>,
}

#[derive(Debug, Clone)]
pub struct GenerationToken {
    counter: Arc<AtomicU64>,
    id: u64,
}

impl Generation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn begin(&self) -> GenerationToken {
        let id = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        GenerationToken {
            counter: Arc::clone(&self.current),
            id,
        }
    }

    pub fn current(&self) -> u64 {
        self.current.load(Ordering::SeqCst)
    }
}

impl GenerationToken {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn is_current(&self) -> bool {
        self.counter.load(Ordering::SeqCst) == self.id
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Resolution {
    pub generation: u64,
    /// Every distinct input value mapped to its resolved form. Values that
    /// were not encrypted, or failed to decrypt, map to themselves.
    pub mapping: HashMap<String, String>,
    pub encrypted_detected: bool,
    pub decrypted: usize,
    pub cache_hits: usize,
    pub failed: usize,
}

enum Outcome {
    Decrypted(String),
    CacheHit(String),
    Failed,
}

pub struct Decryptor {
    cipher: Arc<dyn IdCipher>,
    cache: Arc<Mutex<DecryptionCache>>,
    workers: AtomicUsize,
    last_input: Mutex<Option<BTreeSet<String>>>,
}

impl Decryptor {
    pub fn new(cipher: Arc<dyn IdCipher>, cache: Arc<Mutex<DecryptionCache>>, workers: usize) -> Self {
        Self {
            cipher,
            cache,
            workers: AtomicUsize::new(workers.max(1)),
            last_input: Mutex::new(None),
        }
    }

    pub fn cache(&self) -> &Arc<Mutex<DecryptionCache>> {
        &self.cache
    }

    pub fn set_workers(&self, workers: usize) {
        self.workers.store(workers.max(1), Ordering::Relaxed);
    }

    pub fn is_encrypted(&self, value: &str) -> bool {
        self.cipher.is_encrypted(value)
    }

    /// Forget the last input set so the next call re-announces encrypted
    /// values.
    pub fn reset(&self) {
        *self.last_input.lock().unwrap_or_else(|e| e.into_inner()) = None;
    }

    /// Resolves each distinct value to plaintext where possible.
    ///
    /// `on_encrypted_detected` runs at most once, and only when this input
    /// set differs from the previous call's and contains an encrypted-looking
    /// value. Returns `None` when `token` was superseded before completion.
    pub fn resolve_identifiers<I, S, F>(
        &self,
        values: I,
        passphrase: Option<&str>,
        token: &GenerationToken,
        on_encrypted_detected: F,
    ) -> Option<Resolution>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
        F: FnOnce(),
    {
        let distinct: BTreeSet<String> = values
            .into_iter()
            .map(|v| v.as_ref().to_string())
            .filter(|v| !v.trim().is_empty())
            .collect();
        let passphrase = passphrase.filter(|p| !p.is_empty());

        let encrypted: Vec<String> = distinct
            .iter()
            .filter(|v| self.cipher.is_encrypted(v))
            .cloned()
            .collect();
        let encrypted_detected = !encrypted.is_empty();
        {
            let mut last = self.last_input.lock().unwrap_or_else(|e| e.into_inner());
            if last.as_ref() != Some(&distinct) {
                *last = Some(distinct.clone());
                if encrypted_detected {
                    on_encrypted_detected();
                }
            }
        }

        let mut resolution = Resolution {
            generation: token.id(),
            mapping: distinct.iter().map(|v| (v.clone(), v.clone())).collect(),
            encrypted_detected,
            ..Resolution::default()
        };

        if let Some(passphrase) = passphrase {
            for (value, outcome) in self.decrypt_all(&encrypted, passphrase, token) {
                match outcome {
                    Outcome::Decrypted(plain) => {
                        resolution.decrypted += 1;
                        resolution.mapping.insert(value, plain);
                    }
                    Outcome::CacheHit(plain) => {
                        resolution.cache_hits += 1;
                        resolution.mapping.insert(value, plain);
                    }
                    Outcome::Failed => resolution.failed += 1,
                }
            }
        }

        if !token.is_current() {
            debug!(generation = token.id(), "dropping superseded resolution");
            return None;
        }
        info!(
            generation = resolution.generation,
            values = resolution.mapping.len(),
            encrypted = encrypted.len(),
            decrypted = resolution.decrypted,
            cache_hits = resolution.cache_hits,
            failed = resolution.failed,
            "identifiers resolved"
        );
        Some(resolution)
    }

    fn decrypt_all(
        &self,
        values: &[String],
        passphrase: &str,
        token: &GenerationToken,
    ) -> Vec<(String, Outcome)> {
        if values.is_empty() {
            return Vec::new();
        }
        let next = AtomicUsize::new(0);
        let workers = self.workers.load(Ordering::Relaxed).min(values.len());

        std::thread::scope(|scope| {
            let handles: Vec<_> = (0..workers)
                .map(|_| {
                    scope.spawn(|| {
                        let mut out = Vec::new();
                        while token.is_current() {
                            let i = next.fetch_add(1, Ordering::Relaxed);
                            let Some(value) = values.get(i) else {
                                break;
                            };
                            out.push((value.clone(), self.decrypt_one(value, passphrase)));
                        }
                        out
                    })
                })
                .collect();
            handles
                .into_iter()
                .filter_map(|h| h.join().ok())
                .flatten()
                .collect()
        })
    }

    fn decrypt_one(&self, value: &str, passphrase: &str) -> Outcome {
        let key = decryption_cache_key(value, passphrase);
        if let Some(plain) = self.lock_cache().get(&key) {
            return Outcome::CacheHit(plain);
        }
        match self.cipher.decrypt(value, passphrase) {
            Ok(plain) => {
                self.lock_cache().insert(key, plain.clone());
                Outcome::Decrypted(plain)
            }
            Err(e) => {
                debug!(error = %e, "identifier decryption failed; keeping original");
                Outcome::Failed
            }
        }
    }

    fn lock_cache(&self) -> std::sync::MutexGuard<'_, DecryptionCache> {
        self.cache.lock().unwrap_or_else(|e| e.into_inner())
    }
}
