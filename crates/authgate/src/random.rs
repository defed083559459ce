//! Secure random sources.
//!
//! PKCE verifiers, states and nonces must never be predictable, so byte
//! generation fails closed: [`FallbackRandom`] tries a second independent
//! source when the first one errors, and reports an error if both do.

use rand::RngCore;
use rand::rngs::OsRng;
use tracing::warn;

use crate::error::{Error, Result};

/// A source of cryptographically secure random bytes.
pub trait RandomSource: Send + Sync {
    /// Fills `dest` with random bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the source cannot produce bytes.
    fn fill(&self, dest: &mut [u8]) -> Result<()>;

    /// Returns `n` random bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the source cannot produce bytes.
    fn random_bytes(&self, n: usize) -> Result<Vec<u8>> {
        let mut bytes = vec![0u8; n];
        self.fill(&mut bytes)?;
        Ok(bytes)
    }
}

/// Operating system entropy (`getrandom`).
#[derive(Debug, Default, Clone, Copy)]
pub struct OsRandom;

impl RandomSource for OsRandom {
    fn fill(&self, dest: &mut [u8]) -> Result<()> {
        OsRng
            .try_fill_bytes(dest)
            .map_err(|e| Error::Random(e.to_string()))
    }
}

/// Thread-local reseeding CSPRNG.
#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadRandom;

impl RandomSource for ThreadRandom {
    fn fill(&self, dest: &mut [u8]) -> Result<()> {
        rand::thread_rng()
            .try_fill_bytes(dest)
            .map_err(|e| Error::Random(e.to_string()))
    }
}

/// Tries `primary`, then `secondary`; never degrades to a non-secure source.
#[derive(Debug, Default, Clone, Copy)]
pub struct FallbackRandom<P, S> {
    primary: P,
    secondary: S,
}

/// The default source: OS entropy backed by the thread CSPRNG.
pub type SystemRandom = FallbackRandom<OsRandom, ThreadRandom>;

impl<P, S> FallbackRandom<P, S> {
    /// Combines two sources.
    pub const fn new(primary: P, secondary: S) -> Self {
        Self { primary, secondary }
    }
}

impl<P: RandomSource, S: RandomSource> RandomSource for FallbackRandom<P, S> {
    fn fill(&self, dest: &mut [u8]) -> Result<()> {
        match self.primary.fill(dest) {
            Ok(()) => Ok(()),
            Err(primary_err) => {
                warn!("Primary random source failed ({primary_err}), using secondary");
                self.secondary.fill(dest)
            }
        }
    }
}
