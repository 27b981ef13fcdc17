//! Environment abstraction for deterministic testing.
//!
//! Decouples protocol logic from system resources (time, randomness). State
//! machines and the vault take an `Environment` (or plain instants) instead of
//! reaching for ambient clocks, so tests drive virtual time and seeded
//! entropy.

use std::time::Duration;

/// Abstract environment providing time and randomness.
///
/// # Safety
///
/// Implementations MUST guarantee:
///
/// - `now()` never goes backwards
/// - `random_bytes()` uses cryptographically secure entropy in production
pub trait Environment: Clone + Send + Sync + 'static {
    /// The specific instant type used by this environment.
    ///
    /// Production environments use `std::time::Instant`, while simulation
    /// environments may use virtual time.
    type Instant: Copy + Ord + Send + Sync + std::ops::Sub<Output = Duration>;

    /// Current time (monotonic).
    fn now(&self) -> Self::Instant;

    /// Current wall clock as unix milliseconds.
    ///
    /// Used for envelope timestamps and persisted key metadata, where a
    /// monotonic instant cannot be serialized or compared across processes.
    fn unix_millis(&self) -> u64;

    /// Sleeps for the specified duration.
    ///
    /// This is the ONLY async method in the trait, and it should only be used
    /// by driver code (not protocol logic).
    fn sleep(&self, duration: Duration) -> impl std::future::Future<Output = ()> + Send;

    /// Fills the provided buffer with random bytes.
    fn random_bytes(&self, buffer: &mut [u8]);

    /// Generates a random `u64`.
    fn random_u64(&self) -> u64 {
        let mut bytes = [0u8; 8];
        self.random_bytes(&mut bytes);
        u64::from_be_bytes(bytes)
    }
}

/// Production environment backed by the OS clock and CSPRNG.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemEnv;

impl Environment for SystemEnv {
    type Instant = std::time::Instant;

    fn now(&self) -> Self::Instant {
        std::time::Instant::now()
    }

    fn unix_millis(&self) -> u64 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map_or(0, |d| d.as_millis() as u64)
    }

    fn sleep(&self, duration: Duration) -> impl std::future::Future<Output = ()> + Send {
        tokio::time::sleep(duration)
    }

    fn random_bytes(&self, buffer: &mut [u8]) {
        use rand::RngCore;
        rand::rngs::OsRng.fill_bytes(buffer);
    }
}

pub mod test_utils {
    //! Deterministic environment for tests.

    use std::{
        sync::{Arc, Mutex},
        time::{Duration, Instant},
    };

    use super::Environment;

    #[derive(Debug)]
    struct MockState {
        offset: Duration,
        unix_ms: u64,
        next_byte: u8,
    }

    /// Mock environment with a controllable clock and deterministic entropy.
    ///
    /// Clones share the same underlying clock, so a test can advance time
    /// for every component holding the environment.
    #[derive(Debug, Clone)]
    pub struct MockEnv {
        base: Instant,
        state: Arc<Mutex<MockState>>,
    }

    /// Default wall clock for tests: 2023-11-14T22:13:20Z.
    pub const MOCK_UNIX_MS: u64 = 1_700_000_000_000;

    impl MockEnv {
        /// Create a mock environment at time zero.
        pub fn new() -> Self {
            Self {
                base: Instant::now(),
                state: Arc::new(Mutex::new(MockState {
                    offset: Duration::ZERO,
                    unix_ms: MOCK_UNIX_MS,
                    next_byte: 0,
                })),
            }
        }

        /// Advance both the monotonic and wall clocks.
        pub fn advance(&self, duration: Duration) {
            let mut state = self.lock();
            state.offset += duration;
            state.unix_ms += duration.as_millis() as u64;
        }

        /// Set the wall clock directly.
        pub fn set_unix_millis(&self, unix_ms: u64) {
            self.lock().unix_ms = unix_ms;
        }

        fn lock(&self) -> std::sync::MutexGuard<'_, MockState> {
            // Recover from poisoning: mock state has no invariants worth
            // propagating a panic for.
            self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
        }
    }

    impl Default for MockEnv {
        fn default() -> Self {
            Self::new()
        }
    }

    impl Environment for MockEnv {
        type Instant = Instant;

        fn now(&self) -> Instant {
            self.base + self.lock().offset
        }

        fn unix_millis(&self) -> u64 {
            self.lock().unix_ms
        }

        fn sleep(&self, _duration: Duration) -> impl std::future::Future<Output = ()> + Send {
            async {}
        }

        fn random_bytes(&self, buffer: &mut [u8]) {
            let mut state = self.lock();
            for byte in buffer.iter_mut() {
                *byte = state.next_byte;
                state.next_byte = state.next_byte.wrapping_add(1);
            }
        }
    }

}
