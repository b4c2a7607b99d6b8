use log::debug;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Hands out Ogg stream serial numbers.
///
/// Each encoder owns its own generator, so serials from different encoders
/// are not correlated, and seeding it makes a run reproducible.
pub struct SerialGenerator {
    rng: StdRng,
    last: Option<u32>,
}

impl SerialGenerator {
    /// Seed from OS entropy.
    pub fn new() -> Self {
        Self {
            rng: StdRng::from_entropy(),
            last: None,
        }
    }

    /// Deterministic sequence for a given seed.
    pub fn with_seed(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            last: None,
        }
    }

    /// Allocate the next serial; never equal to the one before it.
    pub fn next_serial(&mut self) -> u32 {
        let serial = loop {
            let candidate: u32 = self.rng.gen();
            if Some(candidate) != self.last {
                break candidate;
            }
        };
        self.last = Some(serial);
        debug!("Allocated new serial: {serial:#x}");
        serial
    }
}

impl Default for SerialGenerator {
    fn default() -> Self {
        Self::new()
    }
}
