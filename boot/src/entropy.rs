//! Lumen menu entropy: picks cosmetic content (the banner tagline).
//!
//! The seed comes from the firmware clock and is stretched through a keyed
//! BLAKE3 derivation before it seeds a `SmallRng`. None of this is meant to
//! be unpredictable; the seed is forwarded to the kernel only as a hint.

use blake3::Hasher;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

use crate::firmware::{Firmware, FirmwareTime};

const SEED_CONTEXT: &str = "LUMEN:BOOT:MENU-SEED:v1";

pub static TAGLINES: [&str; 8] = [
    "Every boot is a fresh start.",
    "Counting down so you don't have to.",
    "Small loader, big handoff.",
    "Press a key, or trust the timer.",
    "The map key is only as fresh as your last allocation.",
    "No kernel? No panic. Back to the menu.",
    "Three tries at ExitBootServices, then we talk.",
    "Firmware in, kernel out.",
];

/// Derive a 64-bit seed from the second and sub-second part of a clock sample.
pub fn seed_from_time(time: &FirmwareTime) -> u64 {
    let mut h = Hasher::new_derive_key(SEED_CONTEXT);
    h.update(&[time.second]);
    h.update(&time.nanosecond.to_le_bytes());
    let digest = h.finalize();

    let mut seed = [0u8; 8];
    seed.copy_from_slice(&digest.as_bytes()[..8]);
    u64::from_le_bytes(seed)
}

/// Sample the firmware clock; an unreadable clock falls back to midnight.
pub fn gather_seed<F: Firmware>(fw: &mut F) -> u64 {
    let time = fw.time().unwrap_or_else(|e| {
        log::warn!(target: "boot", "clock unavailable ({}), using fixed seed", e);
        FirmwareTime::default()
    });
    seed_from_time(&time)
}

/// Index into a table of `len` entries; `None` for an empty table.
pub fn choose_index(len: usize, seed: u64) -> Option<usize> {
    if len == 0 {
        return None;
    }
    let mut rng = SmallRng::seed_from_u64(seed);
    Some(rng.gen_range(0..len))
}

pub fn choose<T>(items: &[T], seed: u64) -> Option<&T> {
    choose_index(items.len(), seed).map(|i| &items[i])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockFirmware;

    #[test]
    fn empty_table_has_no_choice() {
        assert_eq!(choose_index(0, 1234), None);
        assert!(choose::<&str>(&[], 99).is_none());
    }

    #[test]
    fn choice_is_in_bounds() {
        for seed in 0..256u64 {
            let i = choose_index(TAGLINES.len(), seed).unwrap();
            assert!(i < TAGLINES.len());
        }
        assert_eq!(choose_index(1, 42), Some(0));
    }

    #[test]
    fn same_seed_same_choice() {
        let a = choose(&TAGLINES, 0xDEAD_BEEF);
        let b = choose(&TAGLINES, 0xDEAD_BEEF);
        assert_eq!(a, b);
    }

    #[test]
    fn seed_depends_on_sub_second_time() {
        let t = FirmwareTime {
            hour: 1,
            minute: 2,
            second: 3,
            nanosecond: 4,
        };
        let u = FirmwareTime { nanosecond: 5, ..t };
        assert_eq!(seed_from_time(&t), seed_from_time(&t));
        assert_ne!(seed_from_time(&t), seed_from_time(&u));
    }

    #[test]
    fn seed_ignores_hour_and_minute() {
        let t = FirmwareTime {
            hour: 1,
            minute: 2,
            second: 3,
            nanosecond: 4,
        };
        let later = FirmwareTime { hour: 23, minute: 59, ..t };
        let next_second = FirmwareTime { second: 4, ..t };
        assert_eq!(seed_from_time(&t), seed_from_time(&later));
        assert_ne!(seed_from_time(&t), seed_from_time(&next_second));
    }

    #[test]
    fn gather_seed_reads_the_clock() {
        let mut fw = MockFirmware::new();
        let expected = seed_from_time(&fw.time().unwrap());
        assert_eq!(gather_seed(&mut fw), expected);
    }
}
