//! Keystroke pacing policies.
//!
//! Typing cadence is behind a trait so the flow can be exercised in tests
//! with zero delays and zero randomness while production runs type like a
//! person: uneven key intervals, occasional thinking pauses, and the odd
//! corrected typo.

use std::time::Duration;

use rand::prelude::*;

pub trait TypingPolicy: Send + Sync {
    /// Delay before the next keystroke.
    fn keystroke_delay(&self) -> Duration;

    /// A wrong character to type instead of `c`, or `None` to type it
    /// correctly. Never fires for the first character of a field.
    fn typo(&self, c: char, index: usize) -> Option<char>;

    /// Pause between typing the wrong character and noticing it.
    fn notice_pause(&self) -> Duration;

    /// Pause after the backspace, before resuming.
    fn recovery_pause(&self) -> Duration;
}

/// A letter adjacent in the alphabet, case preserved. `a` only goes up and
/// `z` only down so the result is always a letter.
fn nearby_letter(c: char, go_up: bool) -> char {
    let lower = c.to_ascii_lowercase();
    let shifted = match (lower, go_up) {
        ('a', _) => 'b',
        ('z', _) => 'y',
        (l, true) => (l as u8 + 1) as char,
        (l, false) => (l as u8 - 1) as char,
    };
    if c.is_ascii_uppercase() {
        shifted.to_ascii_uppercase()
    } else {
        shifted
    }
}

/// Production cadence: 50-150ms per key, roughly one key in ten carries an
/// extra 300-800ms thinking pause, and roughly one letter in twenty comes
/// out wrong before being backspaced.
#[derive(Debug, Default, Clone, Copy)]
pub struct HumanTyping;

impl TypingPolicy for HumanTyping {
    fn keystroke_delay(&self) -> Duration {
        let mut rng = rand::rng();
        let mut ms: u64 = rng.random_range(50..=150);
        if rng.random_bool(0.10) {
            ms += rng.random_range(300..=800);
        }
        Duration::from_millis(ms)
    }

    fn typo(&self, c: char, index: usize) -> Option<char> {
        if index == 0 || !c.is_ascii_alphabetic() {
            return None;
        }
        let mut rng = rand::rng();
        if !rng.random_bool(0.05) {
            return None;
        }
        Some(nearby_letter(c, rng.random_bool(0.5)))
    }

    fn notice_pause(&self) -> Duration {
        Duration::from_millis(rand::rng().random_range(200..=500))
    }

    fn recovery_pause(&self) -> Duration {
        Duration::from_millis(rand::rng().random_range(100..=250))
    }
}

/// No delays, no typos. For tests and debugging.
#[derive(Debug, Default, Clone, Copy)]
pub struct InstantTyping;

impl TypingPolicy for InstantTyping {
    fn keystroke_delay(&self) -> Duration {
        Duration::ZERO
    }

    fn typo(&self, _c: char, _index: usize) -> Option<char> {
        None
    }

    fn notice_pause(&self) -> Duration {
        Duration::ZERO
    }

    fn recovery_pause(&self) -> Duration {
        Duration::ZERO
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nearby_letter_stays_alphabetic_and_adjacent() {
        for c in 'a'..='z' {
            for up in [true, false] {
                let n = nearby_letter(c, up);
                assert!(n.is_ascii_lowercase());
                assert!((n as i16 - c as i16).abs() == 1, "{} -> {}", c, n);
            }
        }
        assert_eq!(nearby_letter('A', true), 'B');
        assert_eq!(nearby_letter('Z', true), 'Y');
    }

    #[test]
    fn human_typo_never_hits_first_char_or_non_letters() {
        let policy = HumanTyping;
        for _ in 0..2000 {
            assert!(policy.typo('h', 0).is_none());
            assert!(policy.typo('7', 3).is_none());
            assert!(policy.typo(' ', 3).is_none());
        }
    }

    #[test]
    fn human_typo_is_adjacent_when_it_fires() {
        let policy = HumanTyping;
        let mut fired = 0;
        for _ in 0..5000 {
            if let Some(t) = policy.typo('m', 4) {
                assert!(t == 'l' || t == 'n');
                fired += 1;
            }
        }
        // 5% rate over 5000 draws; a zero count would mean the path is dead.
        assert!(fired > 0);
    }

    #[test]
    fn human_delays_stay_in_range() {
        let policy = HumanTyping;
        for _ in 0..500 {
            let d = policy.keystroke_delay().as_millis();
            assert!((50..=950).contains(&d));
            assert!((200..=500).contains(&policy.notice_pause().as_millis()));
            assert!((100..=250).contains(&policy.recovery_pause().as_millis()));
        }
    }

    #[test]
    fn instant_policy_is_silent() {
        let policy = InstantTyping;
        assert_eq!(policy.keystroke_delay(), Duration::ZERO);
        assert!(policy.typo('a', 5).is_none());
    }
}
