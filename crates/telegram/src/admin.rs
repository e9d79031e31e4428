//! In-memory PIN gate for the admin command set.
//!
//! Operators authenticate by tapping a keypad in the admin bot; the
//! attempt string and the authenticated set live only for the process
//! lifetime. The configured owner bypasses the PIN entirely.

use std::collections::{HashMap, HashSet};

/// Attempts are capped at the PIN length the keypad advertises.
const MAX_PIN_LEN: usize = 6;

/// One keypad press.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PinKey {
    Digit(char),
    Delete,
    Submit,
}

impl PinKey {
    /// Decode the `pin:` callback-data suffix.
    pub fn from_callback(data: &str) -> Option<Self> {
        match data {
            "del" => Some(Self::Delete),
            "submit" => Some(Self::Submit),
            d => {
                let mut chars = d.chars();
                match (chars.next(), chars.next()) {
                    (Some(c), None) if c.is_ascii_digit() => Some(Self::Digit(c)),
                    _ => None,
                }
            },
        }
    }
}

/// Result of a keypad press.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PressOutcome {
    /// Keypad should be redrawn showing this many entered digits.
    Updated { entered: usize },
    /// Submit matched — identity is now authenticated.
    Authenticated,
    /// Submit mismatched — attempt reset to empty.
    WrongPin,
}

/// Per-process admin authentication state.
pub struct AdminGate {
    pin: String,
    owner_id: String,
    authenticated: HashSet<String>,
    attempts: HashMap<String, String>,
}

impl AdminGate {
    pub fn new(pin: String, owner_id: String) -> Self {
        Self {
            pin,
            owner_id,
            authenticated: HashSet::new(),
            attempts: HashMap::new(),
        }
    }

    /// Whether `identity` may run privileged commands.
    pub fn is_authorized(&self, identity: &str) -> bool {
        (!self.owner_id.is_empty() && identity == self.owner_id)
            || self.authenticated.contains(identity)
    }

    /// Start (or restart) a PIN entry for `identity`.
    pub fn begin(&mut self, identity: &str) {
        self.attempts.insert(identity.to_string(), String::new());
    }

    /// Apply one keypad press for `identity`.
    pub fn press(&mut self, identity: &str, key: PinKey) -> PressOutcome {
        match key {
            PinKey::Digit(d) => {
                let attempt = self.attempts.entry(identity.to_string()).or_default();
                if attempt.len() < MAX_PIN_LEN {
                    attempt.push(d);
                }
                PressOutcome::Updated {
                    entered: attempt.len(),
                }
            },
            PinKey::Delete => {
                let attempt = self.attempts.entry(identity.to_string()).or_default();
                attempt.pop();
                PressOutcome::Updated {
                    entered: attempt.len(),
                }
            },
            PinKey::Submit => {
                let attempt = self.attempts.remove(identity).unwrap_or_default();
                // An unset PIN authenticates nobody; only the owner passes.
                let pin_matches = !self.pin.is_empty() && attempt == self.pin;
                if pin_matches || (!self.owner_id.is_empty() && identity == self.owner_id) {
                    self.authenticated.insert(identity.to_string());
                    PressOutcome::Authenticated
                } else {
                    self.attempts.insert(identity.to_string(), String::new());
                    PressOutcome::WrongPin
                }
            },
        }
    }

    /// De-authenticate. Returns whether the identity was authenticated.
    pub fn logout(&mut self, identity: &str) -> bool {
        self.authenticated.remove(identity)
    }

    pub fn authenticated_count(&self) -> usize {
        self.authenticated.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gate() -> AdminGate {
        AdminGate::new("111020".into(), "7802048261".into())
    }

    fn type_pin(g: &mut AdminGate, id: &str, pin: &str) -> PressOutcome {
        g.begin(id);
        for c in pin.chars() {
            g.press(id, PinKey::Digit(c));
        }
        g.press(id, PinKey::Submit)
    }

    #[test]
    fn correct_pin_authenticates() {
        let mut g = gate();
        assert!(!g.is_authorized("u1"));
        assert_eq!(type_pin(&mut g, "u1", "111020"), PressOutcome::Authenticated);
        assert!(g.is_authorized("u1"));
    }

    #[test]
    fn wrong_pin_resets_attempt_to_empty() {
        let mut g = gate();
        assert_eq!(type_pin(&mut g, "u1", "999999"), PressOutcome::WrongPin);
        assert!(!g.is_authorized("u1"));

        // The next digit press starts from an empty attempt.
        assert_eq!(
            g.press("u1", PinKey::Digit('1')),
            PressOutcome::Updated { entered: 1 }
        );
    }

    #[test]
    fn digits_capped_at_six() {
        let mut g = gate();
        g.begin("u1");
        for c in "123456789".chars() {
            g.press("u1", PinKey::Digit(c));
        }
        assert_eq!(
            g.press("u1", PinKey::Digit('0')),
            PressOutcome::Updated { entered: 6 }
        );
    }

    #[test]
    fn delete_drops_last_digit() {
        let mut g = gate();
        g.begin("u1");
        g.press("u1", PinKey::Digit('1'));
        g.press("u1", PinKey::Digit('2'));
        assert_eq!(
            g.press("u1", PinKey::Delete),
            PressOutcome::Updated { entered: 1 }
        );
        // Delete on an empty attempt stays at zero.
        g.press("u1", PinKey::Delete);
        assert_eq!(
            g.press("u1", PinKey::Delete),
            PressOutcome::Updated { entered: 0 }
        );
    }

    #[test]
    fn owner_bypasses_pin() {
        let mut g = gate();
        assert!(g.is_authorized("7802048261"));
        // Even a wrong attempt authenticates the owner on submit.
        assert_eq!(
            type_pin(&mut g, "7802048261", "000000"),
            PressOutcome::Authenticated
        );
    }

    #[test]
    fn logout_deauthenticates() {
        let mut g = gate();
        type_pin(&mut g, "u1", "111020");
        assert!(g.logout("u1"));
        assert!(!g.is_authorized("u1"));
        assert!(!g.logout("u1"));
    }

    #[test]
    fn identities_are_independent() {
        let mut g = gate();
        type_pin(&mut g, "u1", "111020");
        assert!(g.is_authorized("u1"));
        assert!(!g.is_authorized("u2"));
        assert_eq!(g.authenticated_count(), 1);
    }

    #[test]
    fn empty_pin_authenticates_nobody() {
        let mut g = AdminGate::new(String::new(), "owner".into());
        assert_eq!(type_pin(&mut g, "u1", ""), PressOutcome::WrongPin);
        assert!(!g.is_authorized("u1"));
    }

    #[test]
    fn submit_without_begin_is_wrong_pin() {
        let mut g = gate();
        assert_eq!(g.press("u1", PinKey::Submit), PressOutcome::WrongPin);
    }

    #[test]
    fn callback_decoding() {
        assert_eq!(PinKey::from_callback("5"), Some(PinKey::Digit('5')));
        assert_eq!(PinKey::from_callback("del"), Some(PinKey::Delete));
        assert_eq!(PinKey::from_callback("submit"), Some(PinKey::Submit));
        assert_eq!(PinKey::from_callback("55"), None);
        assert_eq!(PinKey::from_callback("x"), None);
    }
}
