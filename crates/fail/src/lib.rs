//! Debug-build error injection.
//!
//! The disk writer's fatal paths (storage exhaustion, mainly) are nearly
//! impossible to hit on a healthy machine. Code marks an injection site with
//! [`inject_err!`]; a test arms it by name with [`arm`] and the site returns
//! the given error as if the real fault had occurred. Sites compile to
//! nothing in release builds.
//!
//! Armed state is process-global, so tests that arm a site must disarm it
//! and not run concurrently with tests hitting the same site.

use std::collections::BTreeSet;
use std::sync::{LazyLock, RwLock};

use tracing::debug;

static ARMED: LazyLock<RwLock<BTreeSet<String>>> = LazyLock::new(|| RwLock::new(BTreeSet::new()));

/// `Err($value)?` out of the enclosing function when the named site is armed.
///
/// The site's full name is `<crate name>::<name>`.
#[macro_export]
macro_rules! inject_err {
    ($name:literal, $value:expr) => {
        #[cfg(debug_assertions)]
        {
            const NAME: &str = concat!(env!("CARGO_PKG_NAME"), "::", $name);
            if $crate::should_inject(NAME) {
                Err($value)?;
            }
        }
    };
}

/// True when `name` is armed. Logs the hit; call only from an injection site.
pub fn should_inject(name: &str) -> bool {
    let armed = ARMED.read().unwrap().contains(name);
    if armed {
        debug!("injecting error at '{name}'");
    }
    armed
}

pub fn arm(name: impl Into<String>) {
    ARMED.write().unwrap().insert(name.into());
}

pub fn disarm(name: &str) {
    ARMED.write().unwrap().remove(name);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arming_and_disarming_toggles_a_site() {
        assert!(!should_inject("strobe-fail::toggle-site"));

        arm("strobe-fail::toggle-site");
        assert!(should_inject("strobe-fail::toggle-site"));

        disarm("strobe-fail::toggle-site");
        assert!(!should_inject("strobe-fail::toggle-site"));
    }

    #[test]
    fn armed_site_returns_the_injected_error() {
        fn guarded() -> Result<(), std::io::Error> {
            inject_err!("guarded-site", std::io::Error::other("injected"));
            Ok(())
        }

        assert!(guarded().is_ok());
        arm("strobe-fail::guarded-site");
        assert!(guarded().is_err());
        disarm("strobe-fail::guarded-site");
        assert!(guarded().is_ok());
    }
}
