use std::collections::HashMap;

use tracing::debug;

use crate::completion::PayloadKind;
use crate::error::{BridgeError, Result};
use crate::issuer::Issuer;
use crate::store::{Handle, ValueStore};

/// Index of a public function inside the script.
pub type PublicIndex = usize;

/// One positional argument passed to a script callback.
#[derive(Debug, Clone, PartialEq)]
pub enum CallArg {
    Int(i32),
    Str(String),
    Handle(Handle),
}

/// The script VM as seen from the bridge.
///
/// Only ever driven from the thread that owns the VM.
pub trait Script {
    /// Look up a public function by name.
    fn find_public(&self, name: &str) -> Option<PublicIndex>;

    /// Number of parameters the public at `index` declares.
    fn public_arity(&self, index: PublicIndex) -> usize;

    /// Run the public synchronously. Handle arguments are live in
    /// `cx.store` for the duration of the call.
    fn exec(&mut self, index: PublicIndex, args: &[CallArg], cx: &mut CallContext<'_>) -> i32;
}

/// What a running public may touch: the value store and the issuing side
/// of the bridge. Requests issued here complete on a later tick.
#[derive(Debug)]
pub struct CallContext<'a> {
    pub store: &'a mut ValueStore,
    pub issuer: &'a mut Issuer,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Registered {
    index: PublicIndex,
    kind: PayloadKind,
}

/// Callback names resolved and signature-checked against a script.
///
/// A name is validated once, either explicitly through
/// [`register`](Self::register) or on first dispatch, and cached.
#[derive(Debug, Default)]
pub struct CallbackTable {
    entries: HashMap<String, Registered>,
}

impl CallbackTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Check that `name` exists and accepts a `kind` payload, then cache it.
    pub fn register<S: Script + ?Sized>(
        &mut self,
        script: &S,
        name: &str,
        kind: PayloadKind,
    ) -> Result<PublicIndex> {
        let index = script
            .find_public(name)
            .ok_or_else(|| BridgeError::MissingCallback(name.to_string()))?;
        let found = script.public_arity(index);
        if found != kind.arity() {
            return Err(BridgeError::SignatureMismatch {
                name: name.to_string(),
                expected: kind.arity(),
                found,
            });
        }
        debug!(name, index, kind = kind.name(), "callback registered");
        self.entries
            .insert(name.to_string(), Registered { index, kind });
        Ok(index)
    }

    /// Resolve `name` for a `kind` payload, registering it on first use.
    pub fn resolve<S: Script + ?Sized>(
        &mut self,
        script: &S,
        name: &str,
        kind: PayloadKind,
    ) -> Result<PublicIndex> {
        match self.entries.get(name) {
            Some(entry) if entry.kind == kind => Ok(entry.index),
            Some(entry) => Err(BridgeError::SignatureMismatch {
                name: name.to_string(),
                expected: kind.arity(),
                found: entry.kind.arity(),
            }),
            None => self.register(script, name, kind),
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// Forget every cached resolution, e.g. after the script is reloaded.
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Publics(Vec<(&'static str, usize)>);

    impl Script for Publics {
        fn find_public(&self, name: &str) -> Option<PublicIndex> {
            self.0.iter().position(|(n, _)| *n == name)
        }

        fn public_arity(&self, index: PublicIndex) -> usize {
            self.0[index].1
        }

        fn exec(&mut self, _index: PublicIndex, _args: &[CallArg], _cx: &mut CallContext<'_>) -> i32 {
            0
        }
    }

    fn script() -> Publics {
        Publics(vec![("OnText", 4), ("OnJson", 3), ("OnNothing", 0)])
    }

    #[test]
    fn register_validates_arity() {
        let mut table = CallbackTable::new();
        assert_eq!(table.register(&script(), "OnText", PayloadKind::Text).unwrap(), 0);
        assert_eq!(
            table
                .register(&script(), "OnJson", PayloadKind::Structured)
                .unwrap(),
            1
        );
        let err = table
            .register(&script(), "OnNothing", PayloadKind::Text)
            .unwrap_err();
        assert!(matches!(
            err,
            BridgeError::SignatureMismatch {
                expected: 4,
                found: 0,
                ..
            }
        ));
        assert!(!table.contains("OnNothing"));
    }

    #[test]
    fn missing_public_is_reported() {
        let mut table = CallbackTable::new();
        assert!(matches!(
            table.register(&script(), "OnGone", PayloadKind::Text),
            Err(BridgeError::MissingCallback(_))
        ));
    }

    #[test]
    fn resolve_caches_and_checks_kind() {
        let mut table = CallbackTable::new();
        assert_eq!(table.resolve(&script(), "OnText", PayloadKind::Text).unwrap(), 0);
        assert!(table.contains("OnText"));
        assert!(table
            .resolve(&script(), "OnText", PayloadKind::Structured)
            .is_err());
        table.clear();
        assert!(!table.contains("OnText"));
    }
}
