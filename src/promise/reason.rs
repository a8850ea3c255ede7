use std::{
    any::Any,
    error::Error as StdError,
    fmt::{self, Debug, Display},
    sync::Arc,
};

/// Why a promise failed.
///
/// A reason is shared between every continuation observing the failure, so
/// cloning it is cheap. It wraps an [anyhow::Error]; converting a `Reason`
/// into an `anyhow::Error` and back yields the very same reason, which means
/// `?` inside a failure handler re-raises the original reason unchanged.
/// Attaching context makes a new reason; the original stays reachable through
/// [Reason::error]'s chain.
///
/// A promise can never be used as a reason: reasons are built from errors or
/// messages and [Promise](super::Promise) is neither.
#[derive(Clone)]
pub struct Reason(Arc<anyhow::Error>);

impl Reason {
    /// Wrap any error value.
    pub fn new<E>(err: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        anyhow::Error::new(err).into()
    }

    /// A reason carrying only a message.
    pub fn msg<M>(msg: M) -> Self
    where
        M: Display + Debug + Send + Sync + 'static,
    {
        Self(Arc::new(anyhow::Error::msg(msg)))
    }

    pub(crate) fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        match payload.downcast::<String>() {
            Ok(s) => Self::msg(*s),
            Err(payload) => match payload.downcast::<&'static str>() {
                Ok(s) => Self::msg(*s),
                Err(_) => Self::msg("callback panicked"),
            },
        }
    }

    /// The underlying error.
    pub fn error(&self) -> &anyhow::Error {
        &self.0
    }

    /// Attempt to view the underlying error as a concrete type.
    pub fn downcast_ref<E>(&self) -> Option<&E>
    where
        E: Display + Debug + Send + Sync + 'static,
    {
        self.0.downcast_ref::<E>()
    }

    /// Whether two reasons are the same shared failure.
    pub fn ptr_eq(&self, other: &Reason) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl From<anyhow::Error> for Reason {
    fn from(err: anyhow::Error) -> Self {
        // Only unwrap a bare reason. `anyhow::Error::downcast` also sees
        // through context, which would discard the new outer error.
        if !(*err).is::<Reason>() {
            return Self(Arc::new(err));
        }

        match err.downcast::<Reason>() {
            Ok(reason) => reason,
            Err(err) => Self(Arc::new(err)),
        }
    }
}

impl From<&'static str> for Reason {
    fn from(msg: &'static str) -> Self {
        Self::msg(msg)
    }
}

impl From<String> for Reason {
    fn from(msg: String) -> Self {
        Self::msg(msg)
    }
}

impl Display for Reason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        Display::fmt(&*self.0, f)
    }
}

impl Debug for Reason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        Debug::fmt(&*self.0, f)
    }
}

impl StdError for Reason {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.0.source()
    }
}

/// The promise was dropped by everything able to settle it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Abandoned;

impl Display for Abandoned {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("promise abandoned before settling")
    }
}

impl StdError for Abandoned {}
