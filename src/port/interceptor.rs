//! Interceptor chain port.
//!
//! When the last store is disabled the request pipeline must stop routing
//! loads and writes through the persistence interceptors.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InterceptorKind {
    /// Loads missing entries from stores.
    Loader,
    /// Writes modifications through to non-transactional stores.
    Writer,
    /// Writes modifications through to stores on transaction commit.
    TransactionalWriter,
}

impl fmt::Display for InterceptorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Loader => "loader",
            Self::Writer => "writer",
            Self::TransactionalWriter => "transactional_writer",
        };
        f.write_str(name)
    }
}

pub trait InterceptorChain: Send + Sync {
    fn contains(&self, kind: InterceptorKind) -> bool;

    /// Remove the interceptor. Returns whether one was present.
    fn remove(&self, kind: InterceptorKind) -> bool;
}
