//! The dialer strategy contract.

use std::sync::Arc;

use async_trait::async_trait;

use detour_core::addr::Multiaddr;

use crate::conn::CircuitConn;
use crate::error::DialerError;

/// A strategy for establishing a circuit to `addr`.
///
/// Strategies are selected by configuration, not inheritance: the flat
/// [`crate::CircuitDialer`] and the chaining [`crate::OnionDialer`] both
/// satisfy this contract.
#[async_trait]
pub trait RelayDialer: Send + Sync {
    async fn dial(&self, addr: &Multiaddr) -> Result<CircuitConn, DialerError>;
}

#[async_trait]
impl<D: RelayDialer + ?Sized> RelayDialer for Arc<D> {
    async fn dial(&self, addr: &Multiaddr) -> Result<CircuitConn, DialerError> {
        (**self).dial(addr).await
    }
}
