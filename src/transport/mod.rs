//! The `transport` module is responsible for talking to AMQP peers.
//!
//! The relay engine is written against the traits defined here so the
//! receive/forward pipeline does not depend on a particular client library.
//! [`amqp`] provides the implementation backed by `fe2o3-amqp`.

pub mod amqp;
pub mod message;

use std::future::Future;
use std::time::Duration;

use tokio::time::timeout;

pub use message::{AnnotationKey, AnnotationValue, Inbound, RawAnnotations};

use crate::utils::RelayError;

/// Upper bound for closing a link, the session or the connection.
pub const CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

/// Awaits `close`, giving up after [`CLOSE_TIMEOUT`].
pub async fn close_within<C>(resource: &'static str, close: C) -> Result<(), RelayError>
where
    C: Future<Output = Result<(), RelayError>>,
{
    match timeout(CLOSE_TIMEOUT, close).await {
        Ok(result) => result,
        Err(_) => Err(RelayError::teardown(
            resource,
            format!("timed out after {CLOSE_TIMEOUT:?}"),
        )),
    }
}

/// A receiving link bound to the tenant's source address.
pub trait InboundLink {
    /// Transport handle for one delivery.
    type Delivery;

    /// Waits for the next message.
    fn receive(&mut self) -> impl Future<Output = Result<Inbound<Self::Delivery>, RelayError>>;

    /// Settles `delivery` as accepted.
    fn accept(&mut self, delivery: &Self::Delivery) -> impl Future<Output = Result<(), RelayError>>;

    fn close(self) -> impl Future<Output = Result<(), RelayError>>;
}

/// A sending link bound to one sink address.
pub trait OutboundLink<D> {
    /// Sends the message carried by `delivery`, unchanged.
    fn send(&mut self, delivery: &D) -> impl Future<Output = Result<(), RelayError>>;

    fn close(self) -> impl Future<Output = Result<(), RelayError>>;
}

/// Opens sending links on the relay's session.
pub trait LinkFactory {
    type Delivery;
    type Link: OutboundLink<Self::Delivery>;

    fn open(&mut self, address: &str) -> impl Future<Output = Result<Self::Link, RelayError>>;
}
