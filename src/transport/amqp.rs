//! AMQP 1.0 transport backed by `fe2o3-amqp`.
//!
//! One [`AmqpEndpoint`] owns the single connection and session of a run.
//! The inbound receiver and every outbound sender are attached to that
//! session.

use fe2o3_amqp::connection::ConnectionHandle;
use fe2o3_amqp::link::delivery::Delivery;
use fe2o3_amqp::link::receiver::CreditMode;
use fe2o3_amqp::sasl_profile::SaslProfile;
use fe2o3_amqp::session::SessionHandle;
use fe2o3_amqp::types::messaging::annotations::OwnedKey;
use fe2o3_amqp::types::messaging::{Body, Message, Outcome};
use fe2o3_amqp::types::primitives::Value;
use fe2o3_amqp::{Connection, Receiver, Sender, Session};
use tokio_rustls::TlsConnector;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::BrokerSettings;
use crate::relay::address::connection_uri;
use crate::tls::TransportSecurity;
use crate::transport::{
    AnnotationKey, AnnotationValue, Inbound, InboundLink, LinkFactory, OutboundLink,
    RawAnnotations, close_within,
};
use crate::utils::RelayError;

/// Message body type the relay receives and forwards untouched.
pub type AmqpMessage = Message<Body<Value>>;
pub type AmqpDelivery = Delivery<Body<Value>>;

/// The connection and session shared by every link of a run.
pub struct AmqpEndpoint {
    connection: ConnectionHandle<()>,
    session: SessionHandle<()>,
}

impl AmqpEndpoint {
    /// Dials the broker and begins the session.
    ///
    /// The TLS connector is applied only when `tls` is set. SASL PLAIN is
    /// negotiated only when both username and password are non-empty;
    /// otherwise the connection is anonymous and the broker may refuse it.
    pub async fn connect(
        broker: &BrokerSettings,
        tls: Option<&TransportSecurity>,
    ) -> Result<Self, RelayError> {
        let uri = connection_uri(&broker.host, broker.port);
        let container_id = format!("amqp-relay-{}", Uuid::new_v4());

        let mut builder = Connection::builder().container_id(container_id);
        match broker.credentials() {
            Some((username, password)) => {
                debug!(%username, "using SASL PLAIN");
                builder = builder.sasl_profile(SaslProfile::Plain {
                    username: username.to_string(),
                    password: password.to_string(),
                });
            }
            None => warn!("no credentials configured, connecting anonymously"),
        }

        let opened = match tls {
            Some(security) => {
                info!(mode = %security.mode(), "connecting with TLS configuration");
                builder
                    .tls_connector(TlsConnector::from(security.client_config()))
                    .open(uri.as_str())
                    .await
            }
            None => builder.open(uri.as_str()).await,
        };
        let mut connection = opened.map_err(|e| RelayError::Connect {
            uri: uri.clone(),
            reason: e.to_string(),
        })?;
        info!(%uri, "connected to broker");

        let session = match Session::begin(&mut connection).await {
            Ok(session) => session,
            Err(e) => {
                if let Err(close_err) = connection.close().await {
                    warn!("failed to close connection: {close_err}");
                }
                return Err(RelayError::Session(e.to_string()));
            }
        };

        Ok(Self {
            connection,
            session,
        })
    }

    /// Attaches the receiving link with a fixed credit window.
    pub async fn open_inbound(
        &mut self,
        address: &str,
        credit: u32,
    ) -> Result<AmqpInbound, RelayError> {
        let receiver = Receiver::builder()
            .name(format!("amqp-relay-receiver-{}", Uuid::new_v4()))
            .source(address.to_string())
            .credit_mode(CreditMode::Auto(credit))
            .attach(&mut self.session)
            .await
            .map_err(|e| RelayError::ReceiverAttach {
                address: address.to_string(),
                reason: e.to_string(),
            })?;
        info!(%address, credit, "receiver attached");

        Ok(AmqpInbound { receiver })
    }

    /// Sender factory borrowing the session.
    pub fn links(&mut self) -> AmqpLinks<'_> {
        AmqpLinks {
            session: &mut self.session,
        }
    }

    /// Ends the session and closes the connection.
    ///
    /// Both steps are attempted, each bounded by
    /// [`CLOSE_TIMEOUT`](crate::transport::CLOSE_TIMEOUT); failures
    /// are collected and returned so the caller can log them.
    pub async fn close(mut self) -> Vec<RelayError> {
        let mut errors = Vec::new();
        let session = &mut self.session;
        let ended = close_within("session", async move {
            session
                .end()
                .await
                .map_err(|e| RelayError::teardown("session", e))
        })
        .await;
        if let Err(e) = ended {
            errors.push(e);
        }

        let connection = &mut self.connection;
        let closed = close_within("connection", async move {
            connection
                .close()
                .await
                .map_err(|e| RelayError::teardown("connection", e))
        })
        .await;
        if let Err(e) = closed {
            errors.push(e);
        }
        errors
    }
}

pub struct AmqpInbound {
    receiver: Receiver,
}

impl InboundLink for AmqpInbound {
    type Delivery = AmqpDelivery;

    async fn receive(&mut self) -> Result<Inbound<AmqpDelivery>, RelayError> {
        let delivery = self
            .receiver
            .recv::<Body<Value>>()
            .await
            .map_err(|e| RelayError::Receive(e.to_string()))?;

        let message = delivery.message();
        let message_id = message
            .properties
            .as_ref()
            .and_then(|p| p.message_id.as_ref())
            .map(|id| format!("{id:?}"));
        let annotations = raw_annotations(message);

        Ok(Inbound {
            delivery,
            message_id,
            annotations,
        })
    }

    async fn accept(&mut self, delivery: &AmqpDelivery) -> Result<(), RelayError> {
        self.receiver
            .accept(delivery)
            .await
            .map_err(|e| RelayError::Accept(e.to_string()))
    }

    async fn close(self) -> Result<(), RelayError> {
        self.receiver
            .close()
            .await
            .map_err(|e| RelayError::teardown("receiver", e))
    }
}

/// Opens senders on the endpoint's session.
pub struct AmqpLinks<'a> {
    session: &'a mut SessionHandle<()>,
}

impl LinkFactory for AmqpLinks<'_> {
    type Delivery = AmqpDelivery;
    type Link = AmqpOutbound;

    async fn open(&mut self, address: &str) -> Result<AmqpOutbound, RelayError> {
        let name = format!("amqp-relay-sender-{}", Uuid::new_v4());
        let sender = Sender::attach(&mut *self.session, name, address.to_string())
            .await
            .map_err(|e| RelayError::SenderAttach {
                address: address.to_string(),
                reason: e.to_string(),
            })?;

        Ok(AmqpOutbound {
            sender,
            address: address.to_string(),
        })
    }
}

pub struct AmqpOutbound {
    sender: Sender,
    address: String,
}

impl OutboundLink<AmqpDelivery> for AmqpOutbound {
    async fn send(&mut self, delivery: &AmqpDelivery) -> Result<(), RelayError> {
        let outcome = self
            .sender
            .send(delivery.message().clone())
            .await
            .map_err(|e| RelayError::Send {
                address: self.address.clone(),
                reason: e.to_string(),
            })?;

        match outcome {
            Outcome::Accepted(_) => Ok(()),
            other => Err(RelayError::Send {
                address: self.address.clone(),
                reason: format!("sink settled message as {other:?}"),
            }),
        }
    }

    async fn close(self) -> Result<(), RelayError> {
        self.sender
            .close()
            .await
            .map_err(|e| RelayError::teardown("sender", e))
    }
}

/// Flattens the message annotations of `message` into wire-ordered pairs.
pub(crate) fn raw_annotations(message: &AmqpMessage) -> RawAnnotations {
    let Some(annotations) = message.message_annotations.as_ref() else {
        return RawAnnotations::new();
    };

    annotations
        .0
        .iter()
        .map(|(key, value)| {
            let key = match key {
                OwnedKey::Symbol(symbol) => AnnotationKey::Symbol(symbol.0.clone()),
                OwnedKey::Ulong(n) => AnnotationKey::Ulong(*n),
            };
            (key, annotation_value(value))
        })
        .collect()
}

fn annotation_value(value: &Value) -> AnnotationValue {
    match value {
        Value::String(s) => AnnotationValue::String(s.clone()),
        Value::Symbol(symbol) => AnnotationValue::Symbol(symbol.0.clone()),
        Value::Null => AnnotationValue::Other("null"),
        Value::Bool(_) => AnnotationValue::Other("boolean"),
        Value::Binary(_) => AnnotationValue::Other("binary"),
        _ => AnnotationValue::Other("non-text"),
    }
}
