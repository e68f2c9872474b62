/// Key of a broker-supplied annotation as it appeared on the wire.
///
/// AMQP restricts annotation keys to symbols or unsigned longs; only symbol
/// keys carry text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AnnotationKey {
    Symbol(String),
    Ulong(u64),
}

/// Value of a broker-supplied annotation, reduced to what the relay needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AnnotationValue {
    String(String),
    Symbol(String),
    /// Any other AMQP type; holds the type name for diagnostics.
    Other(&'static str),
}

/// The annotations of one message, in wire order.
pub type RawAnnotations = Vec<(AnnotationKey, AnnotationValue)>;

/// A message read off the inbound link.
///
/// `delivery` is the transport's own handle. It is what gets accepted and
/// what gets forwarded; the relay never looks inside it.
#[derive(Debug)]
pub struct Inbound<D> {
    pub delivery: D,
    pub message_id: Option<String>,
    pub annotations: RawAnnotations,
}
