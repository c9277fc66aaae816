/// Classification every backend failure is mapped to before it leaves an
/// adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::EnumIter)]
pub enum ErrorKind {
    MissingCredentials,
    ConnectionRefused,
    ConnectionReset,
    Timeout,
    InsufficientBalance,
    InvalidPaymentResponse,
    PaymentNotFound,
    PaymentFailed,
    Conflict,
    ServerError,
    Unexpected,
    UnsupportedCurrency,
    AssertionViolation,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct SwapClientError {
    pub kind: ErrorKind,
    pub message: String,
}

impl SwapClientError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn missing_credentials(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::MissingCredentials, message)
    }

    pub fn unsupported_currency(currency: &str) -> Self {
        Self::new(
            ErrorKind::UnsupportedCurrency,
            format!("currency {} is not supported by this client", currency),
        )
    }

    pub fn assertion(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::AssertionViolation, message)
    }

    pub fn invalid_payment_response(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidPaymentResponse, message)
    }

    pub fn payment_not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::PaymentNotFound, message)
    }

    /// Whether a payment attempt that failed this way may still be in flight.
    pub fn is_indeterminate(&self) -> bool {
        matches!(
            self.kind,
            ErrorKind::Timeout | ErrorKind::ConnectionReset | ErrorKind::ConnectionRefused
        )
    }
}
