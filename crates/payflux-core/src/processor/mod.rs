//! Payment processor integration
//!
//! The core talks to the processor through the [`ProcessorAdapter`] trait;
//! [`authnet`] provides the HTTP implementation. Response codes are mapped
//! to the internal taxonomy by [`classifier`].

pub mod adapter;
pub mod authnet;
pub mod classifier;

pub use adapter::{
    Approval, AuthorizationRequest, BillingContact, CardInput, PaymentInstrument, Outcome,
    ProcessorAdapter, ProcessorEnvironment, RecurringRequest, RemoteStatus, RemoteTransaction,
};
pub use authnet::AuthorizeNetAdapter;
pub use classifier::{classify_response_code, classify_transport, Classification, ErrorCategory};
