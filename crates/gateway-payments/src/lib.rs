//! Invoice issuance, pre-checkout validation, and successful-payment
//! handling — the payments-facing half of the update pipeline (components
//! L, M, N).

pub mod invoice;
pub mod pre_checkout;
pub mod router;
pub mod successful_payment;

pub use invoice::{InvoiceResult, InvoiceService};
pub use pre_checkout::{PreCheckoutHandler, PreCheckoutMetrics};
pub use router::UpdateRouter;
pub use successful_payment::{ProcessedPaymentState, SuccessfulPaymentHandler, SuccessfulPaymentMetrics};
