pub mod callback_reconciler;
pub mod email_service;
pub mod mpesa_service;
pub mod payment_initiator;
