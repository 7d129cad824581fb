pub(crate) mod mpesa_handlers;
pub(crate) mod order_handlers;
