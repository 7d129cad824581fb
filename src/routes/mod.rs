pub mod mpesa;
pub mod orders;
