pub mod payment_dtos;
