pub mod b2b;
pub mod b2c;
pub mod balance;
pub mod callbacks;
pub mod payment;
pub mod qrcode;
pub mod reversal;
pub mod status;
pub mod status_query;
