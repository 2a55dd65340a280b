pub mod mpesa_service;
pub mod status_poller;
