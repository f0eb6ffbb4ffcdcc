pub mod clients;
pub mod fingerprint;
pub mod pipeline;
