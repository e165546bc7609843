pub mod bitpay;
pub mod cardnet;
pub mod coingate;
pub mod mpesa;
pub mod mtn;
pub mod paypal;

pub use bitpay::{BitPayConfig, BitPayProvider};
pub use cardnet::{CardnetConfig, CardnetProvider};
pub use coingate::{CoinGateConfig, CoinGateProvider};
pub use mpesa::{MpesaConfig, MpesaProvider};
pub use mtn::{MtnConfig, MtnMomoProvider};
pub use paypal::{PayPalConfig, PayPalProvider};
