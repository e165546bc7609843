pub mod payment_monitor;
