pub mod dispatch;
pub mod error;
pub mod generator_energy;
pub mod interval;
pub mod models;
pub mod ports;
pub mod receiver_energy;
pub mod storage_energy;
