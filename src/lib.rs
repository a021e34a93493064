pub mod catalog;
pub mod compactor;
pub mod config;
pub mod http;
pub mod ids;
pub mod limits;
pub mod model;
pub mod observability;
pub mod redemption;
pub mod reservation;
pub mod wal;
