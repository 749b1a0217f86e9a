pub mod api;
pub mod payments;
pub mod registration;
pub mod telemetry;

pub mod util {
    pub mod db;
    pub mod env;
}
