pub mod observation_log;

pub use observation_log::ObservationLog;
