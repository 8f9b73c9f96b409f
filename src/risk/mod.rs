pub mod controls;

pub use controls::DailyCapController;
