pub mod reliability;
pub mod statistic_service;
pub mod trip_service;

pub use statistic_service::StatisticService;
pub use trip_service::{ChartPoint, TripData, TripObject, TripRecord, TripService};
