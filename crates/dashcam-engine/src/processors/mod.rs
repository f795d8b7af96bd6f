pub mod final_write;
pub mod plate_smooth;
pub mod vehicle_track;

pub use final_write::FinalWriteProcessor;
pub use plate_smooth::PlateSmoothProcessor;
pub use vehicle_track::VehicleTrackProcessor;
