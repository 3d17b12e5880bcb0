pub mod classifier;
pub mod documents;
pub mod timestamp;

pub use classifier::{
    classify_line, Classified, CourseOverGroundData, DataSource, Measurement, SensorClass,
    SkipReason, TypedReading, WindData,
};
pub use documents::{PositionDocument, WindDocument, POSITION_FIELD, WIND_ANGLE_FIELD};
pub use timestamp::{format_timestamp, normalize, parse_timestamp};
