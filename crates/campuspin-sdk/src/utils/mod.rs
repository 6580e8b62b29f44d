pub mod geo;
pub mod time;

pub use geo::{
    bearing_degrees, format_distance, haversine_distance, rank_by_distance, to_cardinal,
    walk_minutes, Cardinal,
};
pub use time::RelativeAge;
