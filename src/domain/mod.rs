pub mod alias;
pub mod model;

pub use alias::{canonical_url, is_url, normalize_alias};
pub use model::{PlaybackState, Reference, Requester, TrackMetadata, format_duration};
