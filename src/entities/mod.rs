// Entity Models
//
// Each entity is a thin view over one table:
// - a plain serde value type (Device, RateEntry, Record, RecordItem)
// - a component wrapping the injected storage handle for its operations
//
// Owner is shared by all of them (user_id column, NULL = shared).

pub mod owner;
pub mod device;
pub mod rate;
pub mod record;

pub use owner::Owner;
pub use device::{Device, DeviceRegistry};
pub use rate::{RateEntry, RateProvider, DEFAULT_RATE};
pub use record::{NewRecordItem, Record, RecordItem, RecordStore};
