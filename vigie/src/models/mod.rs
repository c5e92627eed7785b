//! Modèle de données du suivi du territoire

pub mod detection;
pub mod object_type;
pub mod parcel;
pub mod tile_set;
pub mod user;
pub mod zone;

pub use detection::{
    Detection, DetectionControlStatus, DetectionData, DetectionObject,
    DetectionPrescriptionStatus, DetectionSource, DetectionValidationStatus,
};
pub use object_type::{ObjectType, ObjectTypeCategory, VisibilityStatus};
pub use parcel::Parcel;
pub use tile_set::{TileSet, TileSetKind, TileSetStatus};
pub use user::{GroupMembership, GroupRight, User, UserGroup, UserRole};
pub use zone::{CustomZoneKind, CustomZoneStatus, GeoZone, ZoneKind};
