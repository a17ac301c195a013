mod catalog;
mod types;

pub use catalog::{select_preferred, CatalogRefresh, DeviceCatalog};
pub use types::{Device, DeviceType, FacingMode, Orientation};
