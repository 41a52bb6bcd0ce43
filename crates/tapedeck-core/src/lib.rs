pub mod catalog;
pub mod config;
pub mod device;
pub mod duration;
pub mod frame;
pub mod output;
pub mod queue;
pub mod status;
pub mod tag;
pub mod transport;

pub use catalog::{Catalog, CatalogEntry, DirectoryCatalog};
pub use config::PlaybackConfig;
pub use status::{TransportState, TransportStatus};
pub use transport::{DecoderFactory, PlayerEvent, Transport};
